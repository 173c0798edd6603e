use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::ReleaseError;
use crate::runtime::Runtime;

/// Read-only view of a repository's release tags.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagSource: Send + Sync {
    /// Release mode name (`git`, `hg`).
    fn mode(&self) -> &'static str;

    async fn tags(&self) -> Result<Vec<String>, ReleaseError>;

    /// Repository URL recorded with a release.
    async fn url(&self) -> Result<String, ReleaseError>;

    /// Revision identifier the tag points at.
    async fn tag_revision(&self, tag: &str) -> Result<String, ReleaseError>;
}

/// Run a VCS command in `dir` and return its trimmed stdout.
async fn run(program: &str, args: &[&str], dir: &Path) -> Result<String, ReleaseError> {
    debug!("Running {} {:?} in {:?}", program, args, dir);
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| ReleaseError::UnsupportedMode(format!("cannot run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(ReleaseError::Failed(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct GitTagSource {
    dir: PathBuf,
}

impl GitTagSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TagSource for GitTagSource {
    fn mode(&self) -> &'static str {
        "git"
    }

    async fn tags(&self) -> Result<Vec<String>, ReleaseError> {
        let out = run("git", &["tag", "--list"], &self.dir).await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    async fn url(&self) -> Result<String, ReleaseError> {
        run("git", &["remote", "get-url", "origin"], &self.dir).await
    }

    async fn tag_revision(&self, tag: &str) -> Result<String, ReleaseError> {
        run("git", &["rev-list", "-n", "1", tag], &self.dir).await
    }
}

pub struct HgTagSource {
    dir: PathBuf,
}

impl HgTagSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Tag names from `hg tags` output (`name   rev:node`), without `tip`.
fn parse_hg_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| *name != "tip")
        .map(String::from)
        .collect()
}

#[async_trait]
impl TagSource for HgTagSource {
    fn mode(&self) -> &'static str {
        "hg"
    }

    async fn tags(&self) -> Result<Vec<String>, ReleaseError> {
        let out = run("hg", &["tags"], &self.dir).await?;
        Ok(parse_hg_tags(&out))
    }

    async fn url(&self) -> Result<String, ReleaseError> {
        run("hg", &["paths", "default"], &self.dir).await
    }

    async fn tag_revision(&self, tag: &str) -> Result<String, ReleaseError> {
        run("hg", &["log", "-r", tag, "--template", "{node}"], &self.dir).await
    }
}

/// Pick the tag source matching the working copy at `dir`.
pub fn detect_release_mode<R: Runtime>(
    runtime: &R,
    dir: &Path,
) -> Result<Box<dyn TagSource>, ReleaseError> {
    if runtime.exists(&dir.join(".git")) {
        Ok(Box::new(GitTagSource::new(dir)))
    } else if runtime.exists(&dir.join(".hg")) {
        Ok(Box::new(HgTagSource::new(dir)))
    } else {
        Err(ReleaseError::UnsupportedMode(format!(
            "{:?} is not a git or hg working copy",
            dir
        )))
    }
}
