use anyhow::{Context, Result};
use log::{error, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::context::ContextId;
use crate::runtime::Runtime;
use crate::wrapper::{
    GeneratedWrapper, OverwritePolicy, WrapperGenerator, WrapperSpec, validate_specs,
};

use super::config::Config;
use super::resolve::resolve_context;

/// "Resolve these packages into a named context, then emit these wrappers
/// over it."
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InstallDirective {
    /// Directory under `destination` that receives the installation.
    pub output_dir: String,
    /// Alias the context is saved under.
    pub context_name: String,
    /// Name of the directory holding the wrappers.
    pub bin_name: String,
    pub packages: Vec<String>,
    /// `wrapper_name:target_name` pairs.
    pub wrappers: Vec<String>,
    pub destination: PathBuf,
}

impl InstallDirective {
    /// `<destination>/<output_dir>/<bin_name>`
    pub fn bin_dir(&self) -> PathBuf {
        self.destination.join(&self.output_dir).join(&self.bin_name)
    }

    pub fn wrapper_specs(&self) -> Result<Vec<WrapperSpec>> {
        let specs = self
            .wrappers
            .iter()
            .map(|w| WrapperSpec::parse(w))
            .collect::<Result<Vec<_>, _>>()?;
        validate_specs(&specs)?;
        Ok(specs)
    }
}

/// What one directive produced.
#[derive(Debug)]
pub struct InstallReport {
    pub context_name: String,
    pub context_id: ContextId,
    pub wrappers: Vec<GeneratedWrapper>,
}

/// Run one install directive.
#[tracing::instrument(skip(config, directive), fields(context = %directive.context_name))]
pub fn install<R: Runtime>(
    config: &Config<R>,
    directive: &InstallDirective,
    policy: OverwritePolicy,
) -> Result<InstallReport> {
    // wrapper declarations are checked before any resolve work
    let specs = directive.wrapper_specs()?;

    let outcome = resolve_context(config, &directive.packages, true)?;
    let store = config.store();
    store.tag(&directive.context_name, &outcome.id)?;

    let generator = WrapperGenerator::new(&config.runtime, &config.store_root)?;
    let wrappers = generator.generate(&outcome.id, &specs, &directive.bin_dir(), policy)?;

    info!(
        "Installed context '{}' ({}) with {} wrapper(s)",
        directive.context_name,
        outcome.id.short(),
        wrappers.len()
    );
    Ok(InstallReport {
        context_name: directive.context_name.clone(),
        context_id: outcome.id,
        wrappers,
    })
}

fn print_report(report: &InstallReport) {
    println!(
        "   installed {} {}",
        report.context_name,
        report.context_id.short()
    );
    for wrapper in &report.wrappers {
        println!(
            "             {} -> {}",
            wrapper.path.display(),
            wrapper.spec.target_name
        );
    }
}

/// `pinenv install`: a single directive given on the command line.
pub fn install_one<R: Runtime>(
    config: &Config<R>,
    directive: &InstallDirective,
    policy: OverwritePolicy,
) -> Result<()> {
    let report = install(config, directive, policy)?;
    print_report(&report);
    Ok(())
}

/// A build manifest: several install directives.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BuildManifest {
    pub installs: Vec<InstallDirective>,
}

impl BuildManifest {
    /// Load a YAML manifest. Relative destinations are taken relative to the
    /// manifest's directory.
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let text = runtime.read_to_string(path)?;
        let mut manifest: BuildManifest = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse build manifest {:?}", path))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for directive in &mut manifest.installs {
            if directive.destination.is_relative() {
                directive.destination = base.join(&directive.destination);
            }
        }
        Ok(manifest)
    }
}

/// `pinenv build`: run every directive of a manifest, each on its own
/// blocking task.
#[tracing::instrument(skip(config))]
pub async fn build<R: Runtime + 'static>(
    config: Arc<Config<R>>,
    manifest_path: &Path,
    policy: OverwritePolicy,
) -> Result<Vec<InstallReport>> {
    let manifest = BuildManifest::load(&config.runtime, manifest_path)?;
    if manifest.installs.is_empty() {
        println!("Nothing to install.");
        return Ok(Vec::new());
    }

    let mut tasks = JoinSet::new();
    for (index, directive) in manifest.installs.into_iter().enumerate() {
        let config = Arc::clone(&config);
        tasks.spawn_blocking(move || (index, install(&config, &directive, policy), directive));
    }

    let mut reports = Vec::new();
    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        let (index, result, directive) = joined.context("Install task panicked")?;
        match result {
            Ok(report) => {
                print_report(&report);
                reports.push((index, report));
            }
            Err(e) => {
                error!("Install '{}' failed: {:#}", directive.context_name, e);
                eprintln!("   failed {}: {:#}", directive.context_name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} install(s) failed", failures, failures + reports.len());
    }

    reports.sort_by_key(|(index, _)| *index);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WrapperError;
    use crate::runtime::RealRuntime;
    use crate::test_utils::{temp_config, write_package};

    fn directive(destination: &Path, packages: &[&str], wrappers: &[&str]) -> InstallDirective {
        InstallDirective {
            output_dir: "hello".into(),
            context_name: "hello_ctx".into(),
            bin_name: "bin".into(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            wrappers: wrappers.iter().map(|w| w.to_string()).collect(),
            destination: destination.to_path_buf(),
        }
    }

    #[test]
    fn test_install_generates_context_and_wrappers() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), false);
        write_package(&config.packages_path[0], "translate_lib", "2.0.0", &[], None);

        let d = directive(
            &dir.path().join("install"),
            &["translate_lib-2.0.0"],
            &["hey_old:test_translated_hello_world"],
        );
        let report = install(&config, &d, OverwritePolicy::Never).unwrap();

        assert_eq!(config.store().lookup("hello_ctx").unwrap(), report.context_id);
        assert_eq!(report.wrappers.len(), 1);
        assert_eq!(
            report.wrappers[0].path.parent().unwrap(),
            dir.path().join("install/hello/bin")
        );
        assert!(report.wrappers[0].path.exists());
    }

    #[test]
    fn test_install_rejects_bad_wrappers_before_resolving() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), false);

        // package does not exist: a resolve would fail with not_found
        let d = directive(dir.path(), &["ghost"], &["a:x", "a:y"]);
        let err = install(&config, &d, OverwritePolicy::Never).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WrapperError>(),
            Some(WrapperError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_manifest_resolves_relative_destination() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("build.yaml");
        std::fs::write(
            &manifest_path,
            r#"
installs:
  - output_dir: hello
    context_name: hey_old_ctx
    bin_name: bin
    packages: [translate_lib-2.0.0]
    wrappers: ["hey_old:test_translated_hello_world"]
    destination: out
"#,
        )
        .unwrap();

        let manifest = BuildManifest::load(&RealRuntime, &manifest_path).unwrap();
        assert_eq!(manifest.installs.len(), 1);
        assert_eq!(manifest.installs[0].destination, dir.path().join("out"));
        assert_eq!(
            manifest.installs[0].bin_dir(),
            dir.path().join("out").join("hello").join("bin")
        );
    }

    #[tokio::test]
    async fn test_build_runs_every_directive() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), true);
        write_package(&config.packages_path[0], "translate_lib", "1.0.0", &[], None);
        write_package(&config.packages_path[0], "translate_lib", "2.0.0", &[], None);

        let manifest_path = dir.path().join("build.yaml");
        std::fs::write(
            &manifest_path,
            r#"
installs:
  - output_dir: hello
    context_name: old
    bin_name: bin
    packages: [translate_lib-1.0.0]
    wrappers: ["hey_old:hello"]
    destination: out
  - output_dir: hello
    context_name: new
    bin_name: bin_new
    packages: [translate_lib]
    wrappers: ["hey_new:hello"]
    destination: out
"#,
        )
        .unwrap();

        let config = Arc::new(config);
        let reports = build(Arc::clone(&config), &manifest_path, OverwritePolicy::Never)
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].context_name, "old");
        assert_ne!(reports[0].context_id, reports[1].context_id);

        let store = config.store();
        let old = store.load(&store.lookup("old").unwrap()).unwrap();
        assert_eq!(old.used_resolve(), "translate_lib-1.0.0");
        let new = store.load(&store.lookup("new").unwrap()).unwrap();
        assert_eq!(new.used_resolve(), "translate_lib-2.0.0");
    }

    #[tokio::test]
    async fn test_build_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(temp_config(dir.path(), false));
        let manifest_path = dir.path().join("build.yaml");
        std::fs::write(
            &manifest_path,
            "installs:\n  - {output_dir: o, context_name: c, bin_name: b, packages: [ghost], wrappers: [], destination: out}\n",
        )
        .unwrap();

        let err = build(config, &manifest_path, OverwritePolicy::Never)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 of 1 install(s) failed"));
    }
}
