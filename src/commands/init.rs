use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::package::{PACKAGE_FILENAME, PackageDescriptor};
use crate::runtime::Runtime;

/// Write a starter `package.yaml` into `dir`.
#[tracing::instrument(skip(runtime))]
pub fn init<R: Runtime>(runtime: &R, dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(PACKAGE_FILENAME);
    if runtime.exists(&path) && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }

    let user = runtime
        .env_var("USER")
        .or_else(|_| runtime.env_var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let platform = runtime
        .env_var("PINENV_PLATFORM")
        .unwrap_or_else(|_| std::env::consts::OS.to_string());
    let uuid = uuid::Uuid::new_v4().to_string();

    let text = PackageDescriptor::template(&user, &platform, &uuid);
    runtime.create_dir_all(dir)?;
    runtime
        .write(&path, text.as_bytes())
        .with_context(|| format!("Failed to write {:?}", path))?;

    info!("Wrote {:?}", path);
    println!("created {}", path.display());
    Ok(path)
}
