use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Get the default store root directory
#[tracing::instrument(skip(runtime))]
pub fn default_store_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(system_store_root(runtime))
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".pinenv"))
    }
}

#[cfg(target_os = "macos")]
#[tracing::instrument(skip(_runtime))]
fn system_store_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/opt/pinenv")
}

#[cfg(target_os = "windows")]
#[tracing::instrument(skip(_runtime))]
fn system_store_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from(r"C:\ProgramData\pinenv")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
#[tracing::instrument(skip(_runtime))]
fn system_store_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/usr/local/pinenv")
}
