//! Process operations (own executable path, exec of wrapped targets).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn current_exe_impl(&self) -> Result<PathBuf> {
        std::env::current_exe().context("Failed to locate the pinenv executable")
    }

    #[tracing::instrument(skip(self, env))]
    pub(crate) fn exec_impl(
        &self,
        program: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<i32> {
        let mut command = Command::new(program);
        command.args(args).env_clear().envs(env);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Only returns on failure.
            let err = command.exec();
            Err(err).with_context(|| format!("Failed to exec {:?}", program))
        }

        #[cfg(not(unix))]
        {
            let status = command
                .status()
                .with_context(|| format!("Failed to run {:?}", program))?;
            Ok(status.code().unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_current_exe_is_absolute() {
        let runtime = RealRuntime;
        let exe = runtime.current_exe().unwrap();
        assert!(exe.is_absolute());
    }

    #[test]
    fn test_exec_missing_program_fails() {
        let runtime = RealRuntime;
        let result = runtime.exec(
            std::path::Path::new("/nonexistent/program/for/pinenv"),
            &[],
            &Default::default(),
        );
        assert!(result.is_err());
    }
}
