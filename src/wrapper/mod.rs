//! Wrapper executables bound to a saved context.
//!
//! A wrapper is a tiny script that calls back into `pinenv exec` with a fixed
//! context id and target name, so running it always reproduces the frozen
//! environment it was generated against.

mod exec;

pub use exec::{EXIT_CONTEXT_FAILURE, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, find_program, run_wrapped};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::context::{ContextId, ContextStore, materialize, write_atomic};
use crate::error::WrapperError;
use crate::runtime::Runtime;

/// Marker line written into every generated wrapper.
pub const WRAPPER_MARKER: &str = "pinenv-wrapper:";

/// One `wrapper_name:target_name` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WrapperSpec {
    pub wrapper_name: String,
    pub target_name: String,
}

impl WrapperSpec {
    pub fn new(wrapper_name: &str, target_name: &str) -> Result<Self, WrapperError> {
        let spec = format!("{}:{}", wrapper_name, target_name);
        for (part, what) in [(wrapper_name, "wrapper name"), (target_name, "target name")] {
            let reason = if part.is_empty() {
                Some(format!("{} is empty", what))
            } else if part.contains(['/', '\\']) {
                Some(format!("{} must not contain a path separator", what))
            } else if part.chars().any(char::is_whitespace) {
                Some(format!("{} must not contain whitespace", what))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(WrapperError::InvalidSpec { spec, reason });
            }
        }

        Ok(Self {
            wrapper_name: wrapper_name.to_string(),
            target_name: target_name.to_string(),
        })
    }

    /// Parse `wrapper_name:target_name`.
    pub fn parse(text: &str) -> Result<Self, WrapperError> {
        let (wrapper, target) = text.split_once(':').ok_or_else(|| WrapperError::InvalidSpec {
            spec: text.to_string(),
            reason: "expected 'wrapper_name:target_name'".to_string(),
        })?;
        Self::new(wrapper, target)
    }
}

impl FromStr for WrapperSpec {
    type Err = WrapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Reject duplicate wrapper names within one generation call.
pub fn validate_specs(specs: &[WrapperSpec]) -> Result<(), WrapperError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.wrapper_name.as_str()) {
            return Err(WrapperError::DuplicateName {
                name: spec.wrapper_name.clone(),
            });
        }
    }
    Ok(())
}

/// What to do when a wrapper path already holds a file we did not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    #[default]
    Ask,
    Always,
    Never,
}

/// A wrapper written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedWrapper {
    pub spec: WrapperSpec,
    pub path: PathBuf,
}

/// File name of a wrapper on this platform.
pub fn wrapper_file_name(wrapper_name: &str) -> String {
    if cfg!(windows) {
        format!("{}.cmd", wrapper_name)
    } else {
        wrapper_name.to_string()
    }
}

fn sh_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Script body of a wrapper that re-enters `context_id` and runs the target.
pub fn render_script(launcher: &Path, store_root: &Path, context_id: &ContextId, spec: &WrapperSpec) -> String {
    if cfg!(windows) {
        format!(
            "@echo off\r\nrem {marker} {w} -> {t}\r\n\"{exe}\" --store \"{store}\" exec {id} {t} -- %*\r\nexit /b %ERRORLEVEL%\r\n",
            marker = WRAPPER_MARKER,
            w = spec.wrapper_name,
            t = spec.target_name,
            exe = launcher.display(),
            store = store_root.display(),
            id = context_id,
        )
    } else {
        format!(
            "#!/bin/sh\n# {marker} {w} -> {t}\nexec {exe} --store {store} exec {id} {target} -- \"$@\"\n",
            marker = WRAPPER_MARKER,
            w = spec.wrapper_name,
            t = spec.target_name,
            exe = sh_quote(&launcher.to_string_lossy()),
            store = sh_quote(&store_root.to_string_lossy()),
            id = sh_quote(context_id.as_str()),
            target = sh_quote(&spec.target_name),
        )
    }
}

/// Whether `path` is a script, or a binary goblin recognises as an executable.
pub fn is_runnable<R: Runtime>(runtime: &R, path: &Path) -> bool {
    use std::io::Read;

    let mut file = match runtime.open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buffer = Vec::new();
    if file.read_to_end(&mut buffer).is_err() {
        return false;
    }
    if buffer.starts_with(b"#!") {
        return true;
    }

    matches!(
        goblin::Object::parse(&buffer),
        Ok(goblin::Object::Elf(_)) | Ok(goblin::Object::Mach(_)) | Ok(goblin::Object::PE(_))
    )
}

/// Generates wrapper executables for saved contexts.
pub struct WrapperGenerator<'a, R: Runtime> {
    runtime: &'a R,
    launcher: PathBuf,
    store: ContextStore<'a, R>,
}

impl<'a, R: Runtime> WrapperGenerator<'a, R> {
    /// A generator whose wrappers call back into the running binary.
    ///
    /// Wrappers outlive the current directory, so the store root is made
    /// absolute first.
    pub fn new(runtime: &'a R, store_root: &Path) -> Result<Self> {
        let launcher = runtime.current_exe()?;
        let store_root = std::path::absolute(store_root)
            .with_context(|| format!("Failed to make {:?} absolute", store_root))?;
        Ok(Self::with_launcher(runtime, &store_root, launcher))
    }

    pub fn with_launcher(runtime: &'a R, store_root: &Path, launcher: PathBuf) -> Self {
        Self {
            runtime,
            launcher,
            store: ContextStore::new(runtime, store_root),
        }
    }

    fn is_wrapper(&self, path: &Path) -> bool {
        self.runtime
            .read_to_string(path)
            .map(|text| text.lines().take(3).any(|l| l.contains(WRAPPER_MARKER)))
            .unwrap_or(false)
    }

    fn check_target(&self, target: &str, env: &BTreeMap<String, String>) {
        match find_program(self.runtime, target, env) {
            None => warn!(
                "Target '{}' is not on the context PATH; it must come from the calling environment",
                target
            ),
            Some(path) if !is_runnable(self.runtime, &path) => {
                warn!("Target {:?} does not look like an executable", path)
            }
            Some(path) => debug!("Target '{}' resolves to {:?}", target, path),
        }
    }

    /// Write one wrapper per spec into `bin_dir`, all bound to `context_id`.
    #[tracing::instrument(skip(self, specs))]
    pub fn generate(
        &self,
        context_id: &ContextId,
        specs: &[WrapperSpec],
        bin_dir: &Path,
        policy: OverwritePolicy,
    ) -> Result<Vec<GeneratedWrapper>> {
        validate_specs(specs)?;
        let context = self.store.load(context_id)?;
        let env = materialize(&context, context_id.as_str()).apply(&BTreeMap::new(), false);

        self.runtime
            .create_dir_all(bin_dir)
            .with_context(|| format!("Failed to create {:?}", bin_dir))?;

        let mut generated = Vec::with_capacity(specs.len());
        for spec in specs {
            self.check_target(&spec.target_name, &env);

            let path = bin_dir.join(wrapper_file_name(&spec.wrapper_name));
            if self.runtime.exists(&path) && !self.is_wrapper(&path) {
                match policy {
                    OverwritePolicy::Always => {}
                    OverwritePolicy::Never => {
                        return Err(WrapperError::ForeignFile { path }.into());
                    }
                    OverwritePolicy::Ask => {
                        let prompt = format!("{:?} is not a pinenv wrapper. Overwrite it?", path);
                        if !self.runtime.confirm(&prompt)? {
                            warn!("Skipped wrapper '{}'", spec.wrapper_name);
                            continue;
                        }
                    }
                }
            }

            let script = render_script(&self.launcher, self.store.root(), context_id, spec);
            write_atomic(self.runtime, &path, script.as_bytes())
                .with_context(|| format!("Failed to write wrapper {:?}", path))?;
            self.runtime.set_permissions(&path, 0o755)?;

            info!(
                "Wrapper {:?} -> {} (context {})",
                path,
                spec.target_name,
                context_id.short()
            );
            generated.push(GeneratedWrapper {
                spec: spec.clone(),
                path,
            });
        }

        Ok(generated)
    }
}
