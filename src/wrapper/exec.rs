//! The wrapper entry point: `pinenv exec <context> <target> -- args...`.

use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::{ContextStore, materialize, path_separator};
use crate::runtime::Runtime;

/// The context could not be found or failed verification.
pub const EXIT_CONTEXT_FAILURE: i32 = 125;
/// The target was found but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// The target is not on the context `PATH`.
pub const EXIT_NOT_FOUND: i32 = 127;

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        ["", ".exe", ".cmd", ".bat"]
            .iter()
            .map(|ext| dir.join(format!("{}{}", name, ext)))
            .collect()
    } else {
        vec![dir.join(name)]
    }
}

/// Locate `target` on the `PATH` of `env`. A target given as a path is
/// taken as is.
pub fn find_program<R: Runtime>(
    runtime: &R,
    target: &str,
    env: &BTreeMap<String, String>,
) -> Option<PathBuf> {
    let target_path = Path::new(target);
    if target_path.is_absolute() || target_path.components().count() > 1 {
        return runtime
            .exists(target_path)
            .then(|| target_path.to_path_buf());
    }

    let search = env.get("PATH")?;
    search
        .split(path_separator())
        .filter(|dir| !dir.is_empty())
        .flat_map(|dir| candidates(Path::new(dir), target))
        .find(|candidate| runtime.exists(candidate) && !runtime.is_dir(candidate))
}

/// Re-enter a saved context and run `target` inside it.
///
/// Returns the process exit code: the target's own code, or one of the
/// `EXIT_*` codes when the wrapper itself failed. On Unix a successful exec
/// never returns.
#[tracing::instrument(skip(runtime, args))]
pub fn run_wrapped<R: Runtime>(
    runtime: &R,
    store_root: &Path,
    context_ref: &str,
    target: &str,
    args: &[String],
) -> i32 {
    let store = ContextStore::new(runtime, store_root);
    let loaded = store
        .lookup(context_ref)
        .and_then(|id| store.load(&id).map(|context| (id, context)));
    let (id, context) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("pinenv: {}", e);
            return EXIT_CONTEXT_FAILURE;
        }
    };

    let env = materialize(&context, id.as_str()).apply(&runtime.env_vars(), true);

    let Some(program) = find_program(runtime, target, &env) else {
        eprintln!(
            "pinenv: {}: command not found in context {}",
            target,
            id.short()
        );
        return EXIT_NOT_FOUND;
    };

    debug!("Executing {:?} with {} argument(s)", program, args.len());
    match runtime.exec(&program, args, &env) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pinenv: {:#}", e);
            EXIT_NOT_EXECUTABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use crate::context::{ContextId, ResolvedContext};
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// A mock store holding `context` under `/store`.
    fn mock_store(runtime: &mut MockRuntime, context: &ResolvedContext) -> ContextId {
        let bytes = context.to_bytes().unwrap();
        let id = ContextId::of_bytes(&bytes);
        let path = PathBuf::from("/store/contexts").join(format!("{}.json", id));
        let text = String::from_utf8(bytes).unwrap();

        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/store/names").join(id.as_str())))
            .returning(|_| false);
        runtime
            .expect_exists()
            .with(eq(path.clone()))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(path))
            .returning(move |_| Ok(text.clone()));
        id
    }

    #[cfg(unix)]
    #[test]
    fn test_find_program_walks_path() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/a/tool")))
            .returning(|_| false);
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/b/tool")))
            .returning(|_| true);
        runtime.expect_is_dir().returning(|_| false);

        let found = find_program(&runtime, "tool", &env(&[("PATH", "/a::/b")]));
        assert_eq!(found, Some(PathBuf::from("/b/tool")));
    }

    #[test]
    fn test_find_program_without_path() {
        let runtime = MockRuntime::new();
        assert_eq!(find_program(&runtime, "tool", &BTreeMap::new()), None);
    }

    #[test]
    fn test_run_wrapped_missing_context() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let code = run_wrapped(&runtime, Path::new("/store"), "hey", "hello", &[]);
        assert_eq!(code, EXIT_CONTEXT_FAILURE);

        let id = ContextId::of_bytes(b"gone");
        let code = run_wrapped(&runtime, Path::new("/store"), id.as_str(), "hello", &[]);
        assert_eq!(code, EXIT_CONTEXT_FAILURE);
    }

    #[test]
    fn test_run_wrapped_tampered_context() {
        let context = sample_context();
        let bytes = context.to_bytes().unwrap();
        let id = ContextId::of_bytes(&bytes);
        let path = PathBuf::from("/store/contexts").join(format!("{}.json", id));
        let tampered = String::from_utf8(bytes).unwrap().replace("\"fr\"", "\"de\"");

        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/store/names").join(id.as_str())))
            .returning(|_| false);
        runtime
            .expect_exists()
            .with(eq(path.clone()))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(path))
            .returning(move |_| Ok(tampered.clone()));

        // no env or exec expectations: the target must never start
        let code = run_wrapped(&runtime, Path::new("/store"), id.as_str(), "hello", &[]);
        assert_eq!(code, EXIT_CONTEXT_FAILURE);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_wrapped_passes_exit_code_and_env() {
        let mut runtime = MockRuntime::new();
        let id = mock_store(&mut runtime, &sample_context());

        runtime
            .expect_env_vars()
            .returning(|| env(&[("PATH", "/usr/bin"), ("HOME", "/home/u")]));
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/pkgs/core_lib/1.4/bin/hello")))
            .returning(|_| true);
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_exec()
            .withf(|program: &Path, args: &[String], env: &BTreeMap<String, String>| {
                program == Path::new("/pkgs/core_lib/1.4/bin/hello")
                    && args == ["--greet", "world"]
                    && env.get("PATH").map(String::as_str) == Some("/pkgs/core_lib/1.4/bin:/usr/bin")
                    && env.get("TRANSLATE_LANG").map(String::as_str) == Some("fr")
                    && env.get("HOME").map(String::as_str) == Some("/home/u")
            })
            .returning(|_, _, _| Ok(3));

        let args = vec!["--greet".to_string(), "world".to_string()];
        let code = run_wrapped(&runtime, Path::new("/store"), id.as_str(), "hello", &args);
        assert_eq!(code, 3);
    }

    #[test]
    fn test_run_wrapped_target_not_found() {
        let mut runtime = MockRuntime::new();
        let id = mock_store(&mut runtime, &sample_context());
        runtime.expect_env_vars().returning(BTreeMap::new);
        runtime.expect_exists().returning(|_| false);

        let code = run_wrapped(&runtime, Path::new("/store"), id.as_str(), "hello", &[]);
        assert_eq!(code, EXIT_NOT_FOUND);
    }

    #[test]
    fn test_run_wrapped_exec_failure() {
        let mut runtime = MockRuntime::new();
        let id = mock_store(&mut runtime, &sample_context());
        runtime.expect_env_vars().returning(BTreeMap::new);
        runtime.expect_exists().returning(|_| true);
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_exec()
            .returning(|_, _, _| Err(anyhow::anyhow!("permission denied")));

        let code = run_wrapped(&runtime, Path::new("/store"), id.as_str(), "hello", &[]);
        assert_eq!(code, EXIT_NOT_EXECUTABLE);
    }
}
