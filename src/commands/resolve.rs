use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::time::SystemTime;

use crate::context::{ContextId, ResolvedContext};
use crate::package::{PackageDatabase, Requirement};
use crate::resolve::Resolver;
use crate::runtime::Runtime;

use super::config::Config;

/// A resolved context and where it came from.
#[derive(Debug)]
pub struct ResolveOutcome {
    pub id: ContextId,
    pub context: ResolvedContext,
    /// Served from the resolve cache.
    pub cached: bool,
}

fn parse_requests(requests: &[String]) -> Result<Vec<Requirement>> {
    requests
        .iter()
        .map(|r| Requirement::parse(r).map_err(Into::into))
        .collect()
}

/// Canonical request strings, used as the cache key input.
fn canonical(requests: &[Requirement]) -> Vec<String> {
    requests.iter().map(ToString::to_string).collect()
}

fn cached_context<R: Runtime>(config: &Config<R>, requests: &[String]) -> Option<ResolveOutcome> {
    let cache = config.cache();
    let entry = cache.get(&config.packages_path, requests)?;

    let context = match config.store().load(&entry.context_id) {
        Ok(context) => context,
        Err(e) => {
            debug!("Cached context unusable: {}", e);
            return None;
        }
    };

    let repo = config.repository();
    if !cache.is_fresh(&entry, &context, |name| repo.family_dirs(name)) {
        return None;
    }

    info!("Using cached resolve {}", entry.context_id.short());
    Some(ResolveOutcome {
        id: entry.context_id,
        context,
        cached: true,
    })
}

/// Resolve `requests` against the configured package path.
///
/// With `persist` the context is saved to the store and remembered in the
/// resolve cache; otherwise only its id is computed.
#[tracing::instrument(skip(config))]
pub fn resolve_context<R: Runtime>(
    config: &Config<R>,
    requests: &[String],
    persist: bool,
) -> Result<ResolveOutcome> {
    let parsed = parse_requests(requests)?;
    let key = canonical(&parsed);

    if config.use_cache
        && let Some(outcome) = cached_context(config, &key)
    {
        return Ok(outcome);
    }

    let repo = config.repository();
    let context = resolve_with(&repo, &parsed)?;

    let id = if persist {
        let id = config.store().save(&context)?;
        if config.use_cache
            && let Err(e) = config
                .cache()
                .put(&config.packages_path, &key, &id, SystemTime::now())
        {
            warn!("Failed to update resolve cache: {:#}", e);
        }
        id
    } else {
        context.id()?
    };

    Ok(ResolveOutcome {
        id,
        context,
        cached: false,
    })
}

fn resolve_with<D: PackageDatabase>(database: &D, requests: &[Requirement]) -> Result<ResolvedContext> {
    let context = Resolver::new(database)
        .resolve(requests)
        .with_context(|| {
            format!(
                "Failed to resolve {}",
                requests
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            )
        })?;
    Ok(context)
}

/// `pinenv resolve`: print the resolved packages, optionally saving and naming
/// the context.
#[tracing::instrument(skip(config))]
pub fn resolve<R: Runtime>(
    config: &Config<R>,
    requests: &[String],
    save: bool,
    name: Option<&str>,
) -> Result<()> {
    let persist = save || name.is_some();
    let outcome = resolve_context(config, requests, persist)?;

    for package in &outcome.context.packages {
        println!("{:<24} {}", package.qualified_name(), package.root.display());
    }

    if persist {
        if let Some(name) = name {
            config.store().tag(name, &outcome.id)?;
            println!("context {} ({})", outcome.id, name);
        } else {
            println!("context {}", outcome.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use crate::test_utils::{temp_config, write_package};

    #[test]
    fn test_resolve_context_persists_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), true);
        write_package(&config.packages_path[0], "core_lib", "1.0", &[], None);
        write_package(&config.packages_path[0], "app", "1.0", &["core_lib-1"], None);

        let first = resolve_context(&config, &["app".to_string()], true).unwrap();
        assert!(!first.cached);
        assert_eq!(first.context.used_resolve(), "core_lib-1.0 app-1.0");
        assert!(config.store().load(&first.id).is_ok());

        let second = resolve_context(&config, &["app".to_string()], true).unwrap();
        assert!(second.cached);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_edited_descriptor_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), true);
        write_package(&config.packages_path[0], "core_lib", "1.0", &[], None);
        let root = write_package(&config.packages_path[0], "app", "1.0", &["core_lib-1"], None);

        let first = resolve_context(&config, &["app".to_string()], true).unwrap();
        assert!(!first.cached);

        // same version, new commands: the family directory is untouched
        let descriptor = root.join("package.yaml");
        std::fs::write(
            &descriptor,
            "name: app\nversion: \"1.0\"\nrequires: [core_lib-1]\ncommands:\n  - {op: setenv, name: APP_MODE, value: fast}\n",
        )
        .unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&descriptor)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let second = resolve_context(&config, &["app".to_string()], true).unwrap();
        assert!(!second.cached);
        assert_ne!(second.id, first.id);
        assert!(second.context.get("app").unwrap().commands.is_some());
    }

    #[test]
    fn test_resolve_context_without_persist_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), true);
        write_package(&config.packages_path[0], "core_lib", "1.0", &[], None);

        let outcome = resolve_context(&config, &["core_lib".to_string()], false).unwrap();
        assert_eq!(outcome.id, outcome.context.id().unwrap());
        assert!(config.store().list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_context_reports_typed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), false);
        write_package(&config.packages_path[0], "a", "1.0", &["c>=1.0"], None);
        write_package(&config.packages_path[0], "b", "1.0", &["c<1.0"], None);
        write_package(&config.packages_path[0], "c", "0.5", &[], None);
        write_package(&config.packages_path[0], "c", "1.5", &[], None);

        let err = resolve_context(&config, &["a".into(), "b".into()], true).unwrap_err();
        let kind = err.downcast_ref::<ResolutionError>().map(ResolutionError::kind);
        assert_eq!(kind, Some("conflict"));

        let err = resolve_context(&config, &["ghost".into()], true).unwrap_err();
        let kind = err.downcast_ref::<ResolutionError>().map(ResolutionError::kind);
        assert_eq!(kind, Some("not_found"));

        let err = resolve_context(&config, &["bad-~1".into()], true).unwrap_err();
        assert!(err.downcast_ref::<crate::error::VersionError>().is_some());
    }

    #[test]
    fn test_resolve_names_context() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path(), false);
        write_package(&config.packages_path[0], "core_lib", "1.0", &[], None);

        resolve(&config, &["core_lib".to_string()], false, Some("base")).unwrap();
        let names = config.store().list_names().unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].0, "base");
    }
}
