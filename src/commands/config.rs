use anyhow::Result;
use log::debug;
use std::path::PathBuf;

use crate::context::{ContextStore, ResolveCache};
use crate::package::PackageRepository;
use crate::runtime::Runtime;

use super::paths::default_store_root;

/// Settings shared by every command.
pub struct Config<R: Runtime> {
    pub runtime: R,
    pub store_root: PathBuf,
    /// Package search paths, in priority order.
    pub packages_path: Vec<PathBuf>,
    pub use_cache: bool,
}

/// Split a platform path list (`:` or `;` separated), dropping empty entries.
pub fn parse_path_list(list: &str) -> Vec<PathBuf> {
    std::env::split_paths(list)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

impl<R: Runtime> Config<R> {
    pub fn new(
        runtime: R,
        store_root: Option<PathBuf>,
        packages_path: Option<String>,
        no_cache: bool,
    ) -> Result<Self> {
        let store_root = match store_root {
            Some(path) => path,
            None => default_store_root(&runtime)?,
        };

        let mut search = packages_path
            .as_deref()
            .map(parse_path_list)
            .unwrap_or_default();
        if search.is_empty() {
            search.push(store_root.join("packages"));
        }

        let caching_disabled = runtime
            .env_var("PINENV_DISABLE_CACHING")
            .is_ok_and(|v| !v.is_empty() && v != "0");
        if caching_disabled {
            debug!("Resolve cache disabled by PINENV_DISABLE_CACHING");
        }

        debug!("Store root: {:?}, packages path: {:?}", store_root, search);
        Ok(Self {
            runtime,
            store_root,
            packages_path: search,
            use_cache: !(no_cache || caching_disabled),
        })
    }

    pub fn repository(&self) -> PackageRepository<'_, R> {
        PackageRepository::new(&self.runtime, self.packages_path.clone())
    }

    pub fn store(&self) -> ContextStore<'_, R> {
        ContextStore::new(&self.runtime, &self.store_root)
    }

    pub fn cache(&self) -> ResolveCache<'_, R> {
        ResolveCache::new(&self.runtime, &self.store_root)
    }
}
