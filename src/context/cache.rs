use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::package::PACKAGE_FILENAME;
use crate::runtime::Runtime;

use super::{ContextId, ResolvedContext, write_atomic};

/// A remembered resolve: which context a set of requests produced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub context_id: ContextId,
    /// Milliseconds since the Unix epoch when the entry was written.
    pub created_at_ms: u64,
    pub search_paths: Vec<PathBuf>,
    pub requests: Vec<String>,
}

fn epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolve cache stored under `<store>/resolves/<key>.json`.
///
/// An entry is only trusted while none of the resolved packages has changed
/// since it was written, judged by directory and descriptor timestamps.
pub struct ResolveCache<'a, R: Runtime> {
    runtime: &'a R,
    dir: PathBuf,
}

impl<'a, R: Runtime> ResolveCache<'a, R> {
    pub fn new(runtime: &'a R, store_root: &Path) -> Self {
        Self {
            runtime,
            dir: store_root.join("resolves"),
        }
    }

    /// Cache key: SHA-256 over the search paths and the request strings.
    pub fn key(search_paths: &[PathBuf], requests: &[String]) -> String {
        let mut hasher = Sha256::new();
        for path in search_paths {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        hasher.update([1]);
        for request in requests {
            hasher.update(request.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Look up an entry. Unreadable entries count as misses.
    pub fn get(&self, search_paths: &[PathBuf], requests: &[String]) -> Option<CacheEntry> {
        let path = self.entry_path(&Self::key(search_paths, requests));
        if !self.runtime.exists(&path) {
            return None;
        }

        let entry = self
            .runtime
            .read_to_string(&path)
            .and_then(|text| serde_json::from_str::<CacheEntry>(&text).map_err(Into::into));
        match entry {
            Ok(entry) if entry.search_paths == search_paths && entry.requests == requests => {
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Ignoring unreadable cache entry {:?}: {:#}", path, e);
                None
            }
        }
    }

    pub fn put(
        &self,
        search_paths: &[PathBuf],
        requests: &[String],
        context_id: &ContextId,
        now: SystemTime,
    ) -> Result<()> {
        let entry = CacheEntry {
            context_id: context_id.clone(),
            created_at_ms: epoch_ms(now),
            search_paths: search_paths.to_vec(),
            requests: requests.to_vec(),
        };
        let path = self.entry_path(&Self::key(search_paths, requests));
        let json = serde_json::to_vec_pretty(&entry)?;
        write_atomic(self.runtime, &path, &json)
            .with_context(|| format!("Failed to write resolve cache entry {:?}", path))
    }

    /// Whether `entry` still describes what a fresh resolve would produce.
    ///
    /// `family_dirs` maps a package name to its family directories. A new
    /// release touches the family directory; an in-place edit touches the
    /// resolved version's directory or its descriptor.
    pub fn is_fresh<F>(&self, entry: &CacheEntry, context: &ResolvedContext, family_dirs: F) -> bool
    where
        F: Fn(&str) -> Vec<PathBuf>,
    {
        let mut newer = Vec::new();

        for package in &context.packages {
            let mut watched = family_dirs(&package.name);
            watched.push(package.root.clone());
            watched.push(package.root.join(PACKAGE_FILENAME));

            let changed = watched.iter().any(|path| match self.runtime.modified(path) {
                Ok(time) => epoch_ms(time) > entry.created_at_ms,
                Err(e) => {
                    debug!("Cannot stat {:?}: {:#}", path, e);
                    true
                }
            });
            if changed {
                newer.push(package.name.clone());
            }
        }

        if newer.is_empty() {
            return true;
        }
        warn!(
            "Newer released package(s) caused cache miss: {}",
            newer.join(", ")
        );
        false
    }
}
