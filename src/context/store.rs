use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ContextError;
use crate::runtime::Runtime;

use super::{ContextId, FORMAT_VERSION, ResolvedContext};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to `path` through a sibling temp file and a rename, so
/// readers never observe a partial file.
pub fn write_atomic<R: Runtime>(runtime: &R, path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{:?} has no parent directory", path))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{:?} has no file name", path))?;

    runtime.create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}-{}",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = runtime
        .write(&tmp, contents)
        .and_then(|_| runtime.rename(&tmp, path));
    if result.is_err() && runtime.exists(&tmp) {
        let _ = runtime.remove_file(&tmp);
    }
    result
}

/// Content-addressed context storage plus named aliases.
///
/// Layout under the store root:
/// - `contexts/<id>.json`: context documents, never rewritten once saved
/// - `names/<name>`: alias files holding a context id
pub struct ContextStore<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
}

impl<'a, R: Runtime> ContextStore<'a, R> {
    pub fn new(runtime: &'a R, root: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context_path(&self, id: &ContextId) -> PathBuf {
        self.root.join("contexts").join(format!("{}.json", id))
    }

    fn name_path(&self, name: &str) -> PathBuf {
        self.root.join("names").join(name)
    }

    /// Persist `context` and return its id. Saving an already stored
    /// context is a no-op.
    #[tracing::instrument(skip(self, context))]
    pub fn save(&self, context: &ResolvedContext) -> Result<ContextId> {
        let bytes = context.to_bytes()?;
        let id = ContextId::of_bytes(&bytes);
        let path = self.context_path(&id);

        if self.runtime.exists(&path) {
            match self.runtime.read_to_string(&path) {
                Ok(existing) if existing.as_bytes() == bytes.as_slice() => {
                    debug!("Context {} already stored", id.short());
                    return Ok(id);
                }
                _ => warn!("Stored context {} differs from its id, rewriting", id.short()),
            }
        }

        write_atomic(self.runtime, &path, &bytes)
            .with_context(|| format!("Failed to save context to {:?}", path))?;
        debug!("Saved context {} to {:?}", id.short(), path);
        Ok(id)
    }

    /// Load and verify a stored context.
    #[tracing::instrument(skip(self))]
    pub fn load(&self, id: &ContextId) -> Result<ResolvedContext, ContextError> {
        let path = self.context_path(id);
        if !self.runtime.exists(&path) {
            return Err(ContextError::Missing {
                id: id.to_string(),
                path,
            });
        }

        let corrupt = |reason: String| ContextError::Corrupt {
            id: id.to_string(),
            reason,
        };

        let text = self
            .runtime
            .read_to_string(&path)
            .map_err(|e| corrupt(format!("{:#}", e)))?;

        let actual = ContextId::of_bytes(text.as_bytes());
        if actual != *id {
            return Err(corrupt(format!("content hash is {}", actual)));
        }

        let context =
            ResolvedContext::from_bytes(text.as_bytes()).map_err(|e| corrupt(e.to_string()))?;
        if context.format_version > FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                context.format_version
            )));
        }
        Ok(context)
    }

    /// Point the alias `name` at `id`, replacing any previous target.
    pub fn tag(&self, name: &str, id: &ContextId) -> Result<()> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_whitespace)
        {
            anyhow::bail!("invalid context name '{}'", name);
        }
        let path = self.name_path(name);
        write_atomic(self.runtime, &path, format!("{}\n", id).as_bytes())
            .with_context(|| format!("Failed to write context name {:?}", path))
    }

    /// Resolve a context reference: an alias name, or a literal id.
    pub fn lookup(&self, reference: &str) -> Result<ContextId, ContextError> {
        let path = self.name_path(reference);
        if !reference.is_empty() && !reference.contains(['/', '\\']) && self.runtime.exists(&path)
        {
            let text = self
                .runtime
                .read_to_string(&path)
                .map_err(|e| ContextError::Corrupt {
                    id: reference.to_string(),
                    reason: format!("{:#}", e),
                })?;
            return ContextId::parse(text.trim()).ok_or_else(|| ContextError::Corrupt {
                id: reference.to_string(),
                reason: format!("alias holds '{}', not a context id", text.trim()),
            });
        }

        ContextId::parse(reference).ok_or_else(|| ContextError::UnknownName {
            name: reference.to_string(),
        })
    }

    /// Named contexts, sorted by name. Unreadable aliases are skipped.
    pub fn list_names(&self) -> Result<Vec<(String, ContextId)>> {
        let dir = self.root.join("names");
        if !self.runtime.is_dir(&dir) {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in self.runtime.read_dir(&dir)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match self.lookup(name) {
                Ok(id) => names.push((name.to_string(), id)),
                Err(e) => warn!("Skipping context name '{}': {}", name, e),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Ids of every stored context, sorted.
    pub fn list_ids(&self) -> Result<Vec<ContextId>> {
        let dir = self.root.join("contexts");
        if !self.runtime.is_dir(&dir) {
            return Ok(Vec::new());
        }

        let mut ids: Vec<ContextId> = self
            .runtime
            .read_dir(&dir)?
            .iter()
            .filter_map(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(".json"))
                    .and_then(ContextId::parse)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, dir.path());
        let context = sample_context();

        let id = store.save(&context).unwrap();
        assert_eq!(id, context.id().unwrap());
        assert!(store.context_path(&id).exists());

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded, context);

        // saving again is idempotent
        assert_eq!(store.save(&loaded).unwrap(), id);
        assert_eq!(store.list_ids().unwrap(), vec![id]);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, dir.path());
        let id = ContextId::of_bytes(b"nothing");

        let err = store.load(&id).unwrap_err();
        assert!(matches!(err, ContextError::Missing { .. }));
    }

    #[test]
    fn test_load_detects_tampering() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, dir.path());
        let id = store.save(&sample_context()).unwrap();

        let path = store.context_path(&id);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("2.0.0", "9.9.9")).unwrap();

        let err = store.load(&id).unwrap_err();
        assert!(matches!(err, ContextError::Corrupt { .. }));
    }

    #[test]
    fn test_load_detects_garbage() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, dir.path());

        let garbage = b"{ not json";
        let id = ContextId::of_bytes(garbage);
        std::fs::create_dir_all(dir.path().join("contexts")).unwrap();
        std::fs::write(store.context_path(&id), garbage).unwrap();

        let err = store.load(&id).unwrap_err();
        assert!(matches!(err, ContextError::Corrupt { .. }));
    }

    #[test]
    fn test_tag_and_lookup() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, dir.path());
        let id = store.save(&sample_context()).unwrap();

        store.tag("hey", &id).unwrap();
        assert_eq!(store.lookup("hey").unwrap(), id);
        assert_eq!(store.lookup(id.as_str()).unwrap(), id);
        assert!(matches!(
            store.lookup("nope"),
            Err(ContextError::UnknownName { .. })
        ));
        assert_eq!(store.list_names().unwrap(), vec![("hey".to_string(), id)]);

        assert!(store.tag("../escape", &ContextId::of_bytes(b"x")).is_err());
        assert!(store.tag("", &ContextId::of_bytes(b"x")).is_err());
    }

    #[test]
    fn test_write_atomic_cleans_up_on_failure() {
        let mut runtime = MockRuntime::new();
        let target = PathBuf::from("/store/contexts/abc.json");

        runtime
            .expect_create_dir_all()
            .with(eq(PathBuf::from("/store/contexts")))
            .returning(|_| Ok(()));
        runtime.expect_write().returning(|_, _| Ok(()));
        runtime
            .expect_rename()
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_remove_file()
            .withf(|p: &Path| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".abc.json.tmp-"))
            })
            .times(1)
            .returning(|_| Ok(()));

        assert!(write_atomic(&runtime, &target, b"{}").is_err());
    }

    #[test]
    fn test_concurrent_identical_saves() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let context = sample_context();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                let context = context.clone();
                std::thread::spawn(move || {
                    let runtime = RealRuntime;
                    ContextStore::new(&runtime, root).save(&context).unwrap()
                })
            })
            .collect();

        let ids: Vec<ContextId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let runtime = RealRuntime;
        let store = ContextStore::new(&runtime, &root);
        assert_eq!(store.load(&ids[0]).unwrap(), context);
        assert_eq!(store.list_ids().unwrap().len(), 1);
    }
}
