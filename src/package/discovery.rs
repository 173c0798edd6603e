use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

use super::meta::PACKAGE_FILENAME;

/// A descriptor found on disk for one family.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDescriptor {
    /// Index of the search path it was found under.
    pub source_index: usize,
    /// Version directory name, empty for an unversioned package.
    pub version_dir_name: String,
    /// Directory holding `package.yaml` (the package root).
    pub root: PathBuf,
}

/// Find all descriptors of a package family across the search paths.
///
/// Directory structure: `<search path>/<name>/<version>/package.yaml`, or
/// `<search path>/<name>/package.yaml` for an unversioned package (only when
/// that search path has no versioned entries for the family).
#[tracing::instrument(skip(runtime, search_paths))]
pub fn find_family_descriptors<R: Runtime>(
    runtime: &R,
    search_paths: &[PathBuf],
    name: &str,
) -> Result<Vec<FoundDescriptor>> {
    let mut found = Vec::new();

    for (index, search_path) in search_paths.iter().enumerate() {
        let family_dir = search_path.join(name);
        if !runtime.is_dir(&family_dir) {
            continue;
        }

        let before = found.len();
        for entry in runtime.read_dir(&family_dir)? {
            if !runtime.is_dir(&entry) || !runtime.exists(&entry.join(PACKAGE_FILENAME)) {
                continue;
            }
            if let Some(dir_name) = entry.file_name().and_then(|n| n.to_str()) {
                found.push(FoundDescriptor {
                    source_index: index,
                    version_dir_name: dir_name.to_string(),
                    root: entry.clone(),
                });
            }
        }

        if found.len() == before && runtime.exists(&family_dir.join(PACKAGE_FILENAME)) {
            found.push(FoundDescriptor {
                source_index: index,
                version_dir_name: String::new(),
                root: family_dir,
            });
        }
    }

    Ok(found)
}

/// List every package family name present under the search paths.
#[tracing::instrument(skip(runtime, search_paths))]
pub fn find_all_families<R: Runtime>(runtime: &R, search_paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();

    for search_path in search_paths {
        if !runtime.is_dir(search_path) {
            continue;
        }
        for entry in runtime.read_dir(search_path)? {
            if runtime.is_dir(&entry)
                && let Some(name) = entry.file_name().and_then(|n| n.to_str())
                && !name.starts_with('.')
            {
                names.insert(name.to_string());
            }
        }
    }

    Ok(names.into_iter().collect())
}

/// Family directories for `name` that exist under the search paths.
pub fn family_dirs<R: Runtime>(runtime: &R, search_paths: &[PathBuf], name: &str) -> Vec<PathBuf> {
    search_paths
        .iter()
        .map(|p| p.join(name))
        .filter(|dir| runtime.is_dir(dir))
        .collect()
}

pub(crate) fn descriptor_path(root: &Path) -> PathBuf {
    root.join(PACKAGE_FILENAME)
}
