//! Package repositories: where the resolver gets its variants from.
//!
//! The resolver only sees the [`PackageDatabase`] trait, so the on-disk
//! repository and the in-memory one used by tests are interchangeable.

use anyhow::Result;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

use super::discovery::{
    FoundDescriptor, descriptor_path, family_dirs, find_all_families, find_family_descriptors,
};
use super::{PackageDescriptor, PackageVariant, Version};

/// Read-only source of package variants.
pub trait PackageDatabase: Send + Sync {
    /// All variants of `name`. An unknown package yields an empty list.
    fn find_variants(&self, name: &str) -> Vec<PackageVariant>;
}

/// Orders variants best-first: highest version, then the narrowest declared
/// requirements, then earliest search path.
pub fn sort_variants(variants: &mut [PackageVariant]) {
    variants.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| specificity(b).cmp(&specificity(a)))
            .then_with(|| a.source_index.cmp(&b.source_index))
            .then_with(|| a.root.cmp(&b.root))
    });
}

/// Bounded range ends across a variant's requirements. More means narrower.
fn specificity(variant: &PackageVariant) -> usize {
    variant.requires.iter().map(|r| r.range.bound_count()).sum()
}

/// Package repository backed by directories on disk.
///
/// Provides a unified interface for:
/// - Loading package descriptors from an ordered list of search paths
/// - Listing families and their versions
pub struct PackageRepository<'a, R: Runtime> {
    runtime: &'a R,
    search_paths: Vec<PathBuf>,
}

impl<'a, R: Runtime> PackageRepository<'a, R> {
    pub fn new(runtime: &'a R, search_paths: Vec<PathBuf>) -> Self {
        Self {
            runtime,
            search_paths,
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Names of all package families under the search paths.
    pub fn families(&self) -> Result<Vec<String>> {
        find_all_families(self.runtime, &self.search_paths)
    }

    /// Existing family directories of `name` (one per search path at most).
    pub fn family_dirs(&self, name: &str) -> Vec<PathBuf> {
        family_dirs(self.runtime, &self.search_paths, name)
    }

    fn load_variant(&self, name: &str, found: &FoundDescriptor) -> Result<PackageVariant> {
        let descriptor = PackageDescriptor::load(self.runtime, &descriptor_path(&found.root))?;

        if descriptor.name != name {
            anyhow::bail!(
                "descriptor declares name '{}' but lives in family '{}'",
                descriptor.name,
                name
            );
        }

        let dir_version = Version::parse(&found.version_dir_name)?;
        let declared = Version::parse(&descriptor.version)?;
        if declared != dir_version {
            anyhow::bail!(
                "descriptor declares version '{}' but lives in directory '{}'",
                declared,
                found.version_dir_name
            );
        }

        descriptor.into_variant(&found.root, found.source_index)
    }
}

impl<R: Runtime> PackageDatabase for PackageRepository<'_, R> {
    #[tracing::instrument(skip(self))]
    fn find_variants(&self, name: &str) -> Vec<PackageVariant> {
        let found = match find_family_descriptors(self.runtime, &self.search_paths, name) {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to scan package family '{}': {:#}", name, e);
                return Vec::new();
            }
        };

        let mut variants = Vec::with_capacity(found.len());
        for entry in &found {
            match self.load_variant(name, entry) {
                Ok(variant) => variants.push(variant),
                Err(e) => warn!("Skipping package at {:?}: {:#}", entry.root, e),
            }
        }

        sort_variants(&mut variants);
        debug!("Found {} variant(s) of '{}'", variants.len(), name);
        variants
    }
}

/// A fixed, in-memory package set.
#[derive(Debug, Default, Clone)]
pub struct MemoryDatabase {
    families: BTreeMap<String, Vec<PackageVariant>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, variant: PackageVariant) -> &mut Self {
        self.families
            .entry(variant.name.clone())
            .or_default()
            .push(variant);
        self
    }

    pub fn with(mut self, variant: PackageVariant) -> Self {
        self.add(variant);
        self
    }

    /// Root used for variants that were added without one.
    pub fn default_root(name: &str, version: &Version) -> PathBuf {
        Path::new("/packages").join(name).join(version.as_str())
    }
}

impl PackageDatabase for MemoryDatabase {
    fn find_variants(&self, name: &str) -> Vec<PackageVariant> {
        let mut variants = self.families.get(name).cloned().unwrap_or_default();
        for v in &mut variants {
            if v.root.as_os_str().is_empty() {
                v.root = Self::default_root(&v.name, &v.version);
            }
        }
        sort_variants(&mut variants);
        variants
    }
}
