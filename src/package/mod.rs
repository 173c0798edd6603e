//! Package management module
//!
//! This module provides abstractions for package repositories, including
//! descriptor loading, discovery, and the version model used for resolution.

mod discovery;
mod meta;
mod repository;
mod variant;
mod version;

pub use discovery::{FoundDescriptor, family_dirs, find_all_families, find_family_descriptors};
pub use meta::{PACKAGE_FILENAME, PackageDescriptor};
pub use repository::{MemoryDatabase, PackageDatabase, PackageRepository, sort_variants};
pub use variant::PackageVariant;
pub use version::{Requirement, Version, VersionRange};
