//! Resolved contexts: the frozen result of a resolve.
//!
//! A context is persisted as canonical JSON and addressed by the SHA-256 of
//! those bytes, so saving the same resolve twice lands on the same file and a
//! wrapper can detect a context that was edited after it was generated.

mod cache;
mod environ;
mod store;

pub use cache::{CacheEntry, ResolveCache};
pub use environ::{EnvOp, Environment, Shell, materialize, path_separator};
pub use store::{ContextStore, write_atomic};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use crate::package::{PackageVariant, Requirement};

/// Current on-disk format of a context document.
pub const FORMAT_VERSION: u32 = 1;

/// Content address of a saved context: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Accepts exactly 64 lowercase hex digits.
    pub fn parse(text: &str) -> Option<Self> {
        let valid = text.len() == 64
            && text
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chosen package inside a context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub root: PathBuf,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<EnvOp>>,
}

impl ResolvedPackage {
    /// `name-version`, or just `name` for unversioned packages.
    pub fn qualified_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

impl From<&PackageVariant> for ResolvedPackage {
    fn from(variant: &PackageVariant) -> Self {
        Self {
            name: variant.name.clone(),
            version: variant.version.to_string(),
            root: variant.root.clone(),
            requires: variant.requires.iter().map(ToString::to_string).collect(),
            commands: variant.commands.clone(),
        }
    }
}

/// A resolved, exact package set. Packages are ordered dependencies first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedContext {
    pub format_version: u32,
    pub requests: Vec<String>,
    pub packages: Vec<ResolvedPackage>,
}

impl ResolvedContext {
    pub fn new(requests: &[Requirement], variants: &[PackageVariant]) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            requests: requests.iter().map(ToString::to_string).collect(),
            packages: variants.iter().map(ResolvedPackage::from).collect(),
        }
    }

    /// Canonical serialized form. Identical contexts give identical bytes.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn id(&self) -> serde_json::Result<ContextId> {
        Ok(ContextId::of_bytes(&self.to_bytes()?))
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Space separated `name-version` list of the resolved packages.
    pub fn used_resolve(&self) -> String {
        self.packages
            .iter()
            .map(ResolvedPackage::qualified_name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
