use std::path::PathBuf;

use crate::context::EnvOp;

use super::{Requirement, Version};

/// One concrete version of a package, as found in a repository.
///
/// Read-only once loaded; the resolver only ever clones it.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageVariant {
    pub name: String,
    pub version: Version,
    pub requires: Vec<Requirement>,
    /// Directory holding the package payload (`{root}` in commands).
    pub root: PathBuf,
    /// Environment operations; `None` means the implicit `PATH` binding.
    pub commands: Option<Vec<EnvOp>>,
    /// Position of the search path the variant was found in. Lower wins ties.
    pub source_index: usize,
}

impl PackageVariant {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            requires: Vec::new(),
            root: PathBuf::new(),
            commands: None,
            source_index: 0,
        }
    }

    pub fn with_requires(mut self, requires: Vec<Requirement>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_commands(mut self, commands: Vec<EnvOp>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn from_source(mut self, index: usize) -> Self {
        self.source_index = index;
        self
    }

    /// `name-version`, or just `name` for unversioned packages.
    pub fn qualified_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}
