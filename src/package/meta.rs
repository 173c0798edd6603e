use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::context::EnvOp;
use crate::error::VersionError;
use crate::runtime::Runtime;

use super::{PackageVariant, Requirement, Version};

/// File name of a package descriptor inside a version directory.
pub const PACKAGE_FILENAME: &str = "package.yaml";

/// Package descriptor (`package.yaml`) as written by package authors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub config_version: u32,
    pub name: String,
    #[serde(default, deserialize_with = "version_text")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<EnvOp>>,
}

/// Accept `version: 1.5` as well as `version: "1.5"`.
///
/// Unquoted YAML floats lose trailing zeros (`1.10` reads as `1.1`), so
/// descriptors should quote such versions; the directory check catches the rest.
fn version_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a version string, found {:?}",
            other
        ))),
    }
}

impl PackageDescriptor {
    #[tracing::instrument(skip(runtime, path))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime.read_to_string(path)?;
        let descriptor: PackageDescriptor = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse package descriptor {:?}", path))?;
        Ok(descriptor)
    }

    pub fn parse_requires(&self) -> Result<Vec<Requirement>, VersionError> {
        self.requires.iter().map(|r| Requirement::parse(r)).collect()
    }

    /// Build the variant this descriptor describes, rooted at `root`.
    pub fn into_variant(self, root: &Path, source_index: usize) -> Result<PackageVariant> {
        let version = Version::parse(&self.version)?;
        let requires = self
            .parse_requires()
            .with_context(|| format!("Invalid requirements in {}", self.name))?;
        if let Some(bad) = self.commands.iter().flatten().find(|op| !op.has_valid_name()) {
            anyhow::bail!(
                "Invalid variable name {:?} in commands of {}",
                bad.name().unwrap_or_default(),
                self.name
            );
        }

        Ok(PackageVariant {
            name: self.name,
            version,
            requires,
            root: root.to_path_buf(),
            commands: self.commands,
            source_index,
        })
    }

    /// A starter `package.yaml`, filled in for `user` on `platform`.
    pub fn template(user: &str, platform: &str, uuid: &str) -> String {
        format!(
            r#"config_version: 0

name: enter_package_name

version: 0.0.0

uuid: {uuid}

authors:
- {user}

description: >
 Enter description here. Multiline is ok, but make sure
 that you leave the single leading space on each line.

# platform: {platform}

requires:
- required_package_1
- required_package_n

commands:
- op: prependenv
  name: PATH
  value: "{{root}}/bin"
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    const TRANSLATE_LIB: &str = r#"
name: translate_lib
version: 2.0.0
requires:
  - core_lib-1+
commands:
  - op: setenv
    name: TRANSLATE_LANG
    value: fr
  - op: prependenv
    name: PATH
    value: "{root}/bin"
"#;

    #[test]
    fn test_load_descriptor() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/pkgs/translate_lib/2.0.0/package.yaml");

        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| Ok(TRANSLATE_LIB.to_string()));

        let descriptor = PackageDescriptor::load(&runtime, &path).unwrap();
        assert_eq!(descriptor.name, "translate_lib");
        assert_eq!(descriptor.version, "2.0.0");
        assert_eq!(descriptor.requires, vec!["core_lib-1+".to_string()]);
        assert_eq!(
            descriptor.commands.as_ref().unwrap()[0],
            EnvOp::Setenv {
                name: "TRANSLATE_LANG".into(),
                value: "fr".into()
            }
        );
    }

    #[test]
    fn test_load_descriptor_invalid_yaml() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("name: [unclosed".to_string()));

        let result = PackageDescriptor::load(&runtime, Path::new("/pkgs/x/1/package.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_into_variant() {
        let descriptor: PackageDescriptor = serde_yaml::from_str(TRANSLATE_LIB).unwrap();
        let variant = descriptor
            .into_variant(Path::new("/pkgs/translate_lib/2.0.0"), 1)
            .unwrap();

        assert_eq!(variant.qualified_name(), "translate_lib-2.0.0");
        assert_eq!(variant.requires.len(), 1);
        assert_eq!(variant.requires[0].name, "core_lib");
        assert_eq!(variant.source_index, 1);
        assert_eq!(variant.root, PathBuf::from("/pkgs/translate_lib/2.0.0"));
    }

    #[test]
    fn test_into_variant_rejects_bad_requirement() {
        let descriptor = PackageDescriptor {
            name: "broken".into(),
            version: "1.0".into(),
            requires: vec!["other-~1".into()],
            ..Default::default()
        };
        assert!(descriptor.into_variant(Path::new("/pkgs/broken/1.0"), 0).is_err());
    }

    #[test]
    fn test_numeric_version_is_accepted() {
        let descriptor: PackageDescriptor =
            serde_yaml::from_str("name: core_lib\nversion: 3\n").unwrap();
        assert_eq!(descriptor.version, "3");
    }

    #[test]
    fn test_unversioned_descriptor() {
        let descriptor: PackageDescriptor = serde_yaml::from_str("name: tools\n").unwrap();
        let variant = descriptor.into_variant(Path::new("/pkgs/tools"), 0).unwrap();
        assert!(variant.version.is_empty());
        assert_eq!(variant.qualified_name(), "tools");
        assert!(variant.commands.is_none());
    }

    #[test]
    fn test_template_is_a_valid_descriptor() {
        let text = PackageDescriptor::template("alice", "linux", "0f8fad5b-d9cb-469f-a165-70867728950e");
        let descriptor: PackageDescriptor = serde_yaml::from_str(&text).unwrap();
        assert_eq!(descriptor.authors, vec!["alice".to_string()]);
        assert_eq!(descriptor.uuid.as_deref(), Some("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert_eq!(descriptor.name, "enter_package_name");
        let names: Vec<_> = descriptor
            .parse_requires()
            .unwrap()
            .into_iter()
            .map(|r| (r.name, r.range.is_any()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("required_package_1".to_string(), true),
                ("required_package_n".to_string(), true)
            ]
        );
        assert_eq!(descriptor.commands.unwrap().len(), 1);
    }

    #[test]
    fn test_into_variant_rejects_bad_variable_name() {
        let descriptor: PackageDescriptor = serde_yaml::from_str(
            r#"
name: evil
version: "1.0"
commands:
  - op: setenv
    name: "X; touch /tmp/pwned; Y"
    value: v
"#,
        )
        .unwrap();
        let err = descriptor
            .into_variant(Path::new("/pkgs/evil/1.0"), 0)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid variable name"));
    }
}
