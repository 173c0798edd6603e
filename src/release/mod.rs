//! Release tag queries.
//!
//! Only the query contract lives here: find the last tagged version of a
//! working copy, and check that a version about to be released is newer.
//! Tags are compared with the same version model the resolver uses.

mod vcs;

pub use vcs::{GitTagSource, HgTagSource, TagSource, detect_release_mode};

use log::{debug, warn};

use crate::error::ReleaseError;
use crate::package::Version;

/// Exit code when the query ran but produced no tagged revision.
pub const EXIT_NO_RESULT: i32 = 3;

/// The revision behind the most recent release tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedRevision {
    pub revision: String,
    pub url: String,
    pub tag: String,
    pub version: Version,
}

/// Convert a tag to version text: old style `vXX_YY_ZZ` becomes `XX.YY.ZZ`,
/// otherwise a leading `v` before a digit is dropped.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if let Some(rest) = tag.strip_prefix('v') {
        let parts: Vec<&str> = rest.split('_').collect();
        if parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        {
            return parts.join(".");
        }
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            return rest.to_string();
        }
    }
    tag.to_string()
}

/// The highest tag above version `0`, if any.
///
/// Fails with `NoTags` for an empty tag list and `MalformedTag` for a tag that
/// does not parse as a version.
pub fn last_tagged_version(tags: &[String]) -> Result<Option<(String, Version)>, ReleaseError> {
    if tags.is_empty() {
        return Err(ReleaseError::NoTags);
    }

    let floor = Version::parse("0").map_err(|source| ReleaseError::MalformedTag {
        tag: "0".to_string(),
        source,
    })?;

    let mut latest: Option<(String, Version)> = None;
    for tag in tags {
        let version =
            Version::parse(&normalize_tag(tag)).map_err(|source| ReleaseError::MalformedTag {
                tag: tag.clone(),
                source,
            })?;
        if version <= floor {
            debug!("Ignoring tag '{}': not above 0", tag);
            continue;
        }
        if latest.as_ref().is_none_or(|(_, best)| version > *best) {
            latest = Some((tag.clone(), version));
        }
    }
    Ok(latest)
}

/// Revision and URL of the last tagged release, or `None` when no tag
/// qualifies.
pub async fn get_last_tagged_revision(
    source: &dyn TagSource,
) -> Result<Option<TaggedRevision>, ReleaseError> {
    let tags = source.tags().await?;
    let Some((tag, version)) = last_tagged_version(&tags)? else {
        return Ok(None);
    };

    let revision = source.tag_revision(&tag).await?;
    let url = source.url().await?;
    Ok(Some(TaggedRevision {
        revision,
        url,
        tag,
        version,
    }))
}

/// Check that `current` may be released on top of the existing tags.
pub async fn validate_version(
    source: &dyn TagSource,
    current: &Version,
    allow_not_latest: bool,
) -> Result<(), ReleaseError> {
    if allow_not_latest {
        return Ok(());
    }

    let last = match get_last_tagged_revision(source).await {
        Err(ReleaseError::NoTags) | Ok(None) => return Ok(()),
        Err(e) => return Err(e),
        Ok(Some(last)) => last,
    };

    if *current <= last.version {
        return Err(ReleaseError::Failed(format!(
            "cannot release: current version '{}' is not greater than the latest tag '{}'. \
             Version up or pass --allow-not-latest.",
            current, last.tag
        )));
    }
    if current.as_str().starts_with('v') {
        warn!("Version '{}' starts with 'v'; tags are compared without it", current);
    }
    Ok(())
}
