use log::debug;
use std::path::Path;

use crate::package::Version;
use crate::release::{EXIT_NO_RESULT, detect_release_mode, get_last_tagged_revision, validate_version};
use crate::runtime::Runtime;

/// `pinenv release last-tag`: print `<revision> <url>` of the last tagged
/// release and return the process exit code.
///
/// 0 on success, 1 when the VCS query failed or there are no tags, 2 for an
/// unsupported working copy, 3 when no tag is above `0`, 4 for a malformed
/// tag.
#[tracing::instrument(skip(runtime))]
pub async fn last_tag<R: Runtime>(runtime: &R, dir: &Path) -> i32 {
    let source = match detect_release_mode(runtime, dir) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("pinenv: {}", e);
            return e.exit_code();
        }
    };
    debug!("Release mode: {}", source.mode());

    match get_last_tagged_revision(source.as_ref()).await {
        Ok(Some(last)) => {
            println!("{} {}", last.revision, last.url);
            0
        }
        Ok(None) => {
            eprintln!("pinenv: no tag above version 0");
            EXIT_NO_RESULT
        }
        Err(e) => {
            eprintln!("pinenv: {}", e);
            e.exit_code()
        }
    }
}

/// `pinenv release validate`: check that `version` is newer than every tag.
#[tracing::instrument(skip(runtime))]
pub async fn validate<R: Runtime>(
    runtime: &R,
    dir: &Path,
    version: &str,
    allow_not_latest: bool,
) -> i32 {
    let version = match Version::parse(version) {
        Ok(version) => version,
        Err(e) => {
            eprintln!("pinenv: {}", e);
            return 4;
        }
    };

    let source = match detect_release_mode(runtime, dir) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("pinenv: {}", e);
            return e.exit_code();
        }
    };

    match validate_version(source.as_ref(), &version, allow_not_latest).await {
        Ok(()) => {
            println!("{} can be released", version);
            0
        }
        Err(e) => {
            eprintln!("pinenv: {}", e);
            e.exit_code()
        }
    }
}
