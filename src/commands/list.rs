use anyhow::Result;

use crate::package::PackageDatabase;
use crate::runtime::Runtime;

use super::config::Config;

/// Package families with their versions, highest first.
pub fn families<R: Runtime>(config: &Config<R>) -> Result<Vec<(String, Vec<String>)>> {
    let repo = config.repository();
    let mut listing = Vec::new();
    for name in repo.families()? {
        let versions: Vec<String> = repo
            .find_variants(&name)
            .iter()
            .map(|v| v.version.to_string())
            .collect();
        if !versions.is_empty() {
            listing.push((name, versions));
        }
    }
    Ok(listing)
}

/// List all packages on the package path
#[tracing::instrument(skip(config))]
pub fn list<R: Runtime>(config: &Config<R>) -> Result<()> {
    let listing = families(config)?;
    if listing.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    for (name, versions) in listing {
        println!("{} {}", name, versions.join(" "));
    }
    Ok(())
}
