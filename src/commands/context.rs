use anyhow::Result;

use crate::context::{Shell, materialize};
use crate::runtime::Runtime;

use super::config::Config;

/// Show the packages of a saved context.
#[tracing::instrument(skip(config))]
pub fn show<R: Runtime>(config: &Config<R>, reference: &str) -> Result<()> {
    let store = config.store();
    let id = store.lookup(reference)?;
    let context = store.load(&id)?;

    println!("context:  {}", id);
    println!("requests: {}", context.requests.join(" "));
    for package in &context.packages {
        println!("  {:<24} {}", package.qualified_name(), package.root.display());
        for requirement in &package.requires {
            println!("      requires {}", requirement);
        }
    }
    Ok(())
}

/// Print a script that applies a saved context to the calling shell.
#[tracing::instrument(skip(config))]
pub fn env<R: Runtime>(config: &Config<R>, reference: &str, shell: Shell) -> Result<()> {
    let store = config.store();
    let id = store.lookup(reference)?;
    let context = store.load(&id)?;
    print!("{}", materialize(&context, id.as_str()).render(shell));
    Ok(())
}

/// List saved contexts: named ones first, then the remaining ids.
#[tracing::instrument(skip(config))]
pub fn list<R: Runtime>(config: &Config<R>) -> Result<()> {
    let store = config.store();
    let names = store.list_names()?;
    let ids = store.list_ids()?;

    if names.is_empty() && ids.is_empty() {
        println!("No contexts saved.");
        return Ok(());
    }

    for (name, id) in &names {
        println!("{:<24} {}", name, id);
    }
    for id in ids.iter().filter(|id| !names.iter().any(|(_, named)| named == *id)) {
        println!("{:<24} {}", "-", id);
    }
    Ok(())
}
