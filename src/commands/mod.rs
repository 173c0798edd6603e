pub mod config;
pub mod context;
mod init;
mod install;
mod list;
mod paths;
pub mod release;
mod resolve;

pub use config::Config;
pub use init::init;
pub use install::{BuildManifest, InstallDirective, InstallReport, build, install, install_one};
pub use list::{families, list};
pub use paths::default_store_root;
pub use resolve::{ResolveOutcome, resolve, resolve_context};
