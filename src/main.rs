use anyhow::Result;
use clap::Parser;
use pinenv::commands::{self, Config, InstallDirective};
use pinenv::context::Shell;
use pinenv::runtime::RealRuntime;
use pinenv::wrapper::{OverwritePolicy, run_wrapped};
use std::path::PathBuf;
use std::sync::Arc;

/// pinenv - pinned package environments
///
/// Resolve version-constrained package requests into saved contexts and
/// generate wrapper commands that always run inside them.
///
/// Examples:
///   pinenv resolve translate_lib-2 --name hey_old
///   pinenv install --output-dir hello --context-name hey_old --bin-name bin \
///       --package translate_lib-2.0.0 --wrapper hey_old:test_translated_hello_world \
///       --destination ~/tools
#[derive(Parser, Debug)]
#[command(author, version = env!("PINENV_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Context store directory (also via PINENV_STORE)
    #[arg(long = "store", env = "PINENV_STORE", value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Package search paths, separated like PATH (also via PINENV_PACKAGES_PATH)
    #[arg(
        long = "packages-path",
        env = "PINENV_PACKAGES_PATH",
        value_name = "PATHS",
        global = true
    )]
    pub packages_path: Option<String>,

    /// Always resolve from scratch
    #[arg(long = "no-cache", global = true)]
    pub no_cache: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve package requests and print the result
    Resolve(ResolveArgs),

    /// Inspect saved contexts
    #[command(subcommand)]
    Context(ContextCommands),

    /// List available package families and versions
    List,

    /// Resolve a context and generate wrappers for it
    Install(InstallArgs),

    /// Run every install directive of a build manifest
    Build(BuildArgs),

    /// Run a command inside a saved context (used by wrappers)
    #[command(hide = true)]
    Exec(ExecArgs),

    /// Release tag queries
    #[command(subcommand)]
    Release(ReleaseCommands),

    /// Write a package.yaml template
    Init(InitArgs),
}

#[derive(clap::Args, Debug)]
pub struct ResolveArgs {
    /// Package requests, e.g. "translate_lib-2" or "core_lib>=1.2"
    #[arg(value_name = "REQUEST", required = true)]
    pub requests: Vec<String>,

    /// Save the resolved context to the store
    #[arg(long)]
    pub save: bool,

    /// Save the context and name it
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum ContextCommands {
    /// Show a saved context
    Show {
        #[arg(value_name = "NAME_OR_ID")]
        reference: String,
    },

    /// Print the environment of a saved context as shell code
    Env {
        #[arg(value_name = "NAME_OR_ID")]
        reference: String,

        #[arg(long, value_enum, default_value = "sh")]
        shell: Shell,
    },

    /// List saved contexts
    List,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    #[arg(long, value_name = "DIR")]
    pub output_dir: String,

    #[arg(long, value_name = "NAME")]
    pub context_name: String,

    #[arg(long, value_name = "NAME", default_value = "bin")]
    pub bin_name: String,

    /// Package request (repeatable)
    #[arg(long = "package", value_name = "REQUEST", required = true)]
    pub packages: Vec<String>,

    /// Wrapper as WRAPPER:TARGET (repeatable)
    #[arg(long = "wrapper", value_name = "WRAPPER:TARGET")]
    pub wrappers: Vec<String>,

    #[arg(long, value_name = "PATH")]
    pub destination: PathBuf,

    /// Replace existing files without asking
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// YAML manifest with an `installs` list
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Replace existing files that were not generated by pinenv
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    #[arg(value_name = "CONTEXT")]
    pub context: String,

    #[arg(value_name = "TARGET")]
    pub target: String,

    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum ReleaseCommands {
    /// Print the revision and URL of the last tagged release
    LastTag {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// Check that a version is newer than the last tag
    Validate {
        #[arg(value_name = "VERSION")]
        version: String,

        #[arg(long, value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        #[arg(long)]
        allow_not_latest: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite an existing package.yaml
    #[arg(long)]
    pub force: bool,
}

fn policy(yes: bool, default: OverwritePolicy) -> OverwritePolicy {
    if yes { OverwritePolicy::Always } else { default }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let config = || Config::new(runtime, cli.store.clone(), cli.packages_path.clone(), cli.no_cache);

    match cli.command {
        Commands::Resolve(args) => {
            commands::resolve(&config()?, &args.requests, args.save, args.name.as_deref())?
        }
        Commands::Context(ContextCommands::Show { reference }) => {
            commands::context::show(&config()?, &reference)?
        }
        Commands::Context(ContextCommands::Env { reference, shell }) => {
            commands::context::env(&config()?, &reference, shell)?
        }
        Commands::Context(ContextCommands::List) => commands::context::list(&config()?)?,
        Commands::List => commands::list(&config()?)?,
        Commands::Install(args) => {
            let directive = InstallDirective {
                output_dir: args.output_dir,
                context_name: args.context_name,
                bin_name: args.bin_name,
                packages: args.packages,
                wrappers: args.wrappers,
                destination: args.destination,
            };
            commands::install_one(&config()?, &directive, policy(args.yes, OverwritePolicy::Ask))?
        }
        Commands::Build(args) => {
            commands::build(
                Arc::new(config()?),
                &args.manifest,
                policy(args.yes, OverwritePolicy::Never),
            )
            .await?;
        }
        Commands::Exec(args) => {
            let store = config()?.store_root;
            let code = run_wrapped(&runtime, &store, &args.context, &args.target, &args.args);
            std::process::exit(code);
        }
        Commands::Release(command) => {
            let code = match command {
                ReleaseCommands::LastTag { dir } => {
                    commands::release::last_tag(&runtime, &dir).await
                }
                ReleaseCommands::Validate {
                    version,
                    dir,
                    allow_not_latest,
                } => commands::release::validate(&runtime, &dir, &version, allow_not_latest).await,
            };
            std::process::exit(code);
        }
        Commands::Init(args) => {
            commands::init(&runtime, &args.dir, args.force)?;
        }
    }
    Ok(())
}
