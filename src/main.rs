//! depot CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about = "Declarative dependency manager for developer tools")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file
    #[arg(long, global = true, default_value = depot::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages
    Install {
        /// Package name(s), optionally with version: jq or jq@1.7.1
        packages: Vec<String>,
        /// Binary directory
        #[arg(long)]
        bin_dir: Option<PathBuf>,
        /// Directory-mode application root
        #[arg(long)]
        app_dir: Option<PathBuf>,
        /// Download cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Reinstall even when already present
        #[arg(long, short = 'f')]
        force: bool,
        /// Skip checksum verification
        #[arg(long)]
        skip_checksum: bool,
        /// Fail when no checksum can be determined
        #[arg(long)]
        strict_checksum: bool,
        /// Allow handing .pkg/.msi artifacts to the system installer
        #[arg(long)]
        confirm_installer: bool,
        /// Target platform key (<os>-<arch>)
        #[arg(long)]
        platform: Option<String>,
        /// Target OS (overrides host detection)
        #[arg(long)]
        os: Option<String>,
        /// Target architecture (overrides host detection)
        #[arg(long)]
        arch: Option<String>,
        /// Ignore the lock file and resolve fresh
        #[arg(long)]
        no_lock: bool,
    },
    /// Resolve dependencies and write depot.lock
    Lock {
        /// Package name(s); all configured dependencies when empty
        packages: Vec<String>,
        /// Platform keys to lock (defaults to the host platform)
        #[arg(long, value_delimiter = ',')]
        platforms: Vec<String>,
    },
    /// Re-discover versions and refresh lock entries
    Update {
        /// Package name(s); everything in the lock file when empty
        packages: Vec<String>,
        /// Platform keys to lock (defaults to the host platform)
        #[arg(long, value_delimiter = ',')]
        platforms: Vec<String>,
    },
    /// Report installed vs required versions
    Check {
        /// Package name(s); all configured dependencies when empty
        packages: Vec<String>,
        /// Binary directory
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },
    /// List registry entries
    List,
    /// Report which auth tokens are configured
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install {
            packages,
            bin_dir,
            app_dir,
            cache_dir,
            force,
            skip_checksum,
            strict_checksum,
            confirm_installer,
            platform,
            os,
            arch,
            no_lock,
        } => {
            cmd::install::install(cmd::install::Args {
                config: cli.config,
                quiet: cli.quiet,
                packages,
                bin_dir,
                app_dir,
                cache_dir,
                force,
                skip_checksum,
                strict_checksum,
                confirm_installer,
                platform,
                os,
                arch,
                no_lock,
            })
            .await
        }
        Commands::Lock {
            packages,
            platforms,
        } => cmd::lock::lock(&cli.config, &packages, &platforms).await,
        Commands::Update {
            packages,
            platforms,
        } => cmd::update::update(&cli.config, &packages, &platforms).await,
        Commands::Check { packages, bin_dir } => {
            cmd::check::check(&cli.config, &packages, bin_dir).await
        }
        Commands::List => cmd::list::list(&cli.config),
        Commands::Whoami => {
            cmd::whoami::whoami();
            Ok(())
        }
    }
}
