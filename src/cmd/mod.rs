//! CLI command implementations. Each verb maps one-to-one onto a core
//! entry point; all real work happens in the library.

pub mod check;
pub mod install;
pub mod list;
pub mod lock;
pub mod update;
pub mod whoami;

use std::path::{Path, PathBuf};

use anyhow::Result;

use depot::core::config::{Config, Registry};
use depot::core::lockfile::{LOCKFILE_NAME, Lockfile};
use depot::manager::ManagerRegistry;
use depot::ops::install::InstallRequest;

/// Everything a command needs: parsed config, merged registry, backends.
pub(crate) struct Context {
    pub config: Config,
    pub registry: Registry,
    pub managers: ManagerRegistry,
    pub lock_path: PathBuf,
}

pub(crate) fn load_context(config_path: &Path) -> Result<Context> {
    let config = Config::load_or_default(config_path)?;
    let registry = Registry::merged(&config)?;
    let client = reqwest::Client::builder()
        .user_agent(depot::USER_AGENT)
        .build()?;
    let managers = ManagerRegistry::with_defaults(&client);
    let lock_path = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(LOCKFILE_NAME);
    Ok(Context {
        config,
        registry,
        managers,
        lock_path,
    })
}

impl Context {
    /// The request set: CLI arguments when given, otherwise the
    /// configuration's dependencies.
    pub(crate) fn requests(&self, args: &[String]) -> Vec<InstallRequest> {
        if args.is_empty() {
            self.config
                .dependencies
                .iter()
                .map(|(name, constraint)| InstallRequest {
                    name: name.clone(),
                    constraint: constraint.clone(),
                })
                .collect()
        } else {
            args.iter().map(|s| InstallRequest::parse(s)).collect()
        }
    }

    pub(crate) fn load_lockfile(&self) -> Result<Option<Lockfile>> {
        if self.lock_path.exists() {
            Ok(Some(Lockfile::load(&self.lock_path)?))
        } else {
            Ok(None)
        }
    }
}
