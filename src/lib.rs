//! depot - declarative dependency manager for developer tools.
//!
//! Resolves `(tool, version constraint, platform)` requests against
//! pluggable backends, downloads and verifies the artifacts, extracts and
//! post-processes them, installs into a bin/app directory, and records
//! reproducible results in `depot.lock`.

pub mod core;
pub mod io;
pub mod manager;
pub mod ops;
pub mod ui;

// Re-exports for convenience
pub use crate::core::config::{Config, Registry};
pub use crate::core::lockfile::Lockfile;
pub use crate::core::package::{Package, Resolution};
pub use crate::core::platform::Platform;
pub use crate::manager::ManagerRegistry;
pub use crate::ops::install::{InstallOptions, InstallRequest, Installer};

use std::path::PathBuf;

use dirs::home_dir;

pub const USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// Configuration file read from the working directory.
pub const CONFIG_FILE: &str = "depot.yaml";

/// Try to get the depot home directory, `None` when the home directory
/// cannot be determined.
pub fn try_depot_home() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".depot"))
}

/// Default depot home directory: `~/.depot`.
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn depot_home() -> PathBuf {
    try_depot_home().expect("Could not determine home directory")
}

/// Default binary directory: `$DEPS_BIN_DIR` or `~/.depot/bin`.
pub fn default_bin_dir() -> PathBuf {
    std::env::var_os("DEPS_BIN_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| depot_home().join("bin"))
}

/// Directory-mode installation root: `~/.depot/app`.
pub fn default_app_dir() -> PathBuf {
    depot_home().join("app")
}

/// Download cache: `~/.depot/cache`.
pub fn default_cache_dir() -> PathBuf {
    depot_home().join("cache")
}
