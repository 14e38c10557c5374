//! High-level operations: version selection and installation.

pub mod install;
pub mod resolve;

use std::path::PathBuf;

use thiserror::Error;

pub use install::{InstallOptions, Installer};
pub use resolve::Resolver;

use crate::core::checksum::ChecksumError;
use crate::core::config::ConfigError;
use crate::core::expr::ExprError;
use crate::core::lockfile::LockfileError;
use crate::core::template::TemplateError;
use crate::io::download::DownloadError;
use crate::io::extract::ExtractError;
use crate::io::postprocess::PostProcessError;
use crate::manager::ResolveError;

/// How an install request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Installed,
    ForcedInstalled,
    AlreadyInstalled,
    Failed,
}

/// What checksum verification concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    ChecksumMatch,
    ChecksumMismatch,
    Skipped,
}

/// Whether the installed binary reports the expected version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionStatus {
    Valid,
    Invalid,
    /// The artifact targets another platform and cannot be executed here.
    UnsupportedPlatform,
}

/// Result of one `(package, version constraint, platform)` install.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub package: String,
    pub version: String,
    pub status: Status,
    pub verify_status: VerifyStatus,
    pub version_status: VersionStatus,
    /// Final path of the primary binary (file mode) or app root
    /// (directory mode).
    pub path: Option<PathBuf>,
    /// Canonical `<type>:<hex>` that verified (or was recorded for) the
    /// artifact.
    pub checksum_used: Option<String>,
    pub checksum_sources: Vec<String>,
    /// Diagnostic detail when `status == Failed`.
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
