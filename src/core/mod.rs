//! Core data model: platforms, templates, expressions, checksums,
//! versions, package specifications, configuration, and the lock file.

pub mod checksum;
pub mod config;
pub mod expr;
pub mod lockfile;
pub mod package;
pub mod platform;
pub mod template;
pub mod version;
