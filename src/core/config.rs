//! Configuration loading and registry merging.
//!
//! The effective registry is the built-in catalog overlaid with the user's
//! `registry` section: scalar fields are overridden when the user sets
//! them, maps merge key-by-key with user keys winning, and lists are
//! replaced wholesale.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::package::{InstallMode, Package};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_norway::Error,
    },

    #[error("built-in catalog is invalid: {0}")]
    Catalog(#[source] serde_norway::Error),
}

/// Top-level configuration file (`depot.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bin directory ("target" in the file for historical reasons).
    #[serde(rename = "target", skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Default install mode when a package does not say otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<InstallMode>,

    /// Request set: package name to version constraint.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Per-package overrides merged over the built-in catalog.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub registry: BTreeMap<String, Package>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_norway::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for (name, pkg) in &mut config.registry {
            if pkg.name.is_empty() {
                pkg.name.clone_from(name);
            }
        }
        Ok(config)
    }

    /// Load `path` when it exists, otherwise an empty configuration.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Parse a CLI request like `jq` or `jq@1.6` into name and constraint.
pub fn parse_request(spec: &str) -> (String, String) {
    match spec.split_once('@') {
        Some((name, version)) if !version.is_empty() => {
            (name.to_string(), version.to_string())
        }
        _ => (spec.trim_end_matches('@').to_string(), "latest".to_string()),
    }
}

/// The merged view of built-in catalog plus user registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    packages: BTreeMap<String, Package>,
}

impl Registry {
    /// The built-in catalog shipped with the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        let packages: BTreeMap<String, Package> =
            serde_norway::from_str(include_str!("catalog.yaml")).map_err(ConfigError::Catalog)?;
        let mut registry = Self::default();
        for (name, mut pkg) in packages {
            if pkg.name.is_empty() {
                pkg.name.clone_from(&name);
            }
            registry.packages.insert(name, pkg);
        }
        Ok(registry)
    }

    /// Built-in catalog overlaid with the user's registry section.
    pub fn merged(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin()?;
        for (name, user) in &config.registry {
            let mut user = user.clone();
            if user.name.is_empty() {
                user.name.clone_from(name);
            }
            let merged = match registry.packages.get(name) {
                Some(builtin) => merge_package(builtin, &user),
                None => user,
            };
            registry.packages.insert(name.clone(), merged);
        }

        // Top-level default mode applies to every entry that did not pick
        // one itself.
        if let Some(mode) = config.mode {
            for pkg in registry.packages.values_mut() {
                if pkg.mode == InstallMode::default() {
                    pkg.mode = mode;
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Field-level merge: user values win where set, maps merge key-by-key,
/// lists are replaced as a whole.
fn merge_package(base: &Package, user: &Package) -> Package {
    let mut out = base.clone();
    out.name.clone_from(&user.name);

    if user.manager.is_some() {
        out.manager.clone_from(&user.manager);
    }
    if user.source.is_some() {
        out.source.clone_from(&user.source);
    }
    if user.url_template.is_some() {
        out.url_template.clone_from(&user.url_template);
    }
    if user.checksum.is_some() {
        out.checksum.clone_from(&user.checksum);
    }
    if user.checksum_file.is_some() {
        out.checksum_file.clone_from(&user.checksum_file);
    }
    if user.checksum_url.is_some() {
        out.checksum_url.clone_from(&user.checksum_url);
    }
    if !user.checksum_urls.is_empty() {
        out.checksum_urls.clone_from(&user.checksum_urls);
    }
    if user.checksum_expr.is_some() {
        out.checksum_expr.clone_from(&user.checksum_expr);
    }
    if user.version_expr.is_some() {
        out.version_expr.clone_from(&user.version_expr);
    }
    if user.mode != InstallMode::default() {
        out.mode = user.mode;
    }
    if user.binary_name.is_some() {
        out.binary_name.clone_from(&user.binary_name);
    }
    if user.binary_path.is_some() {
        out.binary_path.clone_from(&user.binary_path);
    }
    if !user.symlinks.is_empty() {
        out.symlinks.clone_from(&user.symlinks);
    }
    if !user.post_process.is_empty() {
        out.post_process.clone_from(&user.post_process);
    }
    if user.version_command.is_some() {
        out.version_command.clone_from(&user.version_command);
    }
    if user.version_regex.is_some() {
        out.version_regex.clone_from(&user.version_regex);
    }

    for (key, value) in &user.asset_patterns {
        out.asset_patterns.insert(key.clone(), value.clone());
    }
    for (var, table) in &user.templates {
        let merged = out.templates.entry(var.clone()).or_default();
        for (key, value) in table {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in &user.extra {
        out.extra.insert(key.clone(), value.clone());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_catalog_parses() {
        let registry = Registry::builtin().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.get("jq").is_some());
        let jq = registry.get("jq").unwrap();
        assert_eq!(jq.name, "jq");
        assert!(jq.source.is_some());
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request("jq@1.6"),
            ("jq".to_string(), "1.6".to_string())
        );
        assert_eq!(
            parse_request("jq"),
            ("jq".to_string(), "latest".to_string())
        );
        assert_eq!(
            parse_request("jq@"),
            ("jq".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn test_user_overrides_scalar_fields() {
        let config: Config = serde_norway::from_str(
            r"
registry:
  jq:
    checksum: 'sha256:0000000000000000000000000000000000000000000000000000000000000000'
",
        )
        .unwrap();

        let registry = Registry::merged(&config).unwrap();
        let jq = registry.get("jq").unwrap();
        assert_eq!(jq.name, "jq");
        assert!(jq.checksum.is_some());
        // Builtin fields the user did not touch survive.
        assert!(jq.source.is_some());
    }

    #[test]
    fn test_map_merge_key_by_key() {
        let builtin = Registry::builtin().unwrap();
        let base = builtin.get("jq").unwrap().clone();

        let mut user = Package::named("jq");
        user.asset_patterns
            .insert("linux-arm64".to_string(), "jq-linux-arm64".to_string());

        let merged = merge_package(&base, &user);
        // User key added, builtin keys preserved.
        assert!(merged.asset_patterns.contains_key("linux-arm64"));
        assert!(merged.asset_patterns.len() > 1);
    }

    #[test]
    fn test_list_replaced_wholesale() {
        let mut base = Package::named("tool");
        base.post_process = vec![crate::core::package::PostStep::Expr(
            "chmod(\"tool\", 493)".to_string(),
        )];

        let mut user = Package::named("tool");
        user.post_process = vec![crate::core::package::PostStep::Expr(
            "move(\"a\", \"b\")".to_string(),
        )];

        let merged = merge_package(&base, &user);
        assert_eq!(merged.post_process, user.post_process);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depot.yaml");
        fs::write(
            &path,
            r"
target: /opt/tools/bin
dependencies:
  jq: '1.7.1'
  yq: latest
",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bin_dir, Some(PathBuf::from("/opt/tools/bin")));
        assert_eq!(config.dependencies.len(), 2);
        assert_eq!(config.dependencies["jq"], "1.7.1");
    }

    #[test]
    fn test_malformed_config_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depot.yaml");
        fs::write(&path, "dependencies: [not: [valid yaml").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
