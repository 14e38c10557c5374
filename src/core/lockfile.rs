//! Lock file for reproducible installs.
//!
//! The lock file (`depot.lock`) pins, for every requested package and
//! platform, the exact URL and checksum that resolution produced. During
//! replay the recorded values are authoritative: the registry is only
//! consulted for entries the lock file does not carry.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::platform::Platform;

pub const LOCKFILE_NAME: &str = "depot.lock";

#[derive(Error, Debug)]
pub enum LockfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_norway::Error),
}

/// Pinned artifact for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedArtifact {
    pub url: String,
    /// Canonical `<type>:<hex>` form.
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
}

/// One locked dependency across the requested platform set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub name: String,
    pub version: String,
    /// Keyed by `<os>-<arch>`; `BTreeMap` keeps serialisation stable.
    pub platforms: BTreeMap<String, LockedArtifact>,
}

/// The lock file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lockfile {
    /// When the lock file was generated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,
}

impl Lockfile {
    pub fn new() -> Self {
        Self {
            generated_at: Some(now_iso8601()),
            dependencies: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_norway::from_str(&content)?)
    }

    /// Serialise deterministically: dependencies sorted by name, platform
    /// keys sorted by the map's ordering.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        let mut sorted = self.clone();
        sorted.dependencies.sort_by(|a, b| a.name.cmp(&b.name));
        let content = serde_norway::to_string(&sorted)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// The pinned artifact for `(name, platform)`, if recorded.
    pub fn artifact(&self, name: &str, platform: &Platform) -> Option<&LockedArtifact> {
        self.find(name)?.platforms.get(&platform.key())
    }

    /// Insert or replace the artifact for `(name, version, platform)`. A
    /// version change drops artifacts recorded for other platforms under
    /// the old version.
    pub fn record(
        &mut self,
        name: &str,
        version: &str,
        platform: &Platform,
        artifact: LockedArtifact,
    ) {
        self.generated_at = Some(now_iso8601());
        if let Some(dep) = self.dependencies.iter_mut().find(|d| d.name == name) {
            if dep.version != version {
                dep.version = version.to_string();
                dep.platforms.clear();
            }
            dep.platforms.insert(platform.key(), artifact);
        } else {
            let mut platforms = BTreeMap::new();
            platforms.insert(platform.key(), artifact);
            self.dependencies.push(LockedDependency {
                name: name.to_string(),
                version: version.to_string(),
                platforms,
            });
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.dependencies.retain(|d| d.name != name);
    }
}

fn now_iso8601() -> String {
    use chrono::prelude::*;
    let utc: DateTime<Utc> = Utc::now();
    utc.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact(url: &str) -> LockedArtifact {
        LockedArtifact {
            url: url.to_string(),
            checksum: format!("sha256:{}", "a".repeat(64)),
            size: Some(1024),
        }
    }

    #[test]
    fn test_lockfile_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);

        let platform: Platform = "linux-amd64".parse().unwrap();
        let mut lockfile = Lockfile::new();
        lockfile.record("jq", "1.7.1", &platform, artifact("https://example.com/jq"));

        lockfile.save(&path).unwrap();
        let loaded = Lockfile::load(&path).unwrap();

        assert_eq!(loaded.dependencies.len(), 1);
        assert_eq!(loaded.dependencies[0].name, "jq");
        assert_eq!(loaded.dependencies[0].version, "1.7.1");
        let pinned = loaded.artifact("jq", &platform).unwrap();
        assert_eq!(pinned.url, "https://example.com/jq");
        assert_eq!(pinned.size, Some(1024));
    }

    #[test]
    fn test_deterministic_output() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.lock");
        let b = dir.path().join("b.lock");
        let linux: Platform = "linux-amd64".parse().unwrap();
        let mac: Platform = "darwin-arm64".parse().unwrap();

        let mut first = Lockfile::default();
        first.record("yq", "4.40.5", &linux, artifact("https://dl/yq-linux"));
        first.record("jq", "1.7.1", &linux, artifact("https://dl/jq-linux"));
        first.record("jq", "1.7.1", &mac, artifact("https://dl/jq-mac"));

        // Same content recorded in a different order.
        let mut second = Lockfile::default();
        second.record("jq", "1.7.1", &mac, artifact("https://dl/jq-mac"));
        second.record("jq", "1.7.1", &linux, artifact("https://dl/jq-linux"));
        second.record("yq", "4.40.5", &linux, artifact("https://dl/yq-linux"));

        // Timestamps aside, identical content serialises identically.
        first.generated_at = None;
        second.generated_at = None;
        first.save(&a).unwrap();
        second.save(&b).unwrap();
        assert_eq!(
            fs::read_to_string(&a).unwrap(),
            fs::read_to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_version_change_clears_stale_platforms() {
        let linux: Platform = "linux-amd64".parse().unwrap();
        let mac: Platform = "darwin-arm64".parse().unwrap();

        let mut lockfile = Lockfile::default();
        lockfile.record("jq", "1.6", &linux, artifact("https://dl/old-linux"));
        lockfile.record("jq", "1.6", &mac, artifact("https://dl/old-mac"));
        lockfile.record("jq", "1.7.1", &linux, artifact("https://dl/new-linux"));

        assert!(lockfile.artifact("jq", &mac).is_none());
        assert_eq!(
            lockfile.artifact("jq", &linux).unwrap().url,
            "https://dl/new-linux"
        );
    }

    #[test]
    fn test_missing_entry() {
        let platform: Platform = "linux-amd64".parse().unwrap();
        let lockfile = Lockfile::default();
        assert!(lockfile.find("nonexistent").is_none());
        assert!(lockfile.artifact("nonexistent", &platform).is_none());
    }
}
