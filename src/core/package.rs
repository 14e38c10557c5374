//! Package specifications and resolutions.
//!
//! A [`Package`] is the static, declarative description of a tool (from the
//! merged registry); a [`Resolution`] is the fully concrete download plan
//! produced for one `(package, version, platform)` request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::platform::Platform;
use crate::core::version::Version;

/// How the artifact lands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// A single executable copied into the bin directory.
    #[default]
    File,
    /// A whole tree unpacked under the app directory, with symlinks into
    /// the bin directory.
    Directory,
}

/// One symlink request for directory-mode installs. `from` is a glob
/// resolved inside the installed app tree; `to` is the link name in the
/// bin directory (`{name}` expands to the glob match's basename).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkSpec {
    pub from: String,
    pub to: String,
}

/// One post-process step: either a bare expression or a conditional block
/// whose nested steps only run when the condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostStep {
    Expr(String),
    Conditional {
        condition: String,
        steps: Vec<PostStep>,
    },
}

/// Declarative tool specification, merged from the built-in catalog and
/// user configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    pub name: String,

    /// Backend tag (`github_release`, `github_tags`, `web`, `maven`,
    /// `direct`). When empty the backend is inferred from `source`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,

    /// Source identifier, e.g. `github.com/jqlang/jq` or an index URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Pattern producing the concrete download URL. Variables:
    /// `{version, os, arch, platform, asset, ext, name}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,

    /// Asset-name pattern per platform key, with `*` as the wildcard key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_patterns: BTreeMap<String, String>,

    /// User-defined per-variable lookup tables,
    /// e.g. `ext: {windows: zip, default: tar.gz}`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, BTreeMap<String, String>>,

    /// Explicit checksum (`<type>:<hex>`), highest precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Sibling checksum file name pattern relative to the asset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_file: Option<String>,

    /// Single checksum URL template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_url: Option<String>,

    /// Several checksum URL templates, fetched together for `checksum_expr`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checksum_urls: Vec<String>,

    /// Expression over fetched checksum documents (see `core::expr`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_expr: Option<String>,

    /// Expression filtering/shaping the discovered version list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_expr: Option<String>,

    pub mode: InstallMode,

    /// Name of the binary inside the archive (also the location hint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,

    /// Relative path of the binary inside the archive when it is not at
    /// the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,

    /// Directory-mode symlinks into the bin directory.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<SymlinkSpec>,

    /// Ordered post-process pipeline run in the scratch directory.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_process: Vec<PostStep>,

    /// Command used to probe an installed binary's version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_command: Option<String>,

    /// Regex extracting the version from the probe output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_regex: Option<String>,

    /// Backend-specific settings (artifact-repository coordinates, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Package {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// The asset pattern for `platform`, falling back to the `*` entry.
    pub fn asset_pattern(&self, platform: &Platform) -> Option<&str> {
        self.asset_patterns
            .get(&platform.key())
            .or_else(|| self.asset_patterns.get("*"))
            .map(String::as_str)
    }

    /// The name the installed binary should have (sans `.exe`).
    pub fn install_name(&self) -> &str {
        self.binary_name.as_deref().unwrap_or(&self.name)
    }
}

/// Fully concrete download plan for one `(package, version, platform)`.
/// The URL is completely rendered; at most one checksum discovery path is
/// populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub package: String,
    pub version: Version,
    pub platform: Platform,

    pub download_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checksum_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_expr: Option<String>,

    pub is_archive: bool,

    /// Hint for locating the binary inside an extracted archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,

    pub asset_name: String,
}

impl Resolution {
    /// True when any checksum source is configured.
    pub fn has_checksum_source(&self) -> bool {
        self.checksum.is_some()
            || self.checksum_url.is_some()
            || !self.checksum_urls.is_empty()
            || self.checksum_expr.is_some()
    }
}

/// Extensions the extractor understands; anything else is a raw binary.
pub fn is_archive_name(name: &str) -> bool {
    let n = name.to_lowercase();
    [
        ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tar.zst", ".tar", ".zip",
        ".jar",
    ]
    .iter()
    .any(|ext| n.ends_with(ext))
}

/// System installer packages that require a platform installer handoff.
pub fn is_system_installer(name: &str) -> bool {
    let n = name.to_lowercase();
    n.ends_with(".pkg") || n.ends_with(".msi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_pattern_platform_then_wildcard() {
        let mut pkg = Package::named("yq");
        pkg.asset_patterns
            .insert("*".to_string(), "yq_{os}_{arch}".to_string());
        pkg.asset_patterns
            .insert("windows-amd64".to_string(), "yq_windows_amd64.exe".to_string());

        let win: Platform = "windows-amd64".parse().unwrap();
        let mac: Platform = "darwin-arm64".parse().unwrap();
        assert_eq!(pkg.asset_pattern(&win), Some("yq_windows_amd64.exe"));
        assert_eq!(pkg.asset_pattern(&mac), Some("yq_{os}_{arch}"));
    }

    #[test]
    fn test_post_step_deserialization() {
        let yaml = r#"
- unarchive(glob("*.tar.gz")[0])
- condition: os == "windows"
  steps:
    - move("tool.exe", "tool")
"#;
        let steps: Vec<PostStep> = serde_norway::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], PostStep::Expr(_)));
        match &steps[1] {
            PostStep::Conditional { condition, steps } => {
                assert_eq!(condition, "os == \"windows\"");
                assert_eq!(steps.len(), 1);
            }
            PostStep::Expr(_) => panic!("expected conditional step"),
        }
    }

    #[test]
    fn test_is_archive_name() {
        assert!(is_archive_name("yq_darwin_arm64.tar.gz"));
        assert!(is_archive_name("tool.zip"));
        assert!(is_archive_name("lib.jar"));
        assert!(!is_archive_name("jq-linux64"));
        assert!(!is_archive_name("tool.exe"));
        assert!(is_system_installer("pkg-1.0.msi"));
        assert!(is_system_installer("Tool.pkg"));
    }
}
