//! Version values and constraint matching.
//!
//! A [`Version`] keeps both the raw tag (`jq-1.7.1`, `v16.1.0`) and the
//! normalised version string (`1.7.1`, `16.1.0`). Constraint strings come in
//! three shapes: `latest`, an exact tag/version, or a SemVer requirement
//! (`^1.2`, `>=16, <17`, `~4.40`).

use serde::{Deserialize, Serialize};

/// A discovered version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Normalised version (`1.7.1`).
    pub version: String,
    /// Raw upstream tag (`jq-1.7.1`).
    pub tag: String,
    /// Whether upstream marked (or the tag suffix implies) a prerelease.
    #[serde(default)]
    pub prerelease: bool,
}

impl Version {
    pub fn new(tag: &str, package_name: &str, prerelease: bool) -> Self {
        Self {
            version: normalize_tag(tag, package_name),
            tag: tag.to_string(),
            prerelease,
        }
    }

    /// A version that is already normalised (lock file replay, direct URLs).
    pub fn exact(version: &str) -> Self {
        Self {
            version: version.to_string(),
            tag: version.to_string(),
            prerelease: false,
        }
    }

    /// Best-effort SemVer view. Partial versions are padded (`1.6` parses
    /// as `1.6.0`) so constraint matching works on the long tail of tools
    /// that do not publish three components.
    pub fn semver(&self) -> Option<semver::Version> {
        parse_semverish(&self.version)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.version)
    }
}

/// Strip common prefixes from upstream tags: `v1.0.0`, `jq-1.8.1`,
/// `release-2.3` all normalise to the bare version.
pub fn normalize_tag(tag: &str, package_name: &str) -> String {
    let mut version = tag;
    let mut prefixes = vec!["release-".to_string(), "v".to_string()];
    if !package_name.is_empty() {
        prefixes.insert(0, format!("{package_name}-"));
        prefixes.insert(1, format!("{package_name}_"));
    }

    let mut changed = true;
    while changed {
        changed = false;
        for p in &prefixes {
            if version.len() > p.len() && version.starts_with(p.as_str()) {
                version = &version[p.len()..];
                changed = true;
            }
        }
    }
    version.to_string()
}

/// Tag suffixes that flag a prerelease even when the source has no
/// explicit flag (archive indexes, tag listings).
pub fn looks_prerelease(version: &str) -> bool {
    let v = version.to_lowercase();
    if ["alpha", "beta", "rc", "snapshot", "dev", "preview", "nightly"]
        .iter()
        .any(|marker| v.contains(marker))
    {
        return true;
    }
    // Maven-style milestones: 11.0.0-M20.
    v.split_once('-').is_some_and(|(_, suffix)| {
        suffix.starts_with('m') && suffix[1..].chars().next().is_some_and(|c| c.is_ascii_digit())
    })
}

/// How a constraint string should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Latest,
    Exact(String),
    SemVer(semver::VersionReq),
}

impl Constraint {
    /// Classify a constraint string. Anything that does not parse as a
    /// SemVer requirement is treated as an exact tag.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") || s == "*" {
            return Self::Latest;
        }
        if s.starts_with(['^', '~', '>', '<', '='])
            || s.contains(' ')
            || s.contains(',')
            || s.ends_with(".x")
            || s.ends_with(".*")
        {
            if let Ok(req) = semver::VersionReq::parse(s) {
                return Self::SemVer(req);
            }
        }
        Self::Exact(s.to_string())
    }

    /// Whether `version` satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Latest => true,
            Self::Exact(want) => {
                version.version == normalize_tag(want, "") || version.tag == *want
            }
            Self::SemVer(req) => version.semver().is_some_and(|v| req.matches(&v)),
        }
    }
}

/// Parse possibly-partial versions: `16` → `16.0.0`, `1.6` → `1.6.0`.
pub fn parse_semverish(s: &str) -> Option<semver::Version> {
    let s = s.trim().trim_start_matches('v');
    if let Ok(v) = semver::Version::parse(s) {
        return Some(v);
    }
    // Split off any prerelease/build suffix before padding.
    let (core, suffix) = match s.find(['-', '+']) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    let padded = match parts.as_slice() {
        [major] => format!("{major}.0.0{suffix}"),
        [major, minor] => format!("{major}.{minor}.0{suffix}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

/// Distance between two versions for "did you mean" suggestions. Smaller
/// is closer; component differences are weighted so a major mismatch always
/// outranks any minor/patch drift.
pub fn semver_distance(a: &semver::Version, b: &semver::Version) -> u64 {
    let major = a.major.abs_diff(b.major);
    let minor = a.minor.abs_diff(b.minor);
    let patch = a.patch.abs_diff(b.patch);
    major * 1_000_000 + minor * 1_000 + patch
}

/// The available version closest to `wanted`, for error enhancement.
pub fn closest_version<'a>(wanted: &str, available: &'a [Version]) -> Option<&'a Version> {
    let target = parse_semverish(wanted)?;
    available
        .iter()
        .filter_map(|v| v.semver().map(|sv| (v, sv)))
        .min_by_key(|(_, sv)| semver_distance(&target, sv))
        .map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("v1.7.1", "jq"), "1.7.1");
        assert_eq!(normalize_tag("jq-1.8.1", "jq"), "1.8.1");
        assert_eq!(normalize_tag("jq-v1.8.1", "jq"), "1.8.1");
        assert_eq!(normalize_tag("release-2.3.0", "tool"), "2.3.0");
        assert_eq!(normalize_tag("1.7.1", "jq"), "1.7.1");
    }

    #[test]
    fn test_constraint_classification() {
        assert_eq!(Constraint::parse("latest"), Constraint::Latest);
        assert_eq!(Constraint::parse(""), Constraint::Latest);
        assert_eq!(Constraint::parse("*"), Constraint::Latest);
        assert_eq!(
            Constraint::parse("1.7.1"),
            Constraint::Exact("1.7.1".to_string())
        );
        assert!(matches!(Constraint::parse("^1.2"), Constraint::SemVer(_)));
        assert!(matches!(
            Constraint::parse(">=16, <17"),
            Constraint::SemVer(_)
        ));
        assert!(matches!(Constraint::parse("~4.40"), Constraint::SemVer(_)));
        // Unknown patterns fall back to exact.
        assert_eq!(
            Constraint::parse("2024-05-01"),
            Constraint::Exact("2024-05-01".to_string())
        );
    }

    #[test]
    fn test_constraint_matching() {
        let v = Version::new("v1.7.1", "jq", false);
        assert!(Constraint::parse("1.7.1").matches(&v));
        assert!(Constraint::parse("v1.7.1").matches(&v));
        assert!(Constraint::parse("^1.6").matches(&v));
        assert!(!Constraint::parse("^2.0").matches(&v));
        assert!(Constraint::parse("latest").matches(&v));
    }

    #[test]
    fn test_partial_version_matching() {
        let v = Version::new("1.6", "jq", false);
        assert_eq!(v.semver().unwrap(), semver::Version::new(1, 6, 0));
        assert!(Constraint::parse("^1.5").matches(&v));
    }

    #[test]
    fn test_looks_prerelease() {
        assert!(looks_prerelease("1.0.0-rc1"));
        assert!(looks_prerelease("2.0-SNAPSHOT"));
        assert!(looks_prerelease("3.0.0-beta.2"));
        assert!(looks_prerelease("11.0.0-M20"));
        assert!(!looks_prerelease("1.7.1"));
        assert!(!looks_prerelease("1.7.1-musl"));
    }

    #[test]
    fn test_closest_version() {
        let available = vec![
            Version::exact("1.5.0"),
            Version::exact("1.6.0"),
            Version::exact("2.0.0"),
        ];
        let closest = closest_version("1.6.1", &available).unwrap();
        assert_eq!(closest.version, "1.6.0");

        let closest = closest_version("2.1.0", &available).unwrap();
        assert_eq!(closest.version, "2.0.0");
    }
}
