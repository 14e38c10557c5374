//! Version selection over a backend's discovered list.
//!
//! A constraint string is `latest`, an exact tag, or a SemVer requirement.
//! Discovery errors are enhanced with the top of the available list and a
//! closest-version suggestion so a typo'd request is a one-edit fix.

use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::version::{Constraint, Version, closest_version};
use crate::manager::{Manager, ManagerRegistry, ResolveError};

/// Upstream page size for discovery.
pub const DISCOVERY_LIMIT: usize = 100;

/// How many versions an error message lists before truncating.
const ERROR_LIST_LIMIT: usize = 20;

#[derive(Debug)]
pub struct Resolver<'a> {
    registry: &'a ManagerRegistry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a ManagerRegistry) -> Self {
        Self { registry }
    }

    /// Select a version and produce the concrete resolution for it.
    pub async fn resolve(
        &self,
        pkg: &Package,
        constraint: &str,
        platform: &Platform,
    ) -> Result<Resolution, ResolveError> {
        let manager = self.registry.for_package(pkg)?;
        let version = self
            .select_version(manager.as_ref(), pkg, constraint, platform)
            .await?;
        manager.resolve(pkg, &version, platform).await
    }

    /// Pick the version satisfying `constraint` from the backend's list.
    pub async fn select_version(
        &self,
        manager: &dyn Manager,
        pkg: &Package,
        constraint_str: &str,
        platform: &Platform,
    ) -> Result<Version, ResolveError> {
        let constraint = Constraint::parse(constraint_str);

        let versions = match manager
            .discover_versions(pkg, platform, DISCOVERY_LIMIT)
            .await
        {
            Ok(versions) => versions,
            // Backends without discovery accept exact versions verbatim.
            Err(ResolveError::ExactVersionRequired { package }) => {
                return match &constraint {
                    Constraint::Exact(tag) => Ok(Version::new(tag, &pkg.name, false)),
                    _ => Err(ResolveError::ExactVersionRequired { package }),
                };
            }
            Err(e) => return Err(e),
        };

        if versions.is_empty() {
            return Err(ResolveError::NoVersions {
                package: pkg.name.clone(),
            });
        }

        let selected = match &constraint {
            // First entry of the (filtered, sorted) list; prereleases are
            // only eligible when nothing stable exists.
            Constraint::Latest => versions
                .iter()
                .find(|v| !v.prerelease)
                .or_else(|| versions.first())
                .cloned(),
            Constraint::Exact(_) => versions.iter().find(|v| constraint.matches(v)).cloned(),
            Constraint::SemVer(_) => versions
                .iter()
                .filter(|v| constraint.matches(v))
                .filter_map(|v| v.semver().map(|sv| (v, sv)))
                .max_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(v, _)| v.clone()),
        };

        selected.ok_or_else(|| no_match(pkg, constraint_str, &versions))
    }
}

fn no_match(pkg: &Package, requested: &str, versions: &[Version]) -> ResolveError {
    let available: Vec<String> = versions
        .iter()
        .take(ERROR_LIST_LIMIT)
        .map(|v| v.version.clone())
        .collect();
    let closest = closest_version(requested, versions).map(|v| v.version.clone());
    ResolveError::NoMatchingVersion {
        package: pkg.name.clone(),
        requested: requested.to_string(),
        available,
        closest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// In-memory backend for exercising selection logic.
    struct FakeManager {
        versions: Vec<Version>,
    }

    #[async_trait]
    impl Manager for FakeManager {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn discover_versions(
            &self,
            _pkg: &Package,
            _platform: &Platform,
            _limit: usize,
        ) -> Result<Vec<Version>, ResolveError> {
            Ok(self.versions.clone())
        }

        async fn resolve(
            &self,
            pkg: &Package,
            version: &Version,
            platform: &Platform,
        ) -> Result<Resolution, ResolveError> {
            Ok(Resolution {
                package: pkg.name.clone(),
                version: version.clone(),
                platform: *platform,
                download_url: format!("https://dl/{}", version.version),
                checksum: None,
                checksum_url: None,
                checksum_urls: Vec::new(),
                checksum_expr: None,
                is_archive: false,
                binary_path: None,
                asset_name: version.version.clone(),
            })
        }
    }

    fn registry_with(versions: &[(&str, bool)]) -> ManagerRegistry {
        let mut registry = ManagerRegistry::new();
        registry.register(Arc::new(FakeManager {
            versions: versions
                .iter()
                .map(|(tag, pre)| Version::new(tag, "tool", *pre))
                .collect(),
        }));
        registry
    }

    fn pkg() -> Package {
        let mut p = Package::named("tool");
        p.manager = Some("fake".to_string());
        p
    }

    fn platform() -> Platform {
        "linux-amd64".parse().unwrap()
    }

    #[tokio::test]
    async fn test_latest_skips_prereleases() {
        let registry = registry_with(&[("v2.0.0-rc1", true), ("v1.9.0", false), ("v1.8.0", false)]);
        let resolver = Resolver::new(&registry);
        let resolution = resolver.resolve(&pkg(), "latest", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "1.9.0");
    }

    #[tokio::test]
    async fn test_latest_accepts_prerelease_when_nothing_stable() {
        let registry = registry_with(&[("v2.0.0-rc1", true)]);
        let resolver = Resolver::new(&registry);
        let resolution = resolver.resolve(&pkg(), "latest", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "2.0.0-rc1");
    }

    #[tokio::test]
    async fn test_exact_tag_match() {
        let registry = registry_with(&[("v1.9.0", false), ("v1.8.0", false)]);
        let resolver = Resolver::new(&registry);
        let resolution = resolver.resolve(&pkg(), "1.8.0", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "1.8.0");

        // Raw tag form works too.
        let resolution = resolver.resolve(&pkg(), "v1.8.0", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "1.8.0");
    }

    #[tokio::test]
    async fn test_semver_constraint_picks_highest() {
        let registry = registry_with(&[
            ("v2.1.0", false),
            ("v1.9.3", false),
            ("v1.9.1", false),
            ("v1.8.0", false),
        ]);
        let resolver = Resolver::new(&registry);
        let resolution = resolver.resolve(&pkg(), "^1.8", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "1.9.3");

        let resolution = resolver.resolve(&pkg(), ">=2", &platform()).await.unwrap();
        assert_eq!(resolution.version.version, "2.1.0");
    }

    #[tokio::test]
    async fn test_no_match_lists_available_and_closest() {
        let registry = registry_with(&[("v1.9.0", false), ("v1.8.0", false)]);
        let resolver = Resolver::new(&registry);

        match resolver.resolve(&pkg(), "1.8.2", &platform()).await {
            Err(ResolveError::NoMatchingVersion {
                available, closest, ..
            }) => {
                assert_eq!(available, vec!["1.9.0", "1.8.0"]);
                assert_eq!(closest.as_deref(), Some("1.8.0"));
            }
            other => panic!("expected NoMatchingVersion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_pattern_treated_as_exact() {
        let registry = registry_with(&[("2024-05-01", false), ("2024-04-01", false)]);
        let resolver = Resolver::new(&registry);
        let resolution = resolver
            .resolve(&pkg(), "2024-04-01", &platform())
            .await
            .unwrap();
        assert_eq!(resolution.version.version, "2024-04-01");
    }
}
