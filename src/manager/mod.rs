//! Package-manager backends.
//!
//! Each backend knows how to list versions of a package from one class of
//! source and turn a chosen version into a concrete [`Resolution`]:
//!
//! - [`github::GithubManager`] / [`gitlab::GitlabManager`] — release-hosting
//!   APIs with asset lists;
//! - [`tags::TagsManager`] — tag listings, URLs built purely from templates;
//! - [`web::WebManager`] — HTML archive indexes (Apache-style listings);
//! - [`maven::MavenManager`] — artifact repositories with XML metadata;
//! - [`direct::DirectManager`] — fixed URL templates, no discovery.
//!
//! Backends are registered in an explicit [`ManagerRegistry`] value that
//! callers build at startup and pass into the installer. There is no
//! process-wide backend state.

pub mod direct;
pub mod github;
pub mod gitlab;
pub mod maven;
pub mod tags;
pub mod web;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::core::expr::ExprError;
use crate::core::package::{Package, Resolution, is_archive_name};
use crate::core::platform::Platform;
use crate::core::template::{self, TemplateContext, TemplateError};
use crate::core::version::Version;

/// A release as reported by a backend, shaped for `version_expr`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiscoveredRelease {
    pub tag_name: String,
    pub prerelease: bool,
    pub draft: bool,
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("package {0} has no source configured")]
    NoSource(String),

    #[error("unknown manager '{manager}' for package {package}")]
    UnknownManager { manager: String, package: String },

    #[error("no versions discovered for {package}")]
    NoVersions { package: String },

    #[error(
        "no version of {package} matches '{requested}'{}",
        format_versions(.available, .closest.as_deref())
    )]
    NoMatchingVersion {
        package: String,
        requested: String,
        available: Vec<String>,
        closest: Option<String>,
    },

    #[error("{package} requires an exact version (direct URLs have no discovery)")]
    ExactVersionRequired { package: String },

    #[error(
        "no asset of {package} {version} matches platform {platform}; assets: {}",
        .names.join(", ")
    )]
    NoAsset {
        package: String,
        version: String,
        platform: String,
        names: Vec<String>,
    },

    #[error(
        "multiple assets of {package} {version} match platform {platform}: {}",
        .names.join(", ")
    )]
    AmbiguousAsset {
        package: String,
        version: String,
        platform: String,
        names: Vec<String>,
    },

    #[error("artifact not found at {url}{}", suggestion_suffix(.closest.as_deref()))]
    ArtifactMissing {
        url: String,
        closest: Option<String>,
    },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("metadata from {url} could not be parsed: {message}")]
    Metadata { url: String, message: String },
}

fn format_versions(available: &[String], closest: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(c) = closest {
        out.push_str(&format!(" (closest: {c})"));
    }
    if !available.is_empty() {
        out.push_str("; available: ");
        out.push_str(&available.join(", "));
    }
    out
}

fn suggestion_suffix(closest: Option<&str>) -> String {
    closest.map_or_else(String::new, |c| format!(" (closest version: {c})"))
}

/// One class of package source.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Registry tag, e.g. `github_release`.
    fn name(&self) -> &'static str;

    /// List available versions, newest first. `limit` bounds the upstream
    /// page size; backends may return fewer.
    async fn discover_versions(
        &self,
        pkg: &Package,
        platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError>;

    /// Produce the concrete download plan for one version.
    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, ResolveError>;

    /// Checksums the source publishes per asset, when it has them natively.
    async fn checksums(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, ResolveError> {
        let _ = (pkg, version);
        Ok(BTreeMap::new())
    }
}

/// Explicit backend registry, built once at startup and passed around by
/// reference.
#[derive(Clone, Default)]
pub struct ManagerRegistry {
    managers: HashMap<&'static str, Arc<dyn Manager>>,
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("managers", &self.managers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in backends over a shared HTTP client, with auth tokens
    /// read from the environment.
    pub fn with_defaults(client: &Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(github::GithubManager::from_env(client.clone())));
        registry.register(Arc::new(gitlab::GitlabManager::from_env(client.clone())));
        registry.register(Arc::new(tags::TagsManager::from_env(client.clone())));
        registry.register(Arc::new(web::WebManager::new(client.clone())));
        registry.register(Arc::new(maven::MavenManager::new(client.clone())));
        registry.register(Arc::new(direct::DirectManager::new()));
        registry
    }

    pub fn register(&mut self, manager: Arc<dyn Manager>) {
        self.managers.insert(manager.name(), manager);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        self.managers.get(name).cloned()
    }

    /// Pick the backend for a package: the explicit `manager` tag when
    /// set, otherwise inferred from the shape of its source.
    pub fn for_package(&self, pkg: &Package) -> Result<Arc<dyn Manager>, ResolveError> {
        if let Some(tag) = &pkg.manager {
            return self.get(tag).ok_or_else(|| ResolveError::UnknownManager {
                manager: tag.clone(),
                package: pkg.name.clone(),
            });
        }

        let inferred = if pkg
            .source
            .as_deref()
            .is_some_and(|s| s.contains("github.com"))
        {
            "github_release"
        } else if pkg
            .source
            .as_deref()
            .is_some_and(|s| s.contains("gitlab.com"))
        {
            "gitlab_release"
        } else if pkg.extra.contains_key("group") {
            "maven"
        } else if pkg.source.as_deref().is_some_and(|s| s.starts_with("http")) {
            "web"
        } else if pkg.url_template.is_some() {
            "direct"
        } else {
            return Err(ResolveError::NoSource(pkg.name.clone()));
        };

        self.get(inferred).ok_or_else(|| ResolveError::UnknownManager {
            manager: inferred.to_string(),
            package: pkg.name.clone(),
        })
    }
}

/// Names that are never install candidates: signatures, checksum
/// documents, provenance, and docs.
pub(crate) fn is_noise_asset(name: &str) -> bool {
    let n = name.to_lowercase();
    let noisy_suffix = [
        ".asc", ".sig", ".minisig", ".pem", ".sbom", ".sig.der", ".intoto.jsonl", ".sha256",
        ".sha512", ".sha1", ".md5", ".txt", ".md", ".json", ".yaml", ".deb", ".rpm", ".apk",
        ".src.tar.gz",
    ]
    .iter()
    .any(|s| n.ends_with(s));
    noisy_suffix || n.contains("checksum") || n.contains("sha256sums") || n.contains("sbomfile")
}

/// Layered asset selection for release-hosting sources.
///
/// An explicit `asset_patterns` entry wins. Otherwise assets are filtered
/// in stages: noise names out, then OS token match, then arch token match.
/// Exactly one survivor is required; anything else is an error carrying
/// the survivor list so the registry entry can be fixed.
pub(crate) fn select_asset<'a>(
    assets: &'a [ReleaseAsset],
    pkg: &Package,
    version: &Version,
    platform: &Platform,
    ctx: &TemplateContext,
) -> Result<&'a ReleaseAsset, ResolveError> {
    let all_names = || assets.iter().map(|a| a.name.clone()).collect::<Vec<_>>();

    if let Some(pattern) = pkg.asset_pattern(platform) {
        let rendered = template::render(pattern, ctx)?;
        let matcher = glob::Pattern::new(&rendered).ok();
        let matches: Vec<&ReleaseAsset> = assets
            .iter()
            .filter(|a| match &matcher {
                Some(p) => p.matches(&a.name),
                None => a.name == rendered,
            })
            .collect();
        return match matches.as_slice() {
            [] => Err(ResolveError::NoAsset {
                package: pkg.name.clone(),
                version: version.version.clone(),
                platform: platform.key(),
                names: all_names(),
            }),
            [only] => Ok(only),
            several => Err(ResolveError::AmbiguousAsset {
                package: pkg.name.clone(),
                version: version.version.clone(),
                platform: platform.key(),
                names: several.iter().map(|a| a.name.clone()).collect(),
            }),
        };
    }

    let candidates: Vec<&ReleaseAsset> = assets
        .iter()
        .filter(|a| !is_noise_asset(&a.name))
        .filter(|a| {
            let n = a.name.to_lowercase();
            platform.os.match_tokens().iter().any(|t| n.contains(t))
                && !platform.os.veto_tokens().iter().any(|t| n.contains(t))
        })
        .filter(|a| {
            let n = a.name.to_lowercase();
            platform.arch.match_tokens().iter().any(|t| n.contains(t))
                && !platform.arch.veto_tokens().iter().any(|t| n.contains(t))
        })
        .collect();

    match candidates.as_slice() {
        [] => Err(ResolveError::NoAsset {
            package: pkg.name.clone(),
            version: version.version.clone(),
            platform: platform.key(),
            names: all_names(),
        }),
        [only] => Ok(only),
        several => Err(ResolveError::AmbiguousAsset {
            package: pkg.name.clone(),
            version: version.version.clone(),
            platform: platform.key(),
            names: several.iter().map(|a| a.name.clone()).collect(),
        }),
    }
}

/// The template environment for one `(package, version, platform)`.
pub(crate) fn template_context(
    pkg: &Package,
    version: &Version,
    platform: &Platform,
) -> TemplateContext {
    let mut ctx = TemplateContext::new(&pkg.name, &version.version, platform);
    ctx.set("tag", version.tag.clone());
    ctx.apply_lookup_tables(&pkg.templates, platform);
    ctx
}

/// Assemble a [`Resolution`], rendering every configured checksum source
/// and asserting the download URL is fully concrete.
pub(crate) fn build_resolution(
    pkg: &Package,
    version: &Version,
    platform: &Platform,
    ctx: &TemplateContext,
    download_url: String,
    asset_name: String,
) -> Result<Resolution, ResolveError> {
    // A resolution's URL must be fully concrete.
    if let Some(variable) = template::first_placeholder(&download_url) {
        return Err(ResolveError::Template(TemplateError::MissingVariable {
            variable,
            pattern: download_url,
        }));
    }

    // `checksum_file` names a sibling of the asset; `checksum_url` is a
    // full URL template.
    let checksum_url = match (&pkg.checksum_url, &pkg.checksum_file) {
        (Some(u), _) => Some(template::render(u, ctx)?),
        (None, Some(f)) => Some(crate::core::checksum::sibling_url(
            &download_url,
            &template::render(f, ctx)?,
        )),
        (None, None) => None,
    };
    let checksum_urls = pkg
        .checksum_urls
        .iter()
        .map(|u| template::render(u, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let binary_path = pkg
        .binary_path
        .as_deref()
        .map(|p| template::render(p, ctx))
        .transpose()?;

    Ok(Resolution {
        package: pkg.name.clone(),
        version: version.clone(),
        platform: *platform,
        is_archive: is_archive_name(&asset_name),
        download_url,
        checksum: pkg.checksum.clone(),
        checksum_url,
        checksum_urls,
        checksum_expr: pkg.checksum_expr.clone(),
        binary_path,
        asset_name,
    })
}

/// Shape releases for the `version_expr` context.
pub(crate) fn releases_to_json(releases: &[DiscoveredRelease]) -> serde_json::Value {
    serde_json::to_value(releases).unwrap_or(serde_json::Value::Array(Vec::new()))
}

/// Compound-aware extension of an asset name (`tar.gz`, `zip`, ...).
pub(crate) fn asset_ext(name: &str) -> String {
    let n = name.to_lowercase();
    for ext in [
        "tar.gz", "tar.xz", "tar.bz2", "tar.zst", "tgz", "txz", "tbz2", "zip", "jar", "exe",
    ] {
        if n.ends_with(&format!(".{ext}")) {
            return ext.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            url: format!("https://dl.example.com/{name}"),
        }
    }

    fn select<'a>(
        assets: &'a [ReleaseAsset],
        pkg: &Package,
        platform: &str,
    ) -> Result<&'a ReleaseAsset, ResolveError> {
        let platform: Platform = platform.parse().unwrap();
        let version = Version::exact("1.8.2");
        let ctx = template_context(pkg, &version, &platform);
        select_asset(assets, pkg, &version, &platform, &ctx)
    }

    #[test]
    fn test_select_by_explicit_pattern() {
        let assets = vec![asset("jq-linux64"), asset("jq-osx-amd64"), asset("jq-win64.exe")];
        let mut pkg = Package::named("jq");
        pkg.asset_patterns
            .insert("linux-amd64".to_string(), "jq-linux64".to_string());

        let found = select(&assets, &pkg, "linux-amd64").unwrap();
        assert_eq!(found.name, "jq-linux64");
    }

    #[test]
    fn test_select_by_templated_pattern() {
        let assets = vec![
            asset("node_exporter-1.8.2.linux-amd64.tar.gz"),
            asset("node_exporter-1.8.2.darwin-amd64.tar.gz"),
        ];
        let mut pkg = Package::named("node_exporter");
        pkg.asset_patterns.insert(
            "*".to_string(),
            "node_exporter-{version}.{os}-{arch}.tar.gz".to_string(),
        );

        let found = select(&assets, &pkg, "darwin-amd64").unwrap();
        assert_eq!(found.name, "node_exporter-1.8.2.darwin-amd64.tar.gz");
    }

    #[test]
    fn test_iterative_filter_single_survivor() {
        let assets = vec![
            asset("sha256sums.txt"),
            asset("node_exporter-1.8.2.linux-amd64.tar.gz"),
            asset("node_exporter-1.8.2.linux-arm64.tar.gz"),
            asset("node_exporter-1.8.2.darwin-amd64.tar.gz"),
            asset("node_exporter-1.8.2.linux-amd64.tar.gz.asc"),
        ];
        let pkg = Package::named("node_exporter");

        let found = select(&assets, &pkg, "linux-amd64").unwrap();
        assert_eq!(found.name, "node_exporter-1.8.2.linux-amd64.tar.gz");
    }

    #[test]
    fn test_platform_isolation() {
        // An asset that only matches another platform never gets picked.
        let assets = vec![asset("tool-1.0-darwin-arm64.tar.gz")];
        let pkg = Package::named("tool");

        assert!(matches!(
            select(&assets, &pkg, "linux-amd64"),
            Err(ResolveError::NoAsset { .. })
        ));
    }

    #[test]
    fn test_arm_does_not_match_arm64() {
        let assets = vec![
            asset("tool-linux-arm64.tar.gz"),
            asset("tool-linux-armv7.tar.gz"),
        ];
        let pkg = Package::named("tool");

        let found = select(&assets, &pkg, "linux-arm").unwrap();
        assert_eq!(found.name, "tool-linux-armv7.tar.gz");
    }

    #[test]
    fn test_windows_does_not_match_darwin() {
        let assets = vec![asset("tool-1.0-darwin-amd64.tar.gz")];
        let pkg = Package::named("tool");
        assert!(matches!(
            select(&assets, &pkg, "windows-amd64"),
            Err(ResolveError::NoAsset { .. })
        ));
    }

    #[test]
    fn test_ambiguous_survivors_error_lists_names() {
        let assets = vec![
            asset("tool-linux-amd64-gnu.tar.gz"),
            asset("tool-linux-amd64-musl.tar.gz"),
        ];
        let pkg = Package::named("tool");

        match select(&assets, &pkg, "linux-amd64") {
            Err(ResolveError::AmbiguousAsset { names, .. }) => {
                assert_eq!(names.len(), 2);
            }
            other => panic!("expected AmbiguousAsset, got {other:?}"),
        }
    }

    #[test]
    fn test_for_package_inference() {
        let registry = ManagerRegistry::with_defaults(&Client::new());

        let mut gh = Package::named("jq");
        gh.source = Some("github.com/jqlang/jq".to_string());
        assert_eq!(registry.for_package(&gh).unwrap().name(), "github_release");

        let mut gl = Package::named("glab");
        gl.source = Some("https://gitlab.com/gitlab-org/cli".to_string());
        assert_eq!(registry.for_package(&gl).unwrap().name(), "gitlab_release");

        let mut mvn = Package::named("postgres");
        mvn.extra
            .insert("group".to_string(), "io.zonky.test.postgres".to_string());
        assert_eq!(registry.for_package(&mvn).unwrap().name(), "maven");

        let mut web = Package::named("tomcat");
        web.source = Some("https://dlcdn.apache.org/tomcat/tomcat-10/".to_string());
        assert_eq!(registry.for_package(&web).unwrap().name(), "web");

        let mut direct = Package::named("terraform");
        direct.url_template = Some("https://releases.hashicorp.com/t/{version}".to_string());
        assert_eq!(registry.for_package(&direct).unwrap().name(), "direct");

        let empty = Package::named("nothing");
        assert!(matches!(
            registry.for_package(&empty),
            Err(ResolveError::NoSource(_))
        ));
    }

    #[test]
    fn test_checksum_file_becomes_sibling_url() {
        let platform: Platform = "linux-amd64".parse().unwrap();
        let version = Version::exact("1.7.1");
        let mut pkg = Package::named("jq");
        pkg.checksum_file = Some("checksums_{version}.txt".to_string());

        let ctx = template_context(&pkg, &version, &platform);
        let resolution = build_resolution(
            &pkg,
            &version,
            &platform,
            &ctx,
            "https://dl.example.com/v1.7.1/jq-linux64".to_string(),
            "jq-linux64".to_string(),
        )
        .unwrap();
        assert_eq!(
            resolution.checksum_url.as_deref(),
            Some("https://dl.example.com/v1.7.1/checksums_1.7.1.txt")
        );
    }

    #[test]
    fn test_unrendered_url_is_rejected() {
        let platform: Platform = "linux-amd64".parse().unwrap();
        let version = Version::exact("1.7.1");
        let pkg = Package::named("jq");
        let ctx = template_context(&pkg, &version, &platform);

        let err = build_resolution(
            &pkg,
            &version,
            &platform,
            &ctx,
            "https://dl.example.com/{channel}/jq".to_string(),
            "jq".to_string(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("channel"));
    }

    #[test]
    fn test_explicit_manager_tag_wins() {
        let registry = ManagerRegistry::with_defaults(&Client::new());
        let mut pkg = Package::named("tool");
        pkg.source = Some("github.com/o/r".to_string());
        pkg.manager = Some("github_tags".to_string());
        assert_eq!(registry.for_package(&pkg).unwrap().name(), "github_tags");

        pkg.manager = Some("bogus".to_string());
        assert!(matches!(
            registry.for_package(&pkg),
            Err(ResolveError::UnknownManager { .. })
        ));
    }
}
