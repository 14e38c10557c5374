//! Release-hosting backend for GitLab.
//!
//! Same contract as the GitHub backend over GitLab's v4 releases API.
//! Project paths may be nested (`group/subgroup/project`) and are
//! percent-encoded into the URL; release assets come from the release's
//! `assets.links` list. `GITLAB_TOKEN` is sent as a `PRIVATE-TOKEN`
//! header when set.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::core::expr::ExprEngine;
use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template;
use crate::core::version::{Version, looks_prerelease};
use crate::manager::{
    DiscoveredRelease, Manager, ReleaseAsset, ResolveError, asset_ext, build_resolution,
    releases_to_json, select_asset, template_context,
};

const DEFAULT_API_BASE: &str = "https://gitlab.com/api/v4";

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default)]
    assets: ApiAssets,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAssets {
    #[serde(default)]
    links: Vec<ApiLink>,
}

#[derive(Debug, Deserialize)]
struct ApiLink {
    name: String,
    url: String,
    #[serde(default)]
    direct_asset_url: Option<String>,
}

impl ApiLink {
    /// Prefer the stable direct asset URL over the raw link target.
    fn download_url(&self) -> &str {
        self.direct_asset_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug)]
pub struct GitlabManager {
    client: Client,
    api_base: String,
    token: Option<String>,
    engine: ExprEngine,
}

impl GitlabManager {
    /// Production configuration: gitlab.com, `GITLAB_TOKEN` auth when set.
    pub fn from_env(client: Client) -> Self {
        Self::new(
            client,
            DEFAULT_API_BASE.to_string(),
            std::env::var("GITLAB_TOKEN").ok(),
        )
    }

    pub fn new(client: Client, api_base: String, token: Option<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            engine: ExprEngine::new(),
        }
    }

    /// Percent-encoded project path from sources like
    /// `gitlab.com/group/subgroup/project` or a full URL.
    fn project_path(pkg: &Package) -> Result<String, ResolveError> {
        let source = pkg
            .source
            .as_deref()
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?;
        let trimmed = source
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("gitlab.com/")
            .trim_end_matches('/')
            .trim_end_matches(".git");
        if trimmed.split('/').count() < 2 {
            return Err(ResolveError::NoSource(pkg.name.clone()));
        }
        Ok(trimmed.replace('/', "%2F"))
    }

    async fn fetch_releases(
        &self,
        project: &str,
        limit: usize,
    ) -> Result<Vec<ApiRelease>, ResolveError> {
        let url = format!(
            "{}/projects/{project}/releases?per_page={limit}",
            self.api_base
        );
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status { status, url });
        }
        Ok(response.json().await?)
    }

    async fn find_release(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<ApiRelease, ResolveError> {
        let project = Self::project_path(pkg)?;
        let releases = self.fetch_releases(&project, 100).await?;
        releases
            .into_iter()
            .find(|r| {
                r.tag_name == version.tag
                    || crate::core::version::normalize_tag(&r.tag_name, &pkg.name)
                        == version.version
            })
            .ok_or_else(|| ResolveError::NoMatchingVersion {
                package: pkg.name.clone(),
                requested: version.version.clone(),
                available: Vec::new(),
                closest: None,
            })
    }

    fn is_prerelease(pkg: &Package, release: &ApiRelease) -> bool {
        release.upcoming_release
            || looks_prerelease(&crate::core::version::normalize_tag(
                &release.tag_name,
                &pkg.name,
            ))
    }
}

#[async_trait]
impl Manager for GitlabManager {
    fn name(&self) -> &'static str {
        "gitlab_release"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        let project = Self::project_path(pkg)?;
        let releases = self.fetch_releases(&project, limit).await?;

        if let Some(expr) = &pkg.version_expr {
            let shaped: Vec<DiscoveredRelease> = releases
                .iter()
                .map(|r| DiscoveredRelease {
                    tag_name: r.tag_name.clone(),
                    prerelease: Self::is_prerelease(pkg, r),
                    draft: false,
                    assets: r
                        .assets
                        .links
                        .iter()
                        .map(|l| ReleaseAsset {
                            name: l.name.clone(),
                            url: l.download_url().to_string(),
                        })
                        .collect(),
                })
                .collect();
            let tags = self
                .engine
                .filter_versions(expr, &releases_to_json(&shaped))?;
            return Ok(tags
                .into_iter()
                .map(|tag| {
                    let prerelease = releases
                        .iter()
                        .find(|r| r.tag_name == tag)
                        .is_some_and(|r| Self::is_prerelease(pkg, r));
                    Version::new(&tag, &pkg.name, prerelease)
                })
                .collect());
        }

        Ok(releases
            .iter()
            .map(|r| Version::new(&r.tag_name, &pkg.name, Self::is_prerelease(pkg, r)))
            .collect())
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, ResolveError> {
        let release = self.find_release(pkg, version).await?;
        let assets: Vec<ReleaseAsset> = release
            .assets
            .links
            .iter()
            .map(|l| ReleaseAsset {
                name: l.name.clone(),
                url: l.download_url().to_string(),
            })
            .collect();

        let mut ctx = template_context(pkg, version, platform);

        if let Some(url_template) = &pkg.url_template {
            let asset_name = match pkg.asset_pattern(platform) {
                Some(pattern) => template::render(pattern, &ctx)?,
                None => select_asset(&assets, pkg, version, platform, &ctx)?
                    .name
                    .clone(),
            };
            ctx.set("asset", asset_name.clone());
            if ctx.get("ext").is_none() {
                ctx.set("ext", asset_ext(&asset_name));
            }
            let url = template::render(url_template, &ctx)?;
            return build_resolution(pkg, version, platform, &ctx, url, asset_name);
        }

        let asset = select_asset(&assets, pkg, version, platform, &ctx)?;
        let asset_name = asset.name.clone();
        let url = asset.url.clone();
        ctx.set("asset", asset_name.clone());
        if ctx.get("ext").is_none() {
            ctx.set("ext", asset_ext(&asset_name));
        }
        build_resolution(pkg, version, platform, &ctx, url, asset_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn package() -> Package {
        let mut pkg = Package::named("glab");
        pkg.source = Some("gitlab.com/gitlab-org/cli".to_string());
        pkg
    }

    fn releases_body() -> String {
        serde_json::json!([
            {
                "tag_name": "v1.50.0-rc1",
                "upcoming_release": true,
                "assets": { "links": [] }
            },
            {
                "tag_name": "v1.49.0",
                "upcoming_release": false,
                "assets": {
                    "links": [
                        { "name": "glab_1.49.0_linux_amd64.tar.gz",
                          "url": "https://gitlab.example.com/raw/glab_1.49.0_linux_amd64.tar.gz",
                          "direct_asset_url": "https://dl.example.com/v1.49.0/glab_1.49.0_linux_amd64.tar.gz" },
                        { "name": "glab_1.49.0_darwin_arm64.tar.gz",
                          "url": "https://dl.example.com/v1.49.0/glab_1.49.0_darwin_arm64.tar.gz" },
                        { "name": "checksums.txt",
                          "url": "https://dl.example.com/v1.49.0/checksums.txt" }
                    ]
                }
            }
        ])
        .to_string()
    }

    const RELEASES_PATH: &str = "/projects/gitlab-org%2Fcli/releases?per_page=100";

    #[tokio::test]
    async fn test_discover_versions_flags_upcoming() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/projects/gitlab-org%2Fcli/releases?per_page=50")
            .with_status(200)
            .with_body(releases_body())
            .create_async()
            .await;

        let manager = GitlabManager::new(Client::new(), server.url(), None);
        let platform: Platform = "linux-amd64".parse().unwrap();
        let versions = manager
            .discover_versions(&package(), &platform, 50)
            .await
            .unwrap();

        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, "1.50.0-rc1");
        assert!(versions[0].prerelease);
        assert_eq!(versions[1].version, "1.49.0");
        assert!(!versions[1].prerelease);
    }

    #[tokio::test]
    async fn test_resolve_selects_platform_link() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", RELEASES_PATH)
            .with_status(200)
            .with_body(releases_body())
            .create_async()
            .await;

        let manager = GitlabManager::new(Client::new(), server.url(), None);
        let platform: Platform = "linux-amd64".parse().unwrap();
        let version = Version::new("v1.49.0", "glab", false);
        let resolution = manager
            .resolve(&package(), &version, &platform)
            .await
            .unwrap();

        // The stable direct asset URL wins over the raw link target.
        assert_eq!(
            resolution.download_url,
            "https://dl.example.com/v1.49.0/glab_1.49.0_linux_amd64.tar.gz"
        );
        assert_eq!(resolution.asset_name, "glab_1.49.0_linux_amd64.tar.gz");
        assert!(resolution.is_archive);
    }

    #[tokio::test]
    async fn test_private_token_header_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/projects/gitlab-org%2Fcli/releases?per_page=10")
            .match_header("PRIVATE-TOKEN", "glpat-secret")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let manager =
            GitlabManager::new(Client::new(), server.url(), Some("glpat-secret".to_string()));
        let platform: Platform = "linux-amd64".parse().unwrap();
        // Empty release list is a NoVersions-shaped result downstream;
        // here only the header matters.
        let versions = manager
            .discover_versions(&package(), &platform, 10)
            .await
            .unwrap();
        assert!(versions.is_empty());
        mock.assert_async().await;
    }

    #[test]
    fn test_project_path_encodes_nested_groups() {
        let mut pkg = Package::named("tool");
        for source in [
            "gitlab.com/group/subgroup/tool",
            "https://gitlab.com/group/subgroup/tool",
            "https://gitlab.com/group/subgroup/tool.git",
        ] {
            pkg.source = Some(source.to_string());
            assert_eq!(
                GitlabManager::project_path(&pkg).unwrap(),
                "group%2Fsubgroup%2Ftool"
            );
        }

        pkg.source = Some("just-a-name".to_string());
        assert!(GitlabManager::project_path(&pkg).is_err());
    }
}
