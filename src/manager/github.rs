//! Release-hosting backend (GitHub-style release APIs).
//!
//! Lists versioned releases of an `owner/repo`, optionally filtered by the
//! package's `version_expr`, and picks a platform asset either through an
//! explicit `asset_patterns` entry or the layered token filter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::core::expr::ExprEngine;
use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template;
use crate::core::version::Version;
use crate::manager::{
    DiscoveredRelease, Manager, ReleaseAsset, ResolveError, asset_ext, build_resolution,
    releases_to_json, select_asset, template_context,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<ApiAsset>,
}

#[derive(Debug, Deserialize)]
struct ApiAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug)]
pub struct GithubManager {
    client: Client,
    api_base: String,
    token: Option<String>,
    engine: ExprEngine,
}

impl GithubManager {
    /// Production configuration: public API, `GITHUB_TOKEN` auth when set.
    pub fn from_env(client: Client) -> Self {
        Self::new(
            client,
            DEFAULT_API_BASE.to_string(),
            std::env::var("GITHUB_TOKEN").ok(),
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

    /// `owner/repo` from sources like `github.com/jqlang/jq` or a full URL.
    fn repo_path(pkg: &Package) -> Result<String, ResolveError> {
        let source = pkg
            .source
            .as_deref()
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?;
        let trimmed = source
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("github.com/")
            .trim_end_matches('/')
            .trim_end_matches(".git");
        if trimmed.split('/').count() != 2 {
            return Err(ResolveError::NoSource(pkg.name.clone()));
        }
        Ok(trimmed.to_string())
    }

    async fn fetch_releases(
        &self,
        repo: &str,
        limit: usize,
    ) -> Result<Vec<ApiRelease>, ResolveError> {
        let url = format!("{}/repos/{repo}/releases?per_page={limit}", self.api_base);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status { status, url });
        }
        Ok(response.json().await?)
    }

    /// Discovery and resolution both need the release list; resolution
    /// re-finds the release carrying the requested tag.
    async fn find_release(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<ApiRelease, ResolveError> {
        let repo = Self::repo_path(pkg)?;
        let releases = self.fetch_releases(&repo, 100).await?;
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
}

#[async_trait]
impl Manager for GithubManager {
    fn name(&self) -> &'static str {
        "github_release"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        let repo = Self::repo_path(pkg)?;
        let releases = self.fetch_releases(&repo, limit).await?;
        let releases: Vec<ApiRelease> = releases.into_iter().filter(|r| !r.draft).collect();

        if let Some(expr) = &pkg.version_expr {
            let shaped: Vec<DiscoveredRelease> = releases
                .iter()
                .map(|r| DiscoveredRelease {
                    tag_name: r.tag_name.clone(),
                    prerelease: r.prerelease,
                    draft: r.draft,
                    assets: r
                        .assets
                        .iter()
                        .map(|a| ReleaseAsset {
                            name: a.name.clone(),
                            url: a.browser_download_url.clone(),
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
                        .is_some_and(|r| r.prerelease);
                    Version::new(&tag, &pkg.name, prerelease)
                })
                .collect());
        }

        Ok(releases
            .iter()
            .map(|r| Version::new(&r.tag_name, &pkg.name, r.prerelease))
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
            .iter()
            .map(|a| ReleaseAsset {
                name: a.name.clone(),
                url: a.browser_download_url.clone(),
            })
            .collect();

        let mut ctx = template_context(pkg, version, platform);

        // A url_template overrides the server-provided asset URL; the
        // chosen asset still feeds `{asset}`/`{ext}`.
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
