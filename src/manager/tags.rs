//! Tag-listing backend.
//!
//! Some projects cut tags without publishing release assets. This backend
//! iterates the tag list and builds download URLs purely from the
//! package's `url_template`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template;
use crate::core::version::{Version, looks_prerelease};
use crate::manager::{Manager, ResolveError, build_resolution, template_context};

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ApiTag {
    name: String,
}

#[derive(Debug)]
pub struct TagsManager {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl TagsManager {
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
        }
    }

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
}

#[async_trait]
impl Manager for TagsManager {
    fn name(&self) -> &'static str {
        "github_tags"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        let repo = Self::repo_path(pkg)?;
        let url = format!("{}/repos/{repo}/tags?per_page={limit}", self.api_base);
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
        let tags: Vec<ApiTag> = response.json().await?;

        Ok(tags
            .into_iter()
            .map(|t| {
                let version = Version::new(&t.name, &pkg.name, false);
                let prerelease = looks_prerelease(&version.version);
                Version {
                    prerelease,
                    ..version
                }
            })
            .collect())
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, ResolveError> {
        // Tags carry no assets: the URL comes entirely from the template.
        let url_template = pkg
            .url_template
            .as_deref()
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?;

        let mut ctx = template_context(pkg, version, platform);
        if let Some(pattern) = pkg.asset_pattern(platform) {
            let asset = template::render(pattern, &ctx)?;
            ctx.set("asset", asset);
        }
        let url = template::render(url_template, &ctx)?;
        let asset_name = crate::core::checksum::url_basename(&url);

        build_resolution(pkg, version, platform, &ctx, url, asset_name)
    }
}
