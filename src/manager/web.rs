//! Archive-index backend.
//!
//! Scrapes an Apache-style HTML directory listing for version
//! subdirectories. The download URL comes from `url_template`; the index
//! only provides the version list.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template;
use crate::core::version::{Version, looks_prerelease, parse_semverish};
use crate::manager::{Manager, ResolveError, build_resolution, template_context};

#[derive(Debug)]
pub struct WebManager {
    client: Client,
}

impl WebManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Pull version directory names out of an index page. Deduplicated and
/// sorted descending so the newest version comes first.
fn parse_index(body: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("a").expect("static selector");

    let mut versions: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        let candidate = element
            .value()
            .attr("href")
            .unwrap_or_default()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_start_matches('v');
        if candidate.is_empty() {
            continue;
        }
        if looks_like_version(candidate) && !versions.iter().any(|v| v == candidate) {
            versions.push(candidate.to_string());
        }
    }

    versions.sort_by(|a, b| match (parse_semverish(a), parse_semverish(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => b.cmp(a),
    });
    versions
}

/// `10.1.33`, `1.2.3-rc1`, `2.0` — digits and dots first, optional suffix.
fn looks_like_version(s: &str) -> bool {
    let (core, _suffix) = s.split_once(['-', '_']).unwrap_or((s, ""));
    let mut parts = 0;
    for part in core.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts >= 2
}

#[async_trait]
impl Manager for WebManager {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        let index_url = pkg
            .source
            .as_deref()
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?;

        let response = self
            .client
            .get(index_url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                status,
                url: index_url.to_string(),
            });
        }
        let body = response.text().await?;

        let versions = parse_index(&body);
        if versions.is_empty() {
            return Err(ResolveError::Metadata {
                url: index_url.to_string(),
                message: "no version directories found in index".to_string(),
            });
        }

        Ok(versions
            .into_iter()
            .take(limit)
            .map(|v| {
                let prerelease = looks_prerelease(&v);
                Version {
                    version: v.clone(),
                    tag: v,
                    prerelease,
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
