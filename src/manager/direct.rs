//! Direct-URL backend.
//!
//! No discovery: the caller must name an exact version and the URL is
//! rendered from `url_template` alone. This is the escape hatch for
//! vendors with stable, versioned download layouts (HashiCorp releases,
//! dl.k8s.io, ...).

use async_trait::async_trait;

use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template;
use crate::core::version::Version;
use crate::manager::{Manager, ResolveError, build_resolution, template_context};

#[derive(Debug, Default)]
pub struct DirectManager;

impl DirectManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Manager for DirectManager {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        _limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        Err(ResolveError::ExactVersionRequired {
            package: pkg.name.clone(),
        })
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
