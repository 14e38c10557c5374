//! `depot lock`

use std::path::Path;

use anyhow::{Context as _, Result, bail};

use depot::core::lockfile::{LockedArtifact, Lockfile};
use depot::core::platform::Platform;
use depot::io::download::{DownloadOptions, Downloader};
use depot::ops::Resolver;
use depot::ops::install::InstallRequest;

use crate::cmd::{Context, load_context};

pub(crate) async fn lock(config: &Path, packages: &[String], platforms: &[String]) -> Result<()> {
    let ctx = load_context(config)?;
    let requests = ctx.requests(packages);
    if requests.is_empty() {
        bail!("nothing to lock: no packages given and no dependencies configured");
    }
    let platforms = parse_platforms(platforms)?;

    let mut lockfile = ctx.load_lockfile()?.unwrap_or_default();
    let count = refresh_entries(&ctx, &requests, &platforms, &mut lockfile).await?;

    lockfile.save(&ctx.lock_path)?;
    println!(
        "locked {count} artifact(s) for {} package(s) -> {}",
        requests.len(),
        ctx.lock_path.display()
    );
    Ok(())
}

pub(crate) fn parse_platforms(keys: &[String]) -> Result<Vec<Platform>> {
    if keys.is_empty() {
        return Ok(vec![Platform::current()]);
    }
    keys.iter()
        .map(|k| k.parse::<Platform>().with_context(|| format!("bad platform key '{k}'")))
        .collect()
}

/// Resolve every `(request, platform)` pair and pin URL + checksum.
/// Resolution runs without downloading artifacts; checksums come from the
/// configured source or sibling-file discovery.
pub(crate) async fn refresh_entries(
    ctx: &Context,
    requests: &[InstallRequest],
    platforms: &[Platform],
    lockfile: &mut Lockfile,
) -> Result<usize> {
    let resolver = Resolver::new(&ctx.managers);
    let downloader = Downloader::new()?;
    let mut count = 0usize;
    let mut failures = Vec::new();

    for request in requests {
        let Some(pkg) = ctx.registry.get(&request.name) else {
            failures.push(format!("{}: not found in registry", request.name));
            continue;
        };

        for platform in platforms {
            let resolution = match resolver.resolve(pkg, &request.constraint, platform).await {
                Ok(r) => r,
                Err(e) => {
                    failures.push(format!("{} ({}): {e}", request.name, platform.key()));
                    continue;
                }
            };

            let mut checksum_urls = resolution.checksum_urls.clone();
            if let Some(url) = &resolution.checksum_url {
                checksum_urls.insert(0, url.clone());
            }
            let opts = DownloadOptions {
                checksum: resolution.checksum.clone(),
                checksum_expr: resolution.checksum_expr.clone(),
                auto_discover: !resolution.has_checksum_source(),
                checksum_urls,
                expr_vars: serde_json::json!({
                    "name": resolution.package,
                    "version": resolution.version.version,
                    "os": platform.os.to_string(),
                    "arch": platform.arch.to_string(),
                    "platform": platform.key(),
                }),
                package: resolution.package.clone(),
                version: resolution.version.version.clone(),
                ..DownloadOptions::default()
            };

            match downloader
                .discover_checksum(&resolution.download_url, &opts)
                .await
            {
                Ok(Some((checksum, _sources, override_url))) => {
                    let url = override_url.unwrap_or_else(|| resolution.download_url.clone());
                    lockfile.record(
                        &request.name,
                        &resolution.version.version,
                        platform,
                        LockedArtifact {
                            url,
                            checksum: checksum.formatted(),
                            size: None,
                        },
                    );
                    count += 1;
                }
                Ok(None) => failures.push(format!(
                    "{} ({}): no checksum discoverable; refusing to lock an unverifiable artifact",
                    request.name,
                    platform.key()
                )),
                Err(e) => failures.push(format!("{} ({}): {e}", request.name, platform.key())),
            }
        }
    }

    if !failures.is_empty() {
        bail!("lock failed for:\n  {}", failures.join("\n  "));
    }
    Ok(count)
}
