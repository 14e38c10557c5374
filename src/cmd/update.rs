//! `depot update`

use std::path::Path;

use anyhow::{Result, bail};

use depot::ops::install::InstallRequest;

use crate::cmd::lock::{parse_platforms, refresh_entries};
use crate::cmd::load_context;

/// Re-discover the newest matching versions and overwrite lock entries.
pub(crate) async fn update(config: &Path, packages: &[String], platforms: &[String]) -> Result<()> {
    let ctx = load_context(config)?;
    let mut lockfile = ctx.load_lockfile()?.unwrap_or_default();

    // No names given: refresh everything already in the lock file, or
    // fall back to the configured dependency set.
    let requests: Vec<InstallRequest> = if packages.is_empty() {
        if lockfile.dependencies.is_empty() {
            ctx.requests(&[])
        } else {
            lockfile
                .dependencies
                .iter()
                .map(|dep| InstallRequest {
                    name: dep.name.clone(),
                    constraint: ctx
                        .config
                        .dependencies
                        .get(&dep.name)
                        .cloned()
                        .unwrap_or_else(|| "latest".to_string()),
                })
                .collect()
        }
    } else {
        ctx.requests(packages)
    };
    if requests.is_empty() {
        bail!("nothing to update: lock file is empty and no dependencies configured");
    }

    let platforms = if platforms.is_empty() {
        // Keep the platform coverage the lock file already has.
        let mut keys: Vec<String> = lockfile
            .dependencies
            .iter()
            .flat_map(|d| d.platforms.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        parse_platforms(&keys)?
    } else {
        parse_platforms(platforms)?
    };

    let count = refresh_entries(&ctx, &requests, &platforms, &mut lockfile).await?;
    lockfile.save(&ctx.lock_path)?;
    println!(
        "updated {count} artifact(s) across {} package(s) -> {}",
        requests.len(),
        ctx.lock_path.display()
    );
    Ok(())
}
