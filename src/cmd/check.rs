//! `depot check`

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use depot::core::platform::Platform;
use depot::core::version::{Constraint, Version};
use depot::ops::install::probe_installed_version;

use crate::cmd::load_context;

/// Report installed vs required versions without changing anything.
pub(crate) async fn check(config: &Path, packages: &[String], bin_dir: Option<PathBuf>) -> Result<()> {
    let ctx = load_context(config)?;
    let requests = ctx.requests(packages);
    if requests.is_empty() {
        bail!("nothing to check: no packages given and no dependencies configured");
    }

    let bin_dir = bin_dir
        .or_else(|| ctx.config.bin_dir.clone())
        .unwrap_or_else(depot::default_bin_dir);
    let platform = Platform::current();

    let mut missing = 0usize;
    let mut outdated = 0usize;
    for request in &requests {
        let Some(pkg) = ctx.registry.get(&request.name) else {
            println!("{:<20} unknown package", request.name);
            missing += 1;
            continue;
        };

        let bin_path = bin_dir.join(platform.binary_name(pkg.install_name()));
        if !bin_path.exists() {
            println!("{:<20} not installed (wanted {})", request.name, request.constraint);
            missing += 1;
            continue;
        }

        match probe_installed_version(&bin_path, pkg) {
            Some(installed) => {
                let satisfied = Constraint::parse(&request.constraint)
                    .matches(&Version::new(&installed, &pkg.name, false));
                if satisfied {
                    println!("{:<20} {installed} (ok)", request.name);
                } else {
                    println!(
                        "{:<20} {installed} (wanted {})",
                        request.name, request.constraint
                    );
                    outdated += 1;
                }
            }
            None => {
                println!("{:<20} installed, version not detectable", request.name);
            }
        }
    }

    if missing > 0 || outdated > 0 {
        bail!("{missing} missing, {outdated} outdated");
    }
    Ok(())
}
