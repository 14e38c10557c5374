//! `depot install`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;

use depot::core::platform::Platform;
use depot::ops::install::{InstallOptions, Installer, path_hygiene_warnings};
use depot::ops::Status;
use depot::ui::ConsoleSink;

use crate::cmd::load_context;

pub(crate) struct Args {
    pub config: PathBuf,
    pub quiet: bool,
    pub packages: Vec<String>,
    pub bin_dir: Option<PathBuf>,
    pub app_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub force: bool,
    pub skip_checksum: bool,
    pub strict_checksum: bool,
    pub confirm_installer: bool,
    pub platform: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub no_lock: bool,
}

pub(crate) async fn install(args: Args) -> Result<()> {
    let ctx = load_context(&args.config)?;
    let requests = ctx.requests(&args.packages);
    if requests.is_empty() {
        bail!("nothing to install: no packages given and no dependencies configured");
    }

    let platform = target_platform(args.platform.as_deref(), args.os.as_deref(), args.arch.as_deref())?;
    let bin_dir = args
        .bin_dir
        .or_else(|| ctx.config.bin_dir.clone())
        .unwrap_or_else(depot::default_bin_dir);
    let app_dir = args
        .app_dir
        .or_else(|| ctx.config.app_dir.clone())
        .unwrap_or_else(depot::default_app_dir);
    let cache_dir = args
        .cache_dir
        .or_else(|| ctx.config.cache_dir.clone())
        .unwrap_or_else(depot::default_cache_dir);

    let mut opts = InstallOptions::new(bin_dir.clone(), app_dir);
    opts.cache_dir = Some(cache_dir);
    opts.platform = platform;
    opts.force = args.force;
    opts.skip_checksum = args.skip_checksum;
    opts.strict_checksum = args.strict_checksum;
    opts.confirm_installer = args.confirm_installer;

    let lock = if args.no_lock {
        None
    } else {
        ctx.load_lockfile()?
    };

    // Cancel in-flight jobs cleanly on Ctrl-C.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let installer = Arc::new(Installer::new(ctx.managers.clone())?);
    let sink = Arc::new(ConsoleSink::new(args.quiet));
    let outcomes = installer
        .install_many(&requests, &ctx.registry, &opts, lock.as_ref(), sink, &cancel)
        .await;

    let mut failures = Vec::new();
    let mut installed_names = Vec::new();
    for outcome in &outcomes {
        match outcome.status {
            Status::Failed => failures.push(format!(
                "{}: {}",
                outcome.package,
                outcome.error.as_deref().unwrap_or("unknown error")
            )),
            Status::AlreadyInstalled => {
                if !args.quiet {
                    println!("{} {} already installed", outcome.package, outcome.version);
                }
            }
            Status::Installed | Status::ForcedInstalled => {
                installed_names.push(outcome.package.clone());
                if !args.quiet {
                    println!(
                        "installed {} {} -> {}",
                        outcome.package,
                        outcome.version,
                        outcome
                            .path
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    if !args.quiet {
        for warning in path_hygiene_warnings(&installed_names, &bin_dir) {
            eprintln!("warning: {warning}");
        }
    }

    if !failures.is_empty() {
        bail!("{} install(s) failed:\n  {}", failures.len(), failures.join("\n  "));
    }
    Ok(())
}

fn target_platform(
    platform: Option<&str>,
    os: Option<&str>,
    arch: Option<&str>,
) -> Result<Option<Platform>> {
    if let Some(key) = platform {
        return Ok(Some(key.parse()?));
    }
    match (os, arch) {
        (None, None) => Ok(None),
        (os, arch) => {
            let host = Platform::current();
            let os = os.map(str::parse).transpose()?.unwrap_or(host.os);
            let arch = arch.map(str::parse).transpose()?.unwrap_or(host.arch);
            Ok(Some(Platform::new(os, arch)))
        }
    }
}
