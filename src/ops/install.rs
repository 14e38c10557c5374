//! Installation orchestration.
//!
//! One request runs the strict sequence resolve → download → verify →
//! extract → post-process → install → verify-version. Multiple requests
//! run concurrently in a `JoinSet`; jobs that would write the same final
//! name serialise through a name-keyed mutex, and one job failing never
//! aborts its siblings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::config::Registry;
use crate::core::lockfile::Lockfile;
use crate::core::package::{InstallMode, Package, PostStep, Resolution, is_system_installer};
use crate::core::platform::Platform;
use crate::core::template::{self, TemplateContext};
use crate::core::version::{Constraint, Version};
use crate::io::download::{DownloadOptions, DownloadOutcome, Downloader};
use crate::io::extract;
use crate::manager::ManagerRegistry;
use crate::ops::resolve::Resolver;
use crate::ops::{InstallError, InstallOutcome, Status, VerifyStatus, VersionStatus};
use crate::ui::ProgressSink;

const DEFAULT_VERSION_REGEX: &str = r"v?(\d+\.\d+\.\d+[-\w.]*)";

/// Caller-built options record; every entry point takes it explicitly.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub bin_dir: PathBuf,
    pub app_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    /// Target platform; `None` means the host.
    pub platform: Option<Platform>,
    pub force: bool,
    pub skip_checksum: bool,
    pub strict_checksum: bool,
    /// User approved handing `.pkg`/`.msi` artifacts to the system
    /// installer (requires elevation).
    pub confirm_installer: bool,
}

impl InstallOptions {
    pub fn new(bin_dir: PathBuf, app_dir: PathBuf) -> Self {
        Self {
            bin_dir,
            app_dir,
            cache_dir: None,
            platform: None,
            force: false,
            skip_checksum: false,
            strict_checksum: false,
            confirm_installer: false,
        }
    }
}

/// Per-final-name locks so two jobs never write the same binary at once.
#[derive(Debug, Clone, Default)]
struct NameLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl NameLocks {
    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("name lock map poisoned");
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// One requested install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub name: String,
    pub constraint: String,
}

impl InstallRequest {
    pub fn parse(spec: &str) -> Self {
        let (name, constraint) = crate::core::config::parse_request(spec);
        Self { name, constraint }
    }
}

#[derive(Debug)]
pub struct Installer {
    managers: Arc<ManagerRegistry>,
    downloader: Downloader,
    locks: NameLocks,
}

impl Installer {
    pub fn new(managers: ManagerRegistry) -> Result<Self, InstallError> {
        Ok(Self {
            managers: Arc::new(managers),
            downloader: Downloader::new()?,
            locks: NameLocks::default(),
        })
    }

    /// Install one package; errors are folded into a `Failed` outcome.
    pub async fn install(
        &self,
        pkg: &Package,
        constraint: &str,
        opts: &InstallOptions,
        lock: Option<&Lockfile>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> InstallOutcome {
        sink.start(&pkg.name, constraint);
        match self
            .install_inner(pkg, constraint, opts, lock, sink, cancel)
            .await
        {
            Ok(outcome) => {
                sink.success(&pkg.name, &outcome.version);
                outcome
            }
            Err(e) => {
                sink.fail(&pkg.name, &e.to_string());
                let verify_status = match &e {
                    InstallError::Download(
                        crate::io::download::DownloadError::ChecksumMismatch { .. },
                    ) => VerifyStatus::ChecksumMismatch,
                    _ => VerifyStatus::Skipped,
                };
                InstallOutcome {
                    package: pkg.name.clone(),
                    version: String::new(),
                    status: Status::Failed,
                    verify_status,
                    version_status: VersionStatus::Invalid,
                    path: None,
                    checksum_used: None,
                    checksum_sources: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Install many packages concurrently. Failures are reported per job;
    /// the remaining jobs keep running.
    pub async fn install_many(
        self: &Arc<Self>,
        requests: &[InstallRequest],
        registry: &Registry,
        opts: &InstallOptions,
        lock: Option<&Lockfile>,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Vec<InstallOutcome> {
        let mut set = tokio::task::JoinSet::new();

        for request in requests {
            let request = request.clone();
            let Some(pkg) = registry.get(&request.name).cloned() else {
                set.spawn(async move { unknown_package_outcome(&request) });
                continue;
            };
            let installer = Arc::clone(self);
            let opts = opts.clone();
            let lock = lock.cloned();
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();

            set.spawn(async move {
                installer
                    .install(
                        &pkg,
                        &request.constraint,
                        &opts,
                        lock.as_ref(),
                        sink.as_ref(),
                        &cancel,
                    )
                    .await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("install task panicked: {e}"),
            }
        }
        outcomes.sort_by(|a, b| a.package.cmp(&b.package));
        outcomes
    }

    async fn install_inner(
        &self,
        pkg: &Package,
        constraint: &str,
        opts: &InstallOptions,
        lock: Option<&Lockfile>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome, InstallError> {
        let platform = opts.platform.unwrap_or_else(Platform::current);
        let final_name = platform.binary_name(pkg.install_name());
        let bin_path = opts.bin_dir.join(&final_name);

        // 1. Existing-install probe, host platform only.
        if !opts.force
            && platform == Platform::current()
            && bin_path.exists()
            && let Some(installed) = probe_installed_version(&bin_path, pkg)
            && Constraint::parse(constraint).matches(&Version::new(&installed, &pkg.name, false))
        {
            return Ok(InstallOutcome {
                package: pkg.name.clone(),
                version: installed,
                status: Status::AlreadyInstalled,
                verify_status: VerifyStatus::Skipped,
                version_status: VersionStatus::Valid,
                path: Some(bin_path),
                checksum_used: None,
                checksum_sources: Vec::new(),
                error: None,
            });
        }

        // 2. Resolution: the lock file is authoritative when it has an
        //    entry; the registry is only consulted otherwise.
        let (resolution, replayed) = match lock_entry(lock, pkg, constraint, &platform) {
            Some(resolution) => (resolution, true),
            None => (
                Resolver::new(&self.managers)
                    .resolve(pkg, constraint, &platform)
                    .await?,
                false,
            ),
        };
        if replayed {
            tracing::debug!("{}: replaying lock entry for {}", pkg.name, platform.key());
        }

        // 3. Download into a per-install scratch directory.
        let scratch = tempfile::Builder::new().prefix("depot-").tempdir()?;
        let artifact_path = scratch.path().join(&resolution.asset_name);
        sink.set_description(&pkg.name, "downloading");
        let download = self
            .downloader
            .download(
                &resolution.download_url,
                &artifact_path,
                &download_options(&resolution, opts),
                sink,
                cancel,
            )
            .await?;
        let verify_status = if download.verified {
            VerifyStatus::ChecksumMatch
        } else {
            VerifyStatus::Skipped
        };

        // System installer packages hand off and stop here.
        if is_system_installer(&resolution.asset_name) {
            let found = extract::run_system_installer(
                &artifact_path,
                pkg.install_name(),
                &platform,
                opts.confirm_installer,
            )?;
            return Ok(self.outcome_for(
                pkg,
                &resolution,
                &download,
                verify_status,
                VersionStatus::Valid,
                found,
                opts,
            ));
        }

        // 4. Extract, or use the raw file directly.
        let workdir: PathBuf;
        if resolution.is_archive {
            sink.set_description(&pkg.name, "extracting");
            let extract_dir = scratch.path().join("extracted");
            let archive = artifact_path.clone();
            let dest = extract_dir.clone();
            tokio::task::spawn_blocking(move || extract::extract_auto(&archive, &dest))
                .await
                .map_err(|e| InstallError::Other(format!("extract task panicked: {e}")))??;
            workdir = extract_dir;
        } else {
            workdir = scratch.path().to_path_buf();
        }

        // 5. Post-process strictly synchronously; the first failing step
        //    fails the install.
        if !pkg.post_process.is_empty() {
            sink.set_description(&pkg.name, "post-processing");
            run_post_process(&workdir, pkg, &resolution, &platform).await?;
        }

        // 6. Write into the shared bin/app directories under the
        //    per-final-name lock.
        let guard_key = pkg.install_name().to_string();
        let name_lock = self.locks.lock_for(&guard_key);
        let _guard = name_lock.lock().await;

        sink.set_description(&pkg.name, "installing");
        let installed_path = match pkg.mode {
            InstallMode::File => {
                let binary = if resolution.is_archive {
                    extract::locate_binary(
                        &workdir,
                        resolution
                            .binary_path
                            .as_deref()
                            .or(pkg.binary_name.as_deref()),
                        &pkg.name,
                        &platform,
                    )?
                } else {
                    artifact_path.clone()
                };
                install_file(&binary, &bin_path, &platform)?
            }
            InstallMode::Directory => {
                install_directory(pkg, &workdir, &resolution, &platform, opts)?
            }
        };

        drop(_guard);

        // 7. Post-install version check, host platform only.
        let version_status = if platform == Platform::current() && pkg.mode == InstallMode::File {
            match probe_installed_version(&installed_path, pkg) {
                Some(reported)
                    if Constraint::parse(constraint)
                        .matches(&Version::new(&reported, &pkg.name, false))
                        || reported == resolution.version.version =>
                {
                    VersionStatus::Valid
                }
                Some(_) => VersionStatus::Invalid,
                None => VersionStatus::Invalid,
            }
        } else if platform == Platform::current() {
            VersionStatus::Valid
        } else {
            VersionStatus::UnsupportedPlatform
        };

        // 8. Scratch cleanup (also happens on every error path via Drop).
        // Directory mode may have renamed the scratch root away already.
        let _ = scratch.close();

        Ok(self.outcome_for(
            pkg,
            &resolution,
            &download,
            verify_status,
            version_status,
            Some(installed_path),
            opts,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome_for(
        &self,
        pkg: &Package,
        resolution: &Resolution,
        download: &DownloadOutcome,
        verify_status: VerifyStatus,
        version_status: VersionStatus,
        path: Option<PathBuf>,
        opts: &InstallOptions,
    ) -> InstallOutcome {
        InstallOutcome {
            package: pkg.name.clone(),
            version: resolution.version.version.clone(),
            status: if opts.force {
                Status::ForcedInstalled
            } else {
                Status::Installed
            },
            verify_status,
            version_status,
            path,
            checksum_used: download.checksum.as_ref().map(|c| c.formatted()),
            checksum_sources: download.checksum_sources.clone(),
            error: None,
        }
    }
}

fn unknown_package_outcome(request: &InstallRequest) -> InstallOutcome {
    InstallOutcome {
        package: request.name.clone(),
        version: String::new(),
        status: Status::Failed,
        verify_status: VerifyStatus::Skipped,
        version_status: VersionStatus::Invalid,
        path: None,
        checksum_used: None,
        checksum_sources: Vec::new(),
        error: Some(format!("package {} not found in registry", request.name)),
    }
}

/// Build a resolution from a lock entry when one applies to this request.
fn lock_entry(
    lock: Option<&Lockfile>,
    pkg: &Package,
    constraint: &str,
    platform: &Platform,
) -> Option<Resolution> {
    let lock = lock?;
    let dep = lock.find(&pkg.name)?;
    let locked_version = Version::exact(&dep.version);
    if !Constraint::parse(constraint).matches(&locked_version) {
        return None;
    }
    let artifact = dep.platforms.get(&platform.key())?;

    let asset_name = crate::core::checksum::url_basename(&artifact.url);
    Some(Resolution {
        package: pkg.name.clone(),
        version: locked_version,
        platform: *platform,
        download_url: artifact.url.clone(),
        checksum: Some(artifact.checksum.clone()),
        checksum_url: None,
        checksum_urls: Vec::new(),
        checksum_expr: None,
        is_archive: crate::core::package::is_archive_name(&asset_name),
        binary_path: pkg.binary_path.clone(),
        asset_name,
    })
}

fn download_options(resolution: &Resolution, opts: &InstallOptions) -> DownloadOptions {
    let mut checksum_urls = resolution.checksum_urls.clone();
    if let Some(url) = &resolution.checksum_url {
        checksum_urls.insert(0, url.clone());
    }
    DownloadOptions {
        checksum: resolution.checksum.clone(),
        checksum_expr: resolution.checksum_expr.clone(),
        auto_discover: !resolution.has_checksum_source(),
        checksum_urls,
        cache_dir: opts.cache_dir.clone(),
        expr_vars: expr_vars(resolution),
        package: resolution.package.clone(),
        version: resolution.version.version.clone(),
        strict_checksum: opts.strict_checksum,
        skip_checksum: opts.skip_checksum,
    }
}

fn expr_vars(resolution: &Resolution) -> serde_json::Value {
    serde_json::json!({
        "name": resolution.package,
        "version": resolution.version.version,
        "os": resolution.platform.os.to_string(),
        "arch": resolution.platform.arch.to_string(),
        "platform": resolution.platform.key(),
    })
}

async fn run_post_process(
    workdir: &Path,
    pkg: &Package,
    resolution: &Resolution,
    _platform: &Platform,
) -> Result<(), InstallError> {
    let steps: Vec<PostStep> = pkg.post_process.clone();
    let vars = expr_vars(resolution);
    let root = workdir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let engine = crate::core::expr::ExprEngine::new();
        crate::io::postprocess::run_pipeline(&root, &steps, &vars, &engine)
    })
    .await
    .map_err(|e| InstallError::Other(format!("post-process task panicked: {e}")))??;
    Ok(())
}

/// Copy the selected binary into the bin directory atomically and mark it
/// executable.
fn install_file(
    binary: &Path,
    bin_path: &Path,
    platform: &Platform,
) -> Result<PathBuf, InstallError> {
    if let Some(parent) = bin_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staged = bin_path.with_file_name(format!(
        ".{}.tmp",
        bin_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "binary".to_string())
    ));
    std::fs::copy(binary, &staged)?;

    #[cfg(unix)]
    if platform.is_unix() {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = platform;

    if let Err(e) = std::fs::rename(&staged, bin_path) {
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }
    Ok(bin_path.to_path_buf())
}

/// Move the whole extracted tree under the app directory and create the
/// configured symlinks in the bin directory.
fn install_directory(
    pkg: &Package,
    workdir: &Path,
    resolution: &Resolution,
    platform: &Platform,
    opts: &InstallOptions,
) -> Result<PathBuf, InstallError> {
    let app_root = opts.app_dir.join(&pkg.name);
    if app_root.exists() {
        std::fs::remove_dir_all(&app_root)?;
    }
    if let Some(parent) = app_root.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if std::fs::rename(workdir, &app_root).is_err() {
        let mut options = fs_extra::dir::CopyOptions::new();
        options.copy_inside = true;
        options.overwrite = true;
        fs_extra::dir::move_dir(workdir, &app_root, &options)
            .map_err(|e| InstallError::Other(format!("moving app tree failed: {e}")))?;
    }

    std::fs::create_dir_all(&opts.bin_dir)?;
    let ctx = TemplateContext::new(&pkg.name, &resolution.version.version, platform);
    for spec in &pkg.symlinks {
        let pattern = app_root.join(template::render(&spec.from, &ctx)?);
        let matches = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| InstallError::Other(format!("bad symlink glob {}: {e}", spec.from)))?;

        for target in matches.flatten() {
            if !target.is_file() {
                continue;
            }
            let base = target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut link_ctx = ctx.clone();
            link_ctx.set("name", base);
            let link_name = template::render(&spec.to, &link_ctx)?;
            let link_path = opts.bin_dir.join(platform.binary_name(&link_name));

            if link_path.exists() || link_path.is_symlink() {
                std::fs::remove_file(&link_path)?;
            }
            make_link(&target, &link_path)?;
        }
    }

    Ok(app_root)
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    // Symlinks need privileges on Windows; a copy is good enough.
    std::fs::copy(target, link).map(|_| ())
}

/// Run the installed binary's version command and extract a version from
/// its output.
pub fn probe_installed_version(path: &Path, pkg: &Package) -> Option<String> {
    let command = pkg.version_command.as_deref().unwrap_or("--version");
    let output = std::process::Command::new(path)
        .args(command.split_whitespace())
        .output()
        .ok()?;

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let pattern = pkg.version_regex.as_deref().unwrap_or(DEFAULT_VERSION_REGEX);
    let re = regex::Regex::new(pattern).ok()?;
    let captures = re.captures(&text)?;
    captures
        .get(1)
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().trim_start_matches('v').to_string())
}

/// Warn when the bin directory is not on `PATH` or installed names are
/// shadowed by other copies.
pub fn path_hygiene_warnings(names: &[String], bin_dir: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    let path_env = std::env::var_os("PATH").unwrap_or_default();
    let on_path = std::env::split_paths(&path_env).any(|p| p == bin_dir);

    if !on_path {
        warnings.push(format!(
            "{} is not in your PATH; add: export PATH=\"{}:$PATH\"",
            bin_dir.display(),
            bin_dir.display()
        ));
    }

    for name in names {
        if let Ok(found) = which::which(name)
            && !found.starts_with(bin_dir)
        {
            warnings.push(format!(
                "'{name}' is shadowed by another copy at {}",
                found.display()
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lockfile::LockedArtifact;

    #[test]
    fn test_install_request_parse() {
        let request = InstallRequest::parse("jq@1.6");
        assert_eq!(request.name, "jq");
        assert_eq!(request.constraint, "1.6");

        let request = InstallRequest::parse("jq");
        assert_eq!(request.constraint, "latest");
    }

    #[test]
    fn test_lock_entry_replay() {
        let platform: Platform = "linux-amd64".parse().unwrap();
        let mut lock = Lockfile::default();
        lock.record(
            "jq",
            "1.7.1",
            &platform,
            LockedArtifact {
                url: "https://dl.example.com/jq-1.7.1/jq-linux64".to_string(),
                checksum: format!("sha256:{}", "a".repeat(64)),
                size: None,
            },
        );

        let pkg = Package::named("jq");
        let resolution = lock_entry(Some(&lock), &pkg, "latest", &platform).unwrap();
        assert_eq!(resolution.version.version, "1.7.1");
        assert_eq!(
            resolution.download_url,
            "https://dl.example.com/jq-1.7.1/jq-linux64"
        );
        assert_eq!(
            resolution.checksum.as_deref(),
            Some(&format!("sha256:{}", "a".repeat(64))[..])
        );
        assert!(!resolution.is_archive);

        // A constraint the locked version does not satisfy ignores the
        // lock and falls through to live resolution.
        assert!(lock_entry(Some(&lock), &pkg, "2.0.0", &platform).is_none());

        // Platforms without a recorded artifact are not replayed.
        let other: Platform = "darwin-arm64".parse().unwrap();
        assert!(lock_entry(Some(&lock), &pkg, "latest", &other).is_none());
    }

    #[test]
    fn test_download_options_auto_discovery_only_without_sources() {
        let platform: Platform = "linux-amd64".parse().unwrap();
        let mut resolution = Resolution {
            package: "jq".to_string(),
            version: Version::exact("1.7.1"),
            platform,
            download_url: "https://dl/jq".to_string(),
            checksum: None,
            checksum_url: None,
            checksum_urls: Vec::new(),
            checksum_expr: None,
            is_archive: false,
            binary_path: None,
            asset_name: "jq".to_string(),
        };
        let opts = InstallOptions::new(PathBuf::from("/b"), PathBuf::from("/a"));

        assert!(download_options(&resolution, &opts).auto_discover);

        resolution.checksum_url = Some("https://dl/sums".to_string());
        let options = download_options(&resolution, &opts);
        assert!(!options.auto_discover);
        assert_eq!(options.checksum_urls, vec!["https://dl/sums".to_string()]);
    }

    #[test]
    fn test_install_file_atomic_and_executable() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src-binary");
        std::fs::write(&src, b"payload").unwrap();
        let bin_dir = dir.path().join("bin");
        let dest = bin_dir.join("tool");

        let platform: Platform = "linux-amd64".parse().unwrap();
        let installed = install_file(&src, &dest, &platform).unwrap();
        assert_eq!(installed, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        // No staging file left behind.
        assert!(!bin_dir.join(".tool.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_install_directory_with_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let platform: Platform = "linux-amd64".parse().unwrap();

        // Simulate an extracted postgres-style tree.
        let workdir = dir.path().join("scratch");
        std::fs::create_dir_all(workdir.join("pgsql/bin")).unwrap();
        std::fs::write(workdir.join("pgsql/bin/postgres"), b"pg").unwrap();
        std::fs::write(workdir.join("pgsql/bin/psql"), b"psql").unwrap();

        let mut pkg = Package::named("postgres");
        pkg.mode = InstallMode::Directory;
        pkg.symlinks = vec![crate::core::package::SymlinkSpec {
            from: "pgsql/bin/*".to_string(),
            to: "{name}".to_string(),
        }];

        let resolution = Resolution {
            package: "postgres".to_string(),
            version: Version::exact("16.1.0"),
            platform,
            download_url: "https://repo/pg.jar".to_string(),
            checksum: None,
            checksum_url: None,
            checksum_urls: Vec::new(),
            checksum_expr: None,
            is_archive: true,
            binary_path: None,
            asset_name: "pg.jar".to_string(),
        };

        let mut opts =
            InstallOptions::new(dir.path().join("bin"), dir.path().join("app"));
        opts.platform = Some(platform);

        let app_root = install_directory(&pkg, &workdir, &resolution, &platform, &opts).unwrap();
        assert_eq!(app_root, dir.path().join("app/postgres"));
        assert!(app_root.join("pgsql/bin/postgres").exists());
        assert!(app_root.join("pgsql/bin/psql").exists());

        #[cfg(unix)]
        {
            let postgres_link = dir.path().join("bin/postgres");
            let psql_link = dir.path().join("bin/psql");
            assert!(postgres_link.is_symlink());
            assert!(psql_link.is_symlink());
            assert_eq!(
                std::fs::read_link(&postgres_link).unwrap(),
                app_root.join("pgsql/bin/postgres")
            );
        }
    }

    #[test]
    fn test_probe_version_parses_common_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tool");
        std::fs::write(&script, "#!/bin/sh\necho 'fake-tool version 1.7.1'\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let pkg = Package::named("fake-tool");
            assert_eq!(
                probe_installed_version(&script, &pkg).as_deref(),
                Some("1.7.1")
            );
        }
    }
}
