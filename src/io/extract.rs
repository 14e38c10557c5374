//! Archive extraction.
//!
//! Format detection goes by extension, compound extensions first
//! (`.tar.gz` before `.gz`). Extraction always targets a scratch directory
//! that is cleaned beforehand; entries overwrite whatever is already there.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

use crate::core::platform::Platform;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("no executable found in {dir} (hint: {hint})")]
    NoBinary { dir: PathBuf, hint: String },

    #[error("selected binary {0} is not a usable executable")]
    BadBinary(PathBuf),

    #[error("system installer {path} requires confirmation (rerun with --confirm-installer)")]
    InstallerNotConfirmed { path: PathBuf },

    #[error("system installer failed: {0}")]
    InstallerFailed(String),
}

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Tar,
    Zip,
    /// Java archives are zip files with a different suffix.
    Jar,
    /// macOS flat package; handed to the system installer.
    Pkg,
    /// Windows installer; handed to msiexec.
    Msi,
    RawBinary,
}

impl ArchiveFormat {
    pub fn is_archive(self) -> bool {
        !matches!(self, Self::RawBinary | Self::Pkg | Self::Msi)
    }

    pub fn is_system_installer(self) -> bool {
        matches!(self, Self::Pkg | Self::Msi)
    }
}

/// Detect archive format from a file name or path.
pub fn detect_format(path: &Path) -> ArchiveFormat {
    let name = path.to_string_lossy().to_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        ArchiveFormat::TarXz
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        ArchiveFormat::TarBz2
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        ArchiveFormat::TarZst
    } else if name.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if name.ends_with(".zip") {
        ArchiveFormat::Zip
    } else if name.ends_with(".jar") {
        ArchiveFormat::Jar
    } else if name.ends_with(".pkg") {
        ArchiveFormat::Pkg
    } else if name.ends_with(".msi") {
        ArchiveFormat::Msi
    } else {
        ArchiveFormat::RawBinary
    }
}

/// Information about an extracted file.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to the extraction root.
    pub relative_path: PathBuf,
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Whether the entry carried an executable bit.
    pub is_executable: bool,
}

/// Extract `archive_path` into `dest_dir`, auto-detecting the format.
///
/// The destination is removed and recreated first so repeated extractions
/// cannot interleave stale files with fresh ones.
pub fn extract_auto(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    if dest_dir.exists() {
        fs::remove_dir_all(dest_dir)?;
    }
    extract_into(archive_path, dest_dir)
}

/// Extract without pre-cleaning; used by the post-process `unarchive`
/// function where siblings must survive.
pub fn extract_into(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    match detect_format(archive_path) {
        ArchiveFormat::TarGz => {
            let file = File::open(archive_path)?;
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir)
        }
        ArchiveFormat::TarXz => {
            let file = File::open(archive_path)?;
            let decoder = liblzma::read::XzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir)
        }
        ArchiveFormat::TarBz2 => {
            let file = File::open(archive_path)?;
            let decoder = bzip2::read::BzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir)
        }
        ArchiveFormat::TarZst => {
            let file = File::open(archive_path)?;
            let decoder = zstd::stream::Decoder::new(BufReader::new(file))
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            extract_tar(decoder, dest_dir)
        }
        ArchiveFormat::Tar => {
            let file = File::open(archive_path)?;
            extract_tar(BufReader::new(file), dest_dir)
        }
        ArchiveFormat::Zip | ArchiveFormat::Jar => extract_zip(archive_path, dest_dir),
        ArchiveFormat::Pkg | ArchiveFormat::Msi => Err(ExtractError::UnsupportedFormat(
            "system installers are not extracted; use the installer handoff".to_string(),
        )),
        ArchiveFormat::RawBinary => {
            fs::create_dir_all(dest_dir)?;
            let filename = archive_path
                .file_name()
                .ok_or_else(|| ExtractError::Archive("invalid filename".to_string()))?;
            let dest_path = dest_dir.join(filename);
            fs::copy(archive_path, &dest_path)?;
            Ok(vec![ExtractedFile {
                relative_path: PathBuf::from(filename),
                absolute_path: dest_path,
                is_executable: true,
            }])
        }
    }
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    let mut extracted_files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?;

        if entry.header().entry_type().is_dir() {
            continue;
        }

        let relative_path: PathBuf = entry_path.components().collect();
        let absolute_path = dest_dir.join(&relative_path);

        // Reject entries that escape the destination (tar slip).
        if !absolute_path.starts_with(dest_dir) {
            return Err(ExtractError::Archive(format!(
                "invalid path in archive: {}",
                relative_path.display()
            )));
        }

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }

        entry.unpack(&absolute_path)?;

        let is_executable = entry
            .header()
            .mode()
            .map(|m| m & 0o111 != 0)
            .unwrap_or(false);

        extracted_files.push(ExtractedFile {
            relative_path,
            absolute_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let relative_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };

        if file.is_dir() {
            fs::create_dir_all(dest_dir.join(&relative_path))?;
            continue;
        }

        let absolute_path = dest_dir.join(&relative_path);
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        let is_executable = if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
            mode & 0o111 != 0
        } else {
            false
        };
        #[cfg(not(unix))]
        let is_executable = false;

        extracted_files.push(ExtractedFile {
            relative_path,
            absolute_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

/// Locate the primary binary inside an extracted tree.
///
/// Tries the configured hint first (full relative path, then its flat
/// basename). Otherwise walks the tree collecting files with any
/// executable bit: a single survivor wins; with several, one whose
/// basename matches the hint or package name is preferred.
pub fn locate_binary(
    scratch: &Path,
    binary_path: Option<&str>,
    package_name: &str,
    platform: &Platform,
) -> Result<PathBuf, ExtractError> {
    if let Some(hint) = binary_path {
        let direct = scratch.join(hint);
        if direct.is_file() {
            return verify_binary(direct, platform);
        }
        if let Some(base) = Path::new(hint).file_name() {
            let flat = scratch.join(base);
            if flat.is_file() {
                return verify_binary(flat, platform);
            }
        }
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(scratch).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if is_executable_file(entry.path(), platform) {
            candidates.push(entry.path().to_path_buf());
        }
    }

    match candidates.len() {
        0 => Err(ExtractError::NoBinary {
            dir: scratch.to_path_buf(),
            hint: binary_path.unwrap_or(package_name).to_string(),
        }),
        1 => verify_binary(candidates.remove(0), platform),
        _ => {
            let wanted: Vec<String> = binary_path
                .iter()
                .map(|h| {
                    Path::new(h)
                        .file_name()
                        .map_or_else(|| (*h).to_string(), |b| b.to_string_lossy().to_string())
                })
                .chain([
                    package_name.to_string(),
                    platform.binary_name(package_name),
                ])
                .collect();

            let preferred = candidates
                .iter()
                .find(|c| {
                    c.file_name()
                        .is_some_and(|f| wanted.iter().any(|w| f.to_string_lossy() == *w))
                })
                .cloned()
                .unwrap_or_else(|| candidates.remove(0));
            verify_binary(preferred, platform)
        }
    }
}

fn is_executable_file(path: &Path, platform: &Platform) -> bool {
    if platform.is_windows() {
        return path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("exe"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        false
    }
}

/// Confirm the selection is a usable executable: a regular, non-empty
/// file, with an executable bit on POSIX targets.
fn verify_binary(path: PathBuf, platform: &Platform) -> Result<PathBuf, ExtractError> {
    let meta = fs::metadata(&path).map_err(|_| ExtractError::BadBinary(path.clone()))?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(ExtractError::BadBinary(path));
    }
    if platform.is_unix() && !is_executable_file(&path, platform) {
        return Err(ExtractError::BadBinary(path));
    }
    Ok(path)
}

/// Hand a `.pkg`/`.msi` off to the platform installer. Requires the caller
/// to have collected explicit confirmation: these run with elevated
/// privileges and install outside depot's directories.
pub fn run_system_installer(
    path: &Path,
    package_name: &str,
    platform: &Platform,
    confirmed: bool,
) -> Result<Option<PathBuf>, ExtractError> {
    if !confirmed {
        return Err(ExtractError::InstallerNotConfirmed {
            path: path.to_path_buf(),
        });
    }

    let status = match detect_format(path) {
        ArchiveFormat::Pkg => std::process::Command::new("sudo")
            .args(["installer", "-pkg"])
            .arg(path)
            .args(["-target", "/"])
            .status(),
        ArchiveFormat::Msi => std::process::Command::new("msiexec")
            .arg("/i")
            .arg(path)
            .args(["/qn", "/norestart"])
            .status(),
        other => {
            return Err(ExtractError::UnsupportedFormat(format!("{other:?}")));
        }
    }
    .map_err(|e| ExtractError::InstallerFailed(e.to_string()))?;

    if !status.success() {
        return Err(ExtractError::InstallerFailed(format!(
            "installer exited with {status}"
        )));
    }

    // Best effort: the installer decides the destination, so probe the
    // usual locations for the binary it should have produced.
    let name = platform.binary_name(package_name);
    let well_known = [
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("C:\\Program Files"),
    ];
    for dir in well_known {
        let candidate = dir.join(&name);
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
