//! Platform descriptor: normalised `(os, arch)` pairs.
//!
//! Vendors spell the same platform a dozen ways (macos/darwin/osx,
//! x86_64/amd64/x64). Everything entering the system is normalised here so
//! the rest of the pipeline can compare platforms by value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("unknown operating system: {0}")]
    UnknownOs(String),

    #[error("unknown architecture: {0}")]
    UnknownArch(String),

    #[error("invalid platform key (expected <os>-<arch>): {0}")]
    InvalidKey(String),
}

/// Operating system, normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    /// Detect the OS this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::Darwin
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// Substrings that identify this OS in asset filenames, most specific
    /// first. Used by the asset filter in the release-hosting backend.
    pub fn match_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Linux => &["linux"],
            Self::Darwin => &["darwin", "macos", "apple", "osx", "mac"],
            Self::Windows => &["windows", "win64", "win32", "win"],
        }
    }

    /// Tokens that disqualify a name for this OS even when a match token
    /// is present ("darwin" contains "win").
    pub fn veto_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Windows => &["darwin"],
            Self::Linux | Self::Darwin => &[],
        }
    }
}

impl FromStr for Os {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "darwin" | "mac" | "macos" | "osx" => Ok(Self::Darwin),
            "windows" | "win" | "win32" | "win64" => Ok(Self::Windows),
            other => Err(PlatformError::UnknownOs(other.to_string())),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture, normalised. `386` is kept distinct from `amd64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    X86,
}

impl Arch {
    /// Detect the architecture this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Arm64
        } else if cfg!(target_arch = "arm") {
            Self::Arm
        } else if cfg!(target_arch = "x86") {
            Self::X86
        } else {
            Self::Amd64
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::X86 => "386",
        }
    }

    /// Substrings that identify this architecture in asset filenames.
    pub fn match_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Amd64 => &["amd64", "x86_64", "x64"],
            Self::Arm64 => &["arm64", "aarch64"],
            Self::Arm => &["armv7", "armv6", "arm"],
            Self::X86 => &["i386", "i686", "386", "x86"],
        }
    }

    /// Tokens that disqualify a name for this architecture even when a
    /// match token is present ("arm" is a substring of "arm64", "x86" of
    /// "x86_64").
    pub fn veto_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Arm => &["arm64", "aarch64"],
            Self::X86 => &["x86_64", "amd64"],
            Self::Amd64 | Self::Arm64 => &[],
        }
    }
}

impl FromStr for Arch {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Self::Amd64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "arm" | "armv6" | "armv7" => Ok(Self::Arm),
            "386" | "i386" | "i686" | "x86" => Ok(Self::X86),
            other => Err(PlatformError::UnknownArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalised `(os, arch)` pair. Renders as the platform key `<os>-<arch>`
/// used throughout configuration and the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The platform of the running process.
    pub fn current() -> Self {
        Self {
            os: Os::current(),
            arch: Arch::current(),
        }
    }

    /// The `<os>-<arch>` map key.
    pub fn key(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    pub fn is_unix(&self) -> bool {
        !self.is_windows()
    }

    /// `.exe` on Windows, empty elsewhere.
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() { ".exe" } else { "" }
    }

    /// Append the executable suffix to a bare binary name.
    pub fn binary_name(&self, name: &str) -> String {
        if self.is_windows() && !name.ends_with(".exe") {
            format!("{name}.exe")
        } else {
            name.to_string()
        }
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, arch) = s
            .split_once('-')
            .ok_or_else(|| PlatformError::InvalidKey(s.to_string()))?;
        Ok(Self {
            os: os.parse()?,
            arch: arch.parse()?,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
