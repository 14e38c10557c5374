//! Checksum parsing, hashing, and discovery.
//!
//! Upstream projects publish checksums in a handful of ad-hoc formats:
//! GoReleaser `checksums.txt`, HashiCorp-style `<product>_<version>_SHA256SUMS`,
//! per-asset `.sha256` siblings, multi-hash lines, and a YAML variant used by
//! the Kubernetes envtest releases. This module parses all of them into a
//! single [`Checksum`] value and computes digests for local files.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("unknown hash type: {0}")]
    UnknownType(String),

    #[error("invalid {hash_type} checksum '{value}': expected {expected} hex characters")]
    InvalidHex {
        hash_type: HashType,
        value: String,
        expected: usize,
    },

    #[error("checksum '{0}' has no recognisable type prefix or hex length")]
    Unrecognised(String),

    #[error("checksum for '{target}' not found in {file}")]
    NotFound { target: String, file: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Supported digest algorithms. SHA-256 is the default everywhere a type
/// is not spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Number of hex characters in a digest of this type.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Infer the type from a bare hex digest's length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            96 => Some(Self::Sha384),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, ChecksumError> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha384" | "sha-384" => Ok(Self::Sha384),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(ChecksumError::UnknownType(other.to_string())),
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Hash a whole file, streaming.
    pub fn hash_file(self, path: &Path) -> Result<String, ChecksumError> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = self.hasher();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    }

    pub fn hash_bytes(self, bytes: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finalize_hex()
    }
}

impl Default for HashType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental digest over any supported algorithm.
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Md5(_) => "md5",
            Self::Sha1(_) => "sha1",
            Self::Sha256(_) => "sha256",
            Self::Sha384(_) => "sha384",
            Self::Sha512(_) => "sha512",
        };
        f.debug_tuple("Hasher").field(&name).finish()
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A typed digest: algorithm plus lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub hash_type: HashType,
    pub hex: String,
}

impl Checksum {
    pub fn new(hash_type: HashType, hex: impl Into<String>) -> Result<Self, ChecksumError> {
        let hex = hex.into().trim().to_lowercase();
        if hex.len() != hash_type.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::InvalidHex {
                hash_type,
                value: hex,
                expected: hash_type.hex_len(),
            });
        }
        Ok(Self { hash_type, hex })
    }

    /// Strict parser: requires the `<type>:<hex>` form. Bare hex is
    /// rejected so callers that need an unambiguous type fail loudly.
    pub fn parse_with_type(s: &str) -> Result<Self, ChecksumError> {
        let s = s.trim();
        let (prefix, hex) = s
            .split_once(':')
            .ok_or_else(|| ChecksumError::Unrecognised(s.to_string()))?;
        Self::new(HashType::parse(prefix)?, hex)
    }

    /// Lenient parser: accepts `<type>:<hex>` or bare hex with the type
    /// inferred from length.
    pub fn parse(s: &str) -> Result<Self, ChecksumError> {
        let s = s.trim();
        if let Some((prefix, hex)) = s.split_once(':') {
            return Self::new(HashType::parse(prefix)?, hex);
        }
        let hash_type = HashType::from_hex_len(s.len())
            .ok_or_else(|| ChecksumError::Unrecognised(s.to_string()))?;
        Self::new(hash_type, s)
    }

    /// Case-insensitive comparison against a bare hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex.trim())
    }

    /// `<type>:<hex>`, the canonical form recorded in lock files.
    pub fn formatted(&self) -> String {
        format!("{}:{}", self.hash_type, self.hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

/// Last path segment of a URL, with any query string stripped.
pub fn url_basename(url: &str) -> String {
    let no_query = url.split(['?', '#']).next().unwrap_or(url);
    no_query
        .rsplit('/')
        .next()
        .unwrap_or(no_query)
        .to_string()
}

/// Replace the last path segment of `url` with `sibling`.
pub fn sibling_url(url: &str, sibling: &str) -> String {
    let no_query = url.split(['?', '#']).next().unwrap_or(url);
    match no_query.rfind('/') {
        Some(idx) => format!("{}/{}", &no_query[..idx], sibling),
        None => sibling.to_string(),
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a checksum document and find the entry for `file_url`'s basename.
///
/// Recognised layouts, in order:
/// 1. the envtest YAML variant (`releases.<version>.<file>.hash`);
/// 2. a single-line pure-checksum file;
/// 3. GoReleaser/HashiCorp lines: `<hex>  [*]<name>`;
/// 4. multi-hash lines: `<name> <hex1> <hex2> …` (preferred type order
///    SHA-256, SHA-1, SHA-512, MD5).
pub fn parse_checksum_file(content: &str, file_url: &str) -> Result<Checksum, ChecksumError> {
    let target = url_basename(file_url);

    if content.contains("releases:") && content.contains("hash:") && content.contains("selfLink:")
    {
        if let Some(found) = parse_envtest_yaml(content, &target) {
            return Ok(found);
        }
        return Err(ChecksumError::NotFound {
            target,
            file: file_url.to_string(),
        });
    }

    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if let [only] = lines.as_slice()
        && !only.contains(char::is_whitespace)
    {
        return Checksum::parse(only);
    }

    for line in &lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }

        // GoReleaser / coreutils layout: hex first, filename second
        // (optionally prefixed with '*' for binary mode).
        if is_hex(fields[0]) && HashType::from_hex_len(fields[0].len()).is_some() {
            let name = fields[1].trim_start_matches('*').trim_start_matches("./");
            if name == target
                && let Ok(found) = Checksum::parse(fields[0])
            {
                return Ok(found);
            }
            continue;
        }

        // Multi-hash layout: filename first, then one digest per type.
        let name = fields[0].trim_start_matches("./");
        if name == target {
            let mut by_type: Vec<Checksum> = fields[1..]
                .iter()
                .filter(|f| is_hex(f))
                .filter_map(|f| Checksum::parse(f).ok())
                .collect();
            by_type.sort_by_key(|c| match c.hash_type {
                HashType::Sha256 => 0,
                HashType::Sha1 => 1,
                HashType::Sha512 => 2,
                HashType::Md5 => 3,
                HashType::Sha384 => 4,
            });
            if let Some(found) = by_type.into_iter().next() {
                return Ok(found);
            }
        }
    }

    Err(ChecksumError::NotFound {
        target,
        file: file_url.to_string(),
    })
}

fn parse_envtest_yaml(content: &str, target: &str) -> Option<Checksum> {
    let doc: serde_norway::Value = serde_norway::from_str(content).ok()?;
    let releases = doc.get("releases")?.as_mapping()?;
    for (_, files) in releases {
        let Some(files) = files.as_mapping() else {
            continue;
        };
        for (name, meta) in files {
            if name.as_str() == Some(target)
                && let Some(hash) = meta.get("hash").and_then(|h| h.as_str())
            {
                return Checksum::parse(hash).ok();
            }
        }
    }
    None
}

/// One place a checksum might be published for a given asset URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverySource {
    /// GoReleaser convention: `checksums.txt` alongside the asset.
    GoReleaser { url: String },
    /// HashiCorp convention: `<product>_<version>_SHA256SUMS` sibling.
    ProductSums { url: String },
    /// Per-asset `<asset>.sha256` sibling.
    AssetSha256 { url: String },
    /// Inline block in the release notes. Declared but yields nothing.
    ReleaseBody,
}

impl DiscoverySource {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::GoReleaser { url } | Self::ProductSums { url } | Self::AssetSha256 { url } => {
                Some(url)
            }
            Self::ReleaseBody => None,
        }
    }
}

/// Candidate checksum locations for `asset_url`, in the order they should
/// be tried. The first candidate that yields a parseable entry wins.
pub fn discovery_sources(asset_url: &str, name: &str, version: &str) -> Vec<DiscoverySource> {
    let asset = url_basename(asset_url);
    vec![
        DiscoverySource::GoReleaser {
            url: sibling_url(asset_url, "checksums.txt"),
        },
        DiscoverySource::ProductSums {
            url: sibling_url(asset_url, &format!("{name}_{version}_SHA256SUMS")),
        },
        DiscoverySource::AssetSha256 {
            url: sibling_url(asset_url, &format!("{asset}.sha256")),
        },
        DiscoverySource::ReleaseBody,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const JQ_SUM: &str = "5942c9b0934e510ee61eb3e30273f1b3fe2590df93933a93d7c58b81d19c8ff5";

    #[test]
    fn test_parse_with_type_strict() {
        let c = Checksum::parse_with_type(&format!("sha256:{JQ_SUM}")).unwrap();
        assert_eq!(c.hash_type, HashType::Sha256);
        assert_eq!(c.hex, JQ_SUM);

        // Bare hex is rejected in with-type contexts.
        assert!(Checksum::parse_with_type(JQ_SUM).is_err());
    }

    #[test]
    fn test_parse_lenient_by_length() {
        assert_eq!(Checksum::parse(JQ_SUM).unwrap().hash_type, HashType::Sha256);
        assert_eq!(
            Checksum::parse(&"a".repeat(32)).unwrap().hash_type,
            HashType::Md5
        );
        assert_eq!(
            Checksum::parse(&"b".repeat(40)).unwrap().hash_type,
            HashType::Sha1
        );
        assert_eq!(
            Checksum::parse(&"c".repeat(128)).unwrap().hash_type,
            HashType::Sha512
        );
        assert!(Checksum::parse("zz").is_err());
    }

    #[test]
    fn test_roundtrip_format_parse() {
        for hash_type in [
            HashType::Md5,
            HashType::Sha1,
            HashType::Sha256,
            HashType::Sha384,
            HashType::Sha512,
        ] {
            let hex = hash_type.hash_bytes(b"depot");
            let formatted = Checksum::new(hash_type, &hex).unwrap().formatted();
            let parsed = Checksum::parse(&formatted).unwrap();
            assert_eq!(parsed.hash_type, hash_type);
            assert_eq!(parsed.hex, hex);
        }
    }

    #[test]
    fn test_matches_case_insensitive() {
        let c = Checksum::new(HashType::Sha256, JQ_SUM).unwrap();
        assert!(c.matches(&JQ_SUM.to_uppercase()));
        assert!(c.matches(&format!("  {JQ_SUM}\n")));
        assert!(!c.matches(&"0".repeat(64)));
    }

    #[test]
    fn test_goreleaser_file() {
        let content = format!(
            "{JQ_SUM}  jq-linux64\n{}  jq-osx-amd64\n",
            "1".repeat(64)
        );
        let c =
            parse_checksum_file(&content, "https://github.com/jqlang/jq/releases/jq-linux64")
                .unwrap();
        assert_eq!(c.hex, JQ_SUM);

        // '*' binary-mode marker is tolerated.
        let starred = format!("{JQ_SUM} *jq-linux64\n");
        assert!(parse_checksum_file(&starred, "https://x/jq-linux64").is_ok());
    }

    #[test]
    fn test_multi_hash_file_prefers_sha256() {
        let sha1 = "a".repeat(40);
        let sha256 = "b".repeat(64);
        let md5 = "c".repeat(32);
        let content = format!("yq_darwin_arm64.tar.gz {sha1} {md5} {sha256}\n");
        let c = parse_checksum_file(&content, "https://dl/yq_darwin_arm64.tar.gz").unwrap();
        assert_eq!(c.hash_type, HashType::Sha256);
        assert_eq!(c.hex, sha256);
    }

    #[test]
    fn test_single_line_file() {
        let c = parse_checksum_file(&format!("{JQ_SUM}\n"), "https://x/file.tar.gz").unwrap();
        assert_eq!(c.hex, JQ_SUM);
    }

    #[test]
    fn test_envtest_yaml_file() {
        let hash = "d".repeat(128);
        let content = format!(
            r#"releases:
  v1.28.0:
    envtest-v1.28.0-linux-amd64.tar.gz:
      hash: {hash}
      selfLink: https://storage/envtest-v1.28.0-linux-amd64.tar.gz
    envtest-v1.28.0-darwin-arm64.tar.gz:
      hash: {}
      selfLink: https://storage/envtest-v1.28.0-darwin-arm64.tar.gz
"#,
            "e".repeat(128)
        );
        let c = parse_checksum_file(&content, "https://storage/envtest-v1.28.0-linux-amd64.tar.gz")
            .unwrap();
        assert_eq!(c.hash_type, HashType::Sha512);
        assert_eq!(c.hex, hash);
    }

    #[test]
    fn test_not_found_in_file() {
        let content = format!("{JQ_SUM}  jq-linux64\n");
        let err = parse_checksum_file(&content, "https://x/jq-win64.exe").unwrap_err();
        assert!(matches!(err, ChecksumError::NotFound { .. }));
    }

    #[test]
    fn test_url_helpers() {
        let url = "https://github.com/jqlang/jq/releases/download/jq-1.6/jq-linux64?token=x";
        assert_eq!(url_basename(url), "jq-linux64");
        assert_eq!(
            sibling_url(url, "checksums.txt"),
            "https://github.com/jqlang/jq/releases/download/jq-1.6/checksums.txt"
        );
    }

    #[test]
    fn test_discovery_source_order() {
        let sources = discovery_sources("https://dl/v1.2.3/tool-linux-amd64.tar.gz", "tool", "1.2.3");
        assert!(matches!(&sources[0], DiscoverySource::GoReleaser { url } if url.ends_with("/checksums.txt")));
        assert!(
            matches!(&sources[1], DiscoverySource::ProductSums { url } if url.ends_with("/tool_1.2.3_SHA256SUMS"))
        );
        assert!(
            matches!(&sources[2], DiscoverySource::AssetSha256 { url } if url.ends_with("/tool-linux-amd64.tar.gz.sha256"))
        );
        assert_eq!(sources[3], DiscoverySource::ReleaseBody);
    }

    #[test]
    fn test_hash_file_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello depot").unwrap();

        let on_disk = HashType::Sha256.hash_file(&path).unwrap();
        let in_memory = HashType::Sha256.hash_bytes(b"hello depot");
        assert_eq!(on_disk, in_memory);
    }
}
