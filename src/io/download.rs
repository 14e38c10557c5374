//! Streaming download engine with checksum verification and caching.
//!
//! Downloads stream into `<dest>.tmp` and are renamed into place only
//! after verification, so a crash never leaves a partial file at the
//! destination. Redirects are followed manually (at most ten hops, each
//! logged) so the final URL is known for checksum discovery — sibling
//! checksum files are named after the redirected asset, not the original
//! request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::core::checksum::{
    Checksum, ChecksumError, HashType, Hasher, discovery_sources, parse_checksum_file,
    url_basename,
};
use crate::core::expr::{ChecksumOutcome, ExprEngine, ExprError};
use crate::ui::ProgressSink;

const MAX_REDIRECTS: usize = 10;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected status {status} fetching {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("no checksum available for {0} and strict checksum mode is enabled")]
    ChecksumMissing(String),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("download of {0} was cancelled")]
    Cancelled(String),
}

/// Checksum configuration and knobs for one download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Expected checksum, `<type>:<hex>` or bare hex.
    pub checksum: Option<String>,
    /// Checksum document URLs (already templated).
    pub checksum_urls: Vec<String>,
    /// Expression over the fetched documents (see `core::expr`).
    pub checksum_expr: Option<String>,
    /// Try the conventional sibling locations (`checksums.txt`, ...) when
    /// nothing else is configured.
    pub auto_discover: bool,
    /// Persistent cache directory keyed by URL.
    pub cache_dir: Option<PathBuf>,
    /// Variables for `checksum_expr` (`os`, `arch`, `version`, `name`).
    pub expr_vars: serde_json::Value,
    /// Package name, used for progress reporting and discovery templates.
    pub package: String,
    pub version: String,
    /// Fail when no checksum can be determined.
    pub strict_checksum: bool,
    /// User asked to skip verification entirely.
    pub skip_checksum: bool,
}

/// What a completed download verified and where the bytes came from.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// URL actually fetched, after redirects and expression overrides.
    pub effective_url: String,
    pub bytes: u64,
    pub from_cache: bool,
    /// Digest of the artifact (the expected one when verification ran).
    pub checksum: Option<Checksum>,
    /// Where the expected checksum came from (URLs or `"config"`).
    pub checksum_sources: Vec<String>,
    /// True when the artifact was compared against an expected checksum.
    pub verified: bool,
}

/// Streaming HTTP downloader. Redirects are handled manually, so the
/// client is built with redirects disabled.
#[derive(Debug)]
pub struct Downloader {
    client: Client,
    engine: ExprEngine,
}

impl Downloader {
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            engine: ExprEngine::new(),
        })
    }

    /// Download `url` into `dest`, verifying against the configured or
    /// discovered checksum.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        opts: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut expected: Option<Checksum> = None;
        let mut sources: Vec<String> = Vec::new();
        if let Some(raw) = &opts.checksum {
            expected = Some(Checksum::parse(raw)?);
            sources.push("config".to_string());
        }

        // 1. Cache probe.
        if let Some(cached) = self.try_cache(url, dest, opts, expected.as_ref()).await? {
            return Ok(cached);
        }

        // 2. Pre-download discovery: an expression over fetched documents
        //    may yield both the checksum and a replacement URL.
        let mut effective_url = url.to_string();
        if expected.is_none()
            && opts.checksum_expr.is_some()
            && let Some((checksum, override_url, used)) =
                self.discover_via_expr(url, opts).await?
        {
            expected = Some(checksum);
            sources = used;
            if let Some(u) = override_url {
                effective_url = u;
            }
        }

        // 3. Streaming GET with manual redirect handling.
        let (response, final_url) = self.fetch(&effective_url).await?;
        let total = response.content_length().unwrap_or(0);

        let mut hasher = expected.as_ref().map(|c| c.hash_type.hasher());
        let tmp = tmp_path(dest);
        if let Some(parent) = tmp.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&tmp).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        sink.advance(&opts.package, 0, total);
        let mut last_tick = Instant::now();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(DownloadError::Cancelled(effective_url));
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            downloaded += chunk.len() as u64;
            if last_tick.elapsed() >= PROGRESS_INTERVAL {
                sink.advance(&opts.package, downloaded, total);
                last_tick = Instant::now();
            }
        }
        file.flush().await?;
        drop(file);
        sink.advance(&opts.package, downloaded, total);
        let inline_hex = hasher.map(Hasher::finalize_hex);

        // 4./5. Post-download discovery, using the redirected URL's name.
        if expected.is_none() {
            if let Some((checksum, used)) = self.discover_post(&final_url, opts).await? {
                expected = Some(checksum);
                sources = used;
            }
        }

        // 6. Verify (or hash for the record when nothing was expected).
        let outcome = self
            .verify_and_commit(
                &tmp, dest, expected, inline_hex, sources, &final_url, downloaded, opts,
            )
            .await?;

        // 8. Cache write-through, only after verification.
        if let Some(cache_dir) = &opts.cache_dir {
            write_cache(cache_dir, url, dest).await;
        }

        Ok(outcome)
    }

    /// Resolve the expected checksum for `url` without downloading the
    /// artifact. Used by lock-file generation, which records URL and
    /// checksum but never fetches the binary itself.
    pub async fn discover_checksum(
        &self,
        url: &str,
        opts: &DownloadOptions,
    ) -> Result<Option<(Checksum, Vec<String>, Option<String>)>, DownloadError> {
        if let Some(raw) = &opts.checksum {
            return Ok(Some((
                Checksum::parse(raw)?,
                vec!["config".to_string()],
                None,
            )));
        }
        if opts.checksum_expr.is_some() {
            return Ok(self
                .discover_via_expr(url, opts)
                .await?
                .map(|(checksum, override_url, sources)| (checksum, sources, override_url)));
        }
        Ok(self
            .discover_post(url, opts)
            .await?
            .map(|(checksum, sources)| (checksum, sources, None)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_and_commit(
        &self,
        tmp: &Path,
        dest: &Path,
        expected: Option<Checksum>,
        inline_hex: Option<String>,
        sources: Vec<String>,
        final_url: &str,
        bytes: u64,
        opts: &DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        let (checksum, verified) = match (&expected, opts.skip_checksum) {
            (Some(want), false) => {
                // The stream was hashed in flight when the type was known
                // up front; discovery after the fact hashes the temp file.
                let actual = match inline_hex {
                    Some(hex) => hex,
                    None => hash_file_async(want.hash_type, tmp).await?,
                };
                if !want.matches(&actual) {
                    let _ = tokio::fs::remove_file(tmp).await;
                    return Err(DownloadError::ChecksumMismatch {
                        url: final_url.to_string(),
                        expected: want.formatted(),
                        actual,
                    });
                }
                (Some(want.clone()), true)
            }
            (Some(want), true) => {
                tracing::warn!("checksum verification skipped for {final_url} by request");
                (Some(want.clone()), false)
            }
            (None, _) => {
                if opts.strict_checksum && !opts.skip_checksum {
                    let _ = tokio::fs::remove_file(tmp).await;
                    return Err(DownloadError::ChecksumMissing(final_url.to_string()));
                }
                tracing::warn!("no checksum available for {final_url}");
                // Record a digest anyway so the artifact can be pinned.
                let hex = hash_file_async(HashType::Sha256, tmp).await?;
                (Checksum::new(HashType::Sha256, hex).ok(), false)
            }
        };

        // 7. Atomic rename; the temp file never appears at `dest` unverified.
        if let Err(e) = tokio::fs::rename(tmp, dest).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(e.into());
        }

        Ok(DownloadOutcome {
            effective_url: final_url.to_string(),
            bytes,
            from_cache: false,
            checksum,
            checksum_sources: sources,
            verified,
        })
    }

    /// Serve from the cache when possible. A cached file that fails
    /// verification is discarded and re-downloaded.
    async fn try_cache(
        &self,
        url: &str,
        dest: &Path,
        opts: &DownloadOptions,
        expected: Option<&Checksum>,
    ) -> Result<Option<DownloadOutcome>, DownloadError> {
        let Some(cache_dir) = &opts.cache_dir else {
            return Ok(None);
        };
        let cached = cache_dir.join(cache_key(url));
        if !cached.exists() {
            return Ok(None);
        }

        if let Some(want) = expected {
            let actual = hash_file_async(want.hash_type, &cached).await?;
            if !want.matches(&actual) {
                tracing::warn!("cached copy of {url} failed verification, re-downloading");
                let _ = tokio::fs::remove_file(&cached).await;
                return Ok(None);
            }
        } else {
            tracing::warn!("using cached copy of {url} with no checksum available");
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(dest);
        tokio::fs::copy(&cached, &tmp).await?;
        tokio::fs::rename(&tmp, dest).await?;
        let bytes = tokio::fs::metadata(dest).await?.len();
        tracing::debug!("cache hit for {url}");

        Ok(Some(DownloadOutcome {
            effective_url: url.to_string(),
            bytes,
            from_cache: true,
            checksum: expected.cloned(),
            checksum_sources: if expected.is_some() {
                vec!["config".to_string()]
            } else {
                Vec::new()
            },
            verified: expected.is_some(),
        }))
    }

    /// Fetch all configured checksum documents and run `checksum_expr`
    /// over them. JSON documents are parsed; anything else is exposed as
    /// a string.
    async fn discover_via_expr(
        &self,
        url: &str,
        opts: &DownloadOptions,
    ) -> Result<Option<(Checksum, Option<String>, Vec<String>)>, DownloadError> {
        let Some(expr) = &opts.checksum_expr else {
            return Ok(None);
        };

        let mut files = BTreeMap::new();
        let mut first: Option<serde_json::Value> = None;
        for checksum_url in &opts.checksum_urls {
            let body = self.fetch_text(checksum_url).await?;
            let value = serde_json::from_str::<serde_json::Value>(&body)
                .unwrap_or(serde_json::Value::String(body));
            if first.is_none() {
                first = Some(value.clone());
            }
            files.insert(url_basename(checksum_url), value);
        }

        let mut vars = match opts.expr_vars.clone() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        vars.insert(
            "data".to_string(),
            first.unwrap_or(serde_json::Value::Null),
        );
        vars.insert(
            "files".to_string(),
            serde_json::to_value(&files).unwrap_or_default(),
        );
        vars.insert(
            "filename".to_string(),
            serde_json::Value::String(url_basename(url)),
        );
        let vars = serde_json::Value::Object(vars);

        let outcome = self.engine.eval_checksum(expr, &vars)?;
        let sources = opts.checksum_urls.clone();
        match outcome {
            ChecksumOutcome::Checksum(raw) => {
                Ok(Some((Checksum::parse(&raw)?, None, sources)))
            }
            ChecksumOutcome::Redirect { url, checksum } => {
                Ok(Some((Checksum::parse(&checksum)?, Some(url), sources)))
            }
        }
    }

    /// Post-download discovery: explicit checksum URLs first, then the
    /// conventional sibling locations, first parseable entry wins.
    async fn discover_post(
        &self,
        final_url: &str,
        opts: &DownloadOptions,
    ) -> Result<Option<(Checksum, Vec<String>)>, DownloadError> {
        let mut candidates: Vec<String> = opts.checksum_urls.clone();
        if opts.auto_discover {
            // Rebase conventional names onto the redirected URL so query
            // strings and renamed assets resolve correctly.
            for source in discovery_sources(final_url, &opts.package, &opts.version) {
                if let Some(u) = source.url() {
                    candidates.push(u.to_string());
                }
            }
            candidates.dedup();
        }

        for candidate in candidates {
            let body = match self.fetch_text(&candidate).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!("checksum source {candidate} unavailable: {e}");
                    continue;
                }
            };
            match parse_checksum_file(&body, final_url) {
                Ok(found) => {
                    tracing::debug!("checksum for {final_url} discovered at {candidate}");
                    return Ok(Some((found, vec![candidate])));
                }
                Err(e) => {
                    tracing::debug!("no entry for {final_url} in {candidate}: {e}");
                }
            }
        }
        Ok(None)
    }

    /// GET with manual redirect handling so every hop can be logged and
    /// the final URL returned.
    async fn fetch(&self, url: &str) -> Result<(reqwest::Response, String), DownloadError> {
        let mut current = url.to_string();
        for _ in 0..=MAX_REDIRECTS {
            let response = self.client.get(&current).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(DownloadError::Status {
                        status,
                        url: current.clone(),
                    })?;
                let next = match reqwest::Url::parse(&current) {
                    Ok(base) => base
                        .join(location)
                        .map(String::from)
                        .unwrap_or_else(|_| location.to_string()),
                    Err(_) => location.to_string(),
                };
                tracing::debug!("redirect: {current} -> {next}");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(DownloadError::Status {
                    status,
                    url: current,
                });
            }
            return Ok((response, current));
        }
        Err(DownloadError::TooManyRedirects(url.to_string()))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let (response, _) = self.fetch(url).await?;
        Ok(response.text().await?)
    }
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map_or_else(|| "download".to_string(), |n| n.to_string_lossy().to_string());
    name.push_str(".tmp");
    dest.with_file_name(name)
}

/// Deterministic cache key: a short URL digest plus the basename, so a
/// cache directory listing stays readable.
pub fn cache_key(url: &str) -> String {
    let digest = HashType::Sha256.hash_bytes(url.as_bytes());
    let base: String = url_basename(url)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}", &digest[..16], base)
}

async fn hash_file_async(hash_type: HashType, path: &Path) -> Result<String, DownloadError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_type.hash_file(&path))
        .await
        .map_err(|e| DownloadError::Io(std::io::Error::other(e)))?
        .map_err(DownloadError::from)
}

/// Copy `dest` into the cache with create-then-rename so concurrent
/// readers never observe a partial file. Failures only cost the cache.
async fn write_cache(cache_dir: &Path, url: &str, dest: &Path) {
    let target = cache_dir.join(cache_key(url));
    let tmp = tmp_path(&target);
    let result = async {
        tokio::fs::create_dir_all(cache_dir).await?;
        tokio::fs::copy(dest, &tmp).await?;
        tokio::fs::rename(&tmp, &target).await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!("cache write for {url} failed: {e}");
        let _ = tokio::fs::remove_file(&tmp).await;
    }
}
