//! Resolve `<img src>` references to bytes.
//!
//! Three kinds of source are understood:
//!
//! * `data:` URIs, decoded in place (base64 or raw payload)
//! * `http://` / `https://` URLs, downloaded with a bounded timeout
//! * everything else, read from disk relative to the HTML file's directory
//!   (`file://` URLs included)
//!
//! A failure to obtain bytes is returned as a reason string, not an error:
//! whether it is fatal is decided by the OCR runner's unreadable-image
//! policy.

use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Data(String),
    Remote(String),
    Local(PathBuf),
}

/// Check if the reference looks like an HTTP(S) URL.
pub fn is_url(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Classify a `src` attribute value.
pub fn classify(src: &str, base_dir: &Path) -> ImageSource {
    let src = src.trim();
    if src.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return ImageSource::Data(src.to_string());
    }
    if is_url(src) {
        return ImageSource::Remote(src.to_string());
    }
    if let Ok(url) = reqwest::Url::parse(src) {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                return ImageSource::Local(path);
            }
        }
    }
    // Query strings and fragments are meaningless on disk.
    let path = src.split(['?', '#']).next().unwrap_or(src);
    ImageSource::Local(base_dir.join(path))
}

/// Decode a `data:[<mime>][;base64],<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, String> {
    let (meta, payload) = uri
        .get(5..)
        .unwrap_or_default()
        .split_once(',')
        .ok_or_else(|| "malformed data URI (no comma)".to_string())?;
    if meta.to_ascii_lowercase().ends_with(";base64") {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| format!("invalid base64 in data URI: {e}"))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Build the client used for remote images.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ConvertError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::Internal(format!("HTTP client: {e}")))
}

async fn download(client: &reqwest::Client, url: &str, timeout_secs: u64) -> Result<Vec<u8>, String> {
    debug!("Downloading image: {}", url);
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            format!("{url}: download timed out after {timeout_secs}s")
        } else {
            format!("{url}: {e}")
        }
    })?;

    if !response.status().is_success() {
        return Err(format!("{url}: HTTP {}", response.status()));
    }

    let bytes = response.bytes().await.map_err(|e| format!("{url}: {e}"))?;
    Ok(bytes.to_vec())
}

/// Fetch one source.
pub async fn fetch(
    source: &ImageSource,
    client: Option<&reqwest::Client>,
    timeout_secs: u64,
) -> Result<Vec<u8>, String> {
    match source {
        ImageSource::Data(uri) => decode_data_uri(uri),
        ImageSource::Remote(url) => match client {
            Some(client) => download(client, url, timeout_secs).await,
            None => Err(format!("{url}: no HTTP client")),
        },
        ImageSource::Local(path) => tokio::fs::read(path)
            .await
            .map_err(|e| format!("{}: {e}", path.display())),
    }
}

/// Fetches image bytes on demand.
///
/// Holds no image data itself: callers fetch inside their bounded OCR
/// stream so bytes are only in memory while an image is being recognised.
pub struct ImageFetcher {
    client: Option<reqwest::Client>,
    timeout_secs: u64,
}

impl ImageFetcher {
    /// Build a fetcher for `sources`, creating an HTTP client only if one
    /// of them is remote.
    pub fn new(mode: Mode, sources: &[ImageSource], timeout_secs: u64) -> Result<Self, ConvertError> {
        let remote = sources
            .iter()
            .filter(|s| matches!(s, ImageSource::Remote(_)))
            .count();

        let client = if remote > 0 {
            info!("{} remote images to download", remote);
            Some(http_client(timeout_secs).map_err(|e| {
                ConvertError::extraction(mode, ExtractionStage::Fetch, None, e.to_string())
            })?)
        } else {
            None
        };
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    pub async fn fetch(&self, source: &ImageSource) -> Result<Vec<u8>, String> {
        fetch(source, self.client.as_ref(), self.timeout_secs).await
    }
}
