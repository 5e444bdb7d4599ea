//! HTTP retrieval for external data feeds.
//!
//! This crate provides:
//! - [`Fetcher`] trait for abstracting feed retrieval
//! - [`HttpFetcher`] production client with an optional insecure TLS retry
//! - [`CachedFetcher`] file-backed response cache with a configurable expiry,
//!   so repeated runs within the window reuse previously fetched bytes
//! - [`MockFetcher`] mock client for testing with pre-configured URL → bytes
//!   mappings
//! - [`archive`] zip extraction into a run-scoped temporary directory

pub mod archive;
mod mock;

pub use mock::MockFetcher;

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("bad archive: {0}")]
    BadArchive(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Trait for fetching feed content over HTTP.
///
/// Abstracts the HTTP client to enable dependency injection and mocking for
/// tests. Production code uses [`HttpFetcher`] (usually wrapped in a
/// [`CachedFetcher`]); tests use [`MockFetcher`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the body bytes for a URL, failing on non-success status codes.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Production HTTP client.
///
/// With `insecure_fallback` enabled, a failed connection is retried once
/// with certificate verification disabled. One upstream register serves an
/// incomplete certificate chain; the retry mirrors how its feed has to be
/// fetched in practice.
pub struct HttpFetcher {
    client: ReqwestClient,
    insecure_fallback: bool,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: ReqwestClient::new(),
            insecure_fallback: false,
        }
    }

    pub fn with_insecure_fallback(mut self) -> Self {
        self.insecure_fallback = true;
        self
    }

    async fn get_with(&self, client: &ReqwestClient, url: &str) -> Result<Vec<u8>> {
        let res = client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = res.bytes().await?;
        Ok(bytes.to_vec())
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        match self.get_with(&self.client, url).await {
            Ok(bytes) => Ok(bytes),
            // certificate failures surface as connect errors
            Err(FetchError::Reqwest(e)) if self.insecure_fallback && e.is_connect() => {
                warn!(url, "fetch failed, retrying without certificate verification");
                let insecure = ReqwestClient::builder()
                    .danger_accept_invalid_certs(true)
                    .build()?;
                self.get_with(&insecure, url).await
            }
            Err(e) => Err(e),
        }
    }
}

/// File-backed response cache around another fetcher.
///
/// Responses are stored under a cache directory keyed by a hash of the URL;
/// a cached file younger than the expiry window is served without touching
/// the network.
pub struct CachedFetcher {
    inner: Box<dyn Fetcher>,
    dir: PathBuf,
    expiry: Duration,
}

impl CachedFetcher {
    pub fn new(inner: Box<dyn Fetcher>, dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            inner,
            dir: dir.into(),
            expiry,
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let mut name = String::with_capacity(64);
        for byte in digest {
            name.push_str(&format!("{:02x}", byte));
        }
        self.dir.join(name)
    }

    fn cached_bytes(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.cache_path(url);
        let metadata = std::fs::metadata(&path).ok()?;
        let age = SystemTime::now()
            .duration_since(metadata.modified().ok()?)
            .ok()?;
        if age > self.expiry {
            return None;
        }
        std::fs::read(&path).ok()
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cached_bytes(url) {
            info!(url, "serving from cache");
            return Ok(bytes);
        }
        info!(url, "fetching from network");
        let bytes = self.inner.get(url).await?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.cache_path(url), &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_fetcher_reuses_bytes_within_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockFetcher::new().with_response("http://example.org/data.csv", b"a,b\n1,2\n");
        let fetcher = CachedFetcher::new(
            Box::new(mock),
            dir.path(),
            Duration::from_secs(24 * 60 * 60),
        );

        let first = fetcher.get("http://example.org/data.csv").await.unwrap();
        let second = fetcher.get("http://example.org/data.csv").await.unwrap();
        assert_eq!(first, second);
        // one cache file written
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn mock_fetcher_misses_unknown_urls() {
        let mock = MockFetcher::new();
        let err = mock.get("http://example.org/absent").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }
}
