//! Artifact retrieval: local cache, then LAN peers, then mirrors.

pub mod discovery;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use pkt_schema::PackageRecord;

use crate::config::Config;
pub use discovery::{LanDiscovery, Peer, PeerDiscovery, StaticPeers};
pub use verify::{IntegrityError, sha256_hex, verify_artifact, verify_checksum, verify_signature};

/// Errors obtaining an artifact.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Cache write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP client could not be built.
    #[error("Could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Every source was tried and none delivered.
    #[error("{filename} unavailable from every source ({})", attempts.join("; "))]
    Unavailable {
        /// Artifact file name.
        filename: String,
        /// One line per failed attempt.
        attempts: Vec<String>,
    },

    /// Delivered bytes failed verification.
    #[error("Integrity check failed for {filename}: {source}")]
    Integrity {
        /// Artifact file name.
        filename: String,
        /// What failed.
        source: IntegrityError,
    },
}

/// Where a fetched artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    /// Already present and valid in the cache.
    Cache,
    /// A LAN peer, by base URL.
    Peer(String),
    /// A configured source or mirror, by base URL.
    Mirror(String),
}

/// A fetched, cached artifact.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Cache path.
    pub path: PathBuf,
    /// Verified contents.
    pub bytes: Bytes,
    /// Where they came from.
    pub source: FetchSource,
}

/// Downloads artifacts into the cache and verifies them.
pub struct Fetcher {
    client: Client,
    cache_dir: PathBuf,
    discovery: Option<Arc<dyn PeerDiscovery>>,
    retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("cache_dir", &self.cache_dir)
            .field("discovery", &self.discovery.is_some())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Fetcher configured from `config`, with LAN discovery when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let discovery: Option<Arc<dyn PeerDiscovery>> = if config.lan_discovery {
            Some(Arc::new(LanDiscovery::new(
                config.discovery_port,
                Duration::from_millis(config.discovery_window_ms),
            )))
        } else {
            None
        };
        Self::new(
            config.cache_dir.clone(),
            discovery,
            Duration::from_secs(config.fetch_timeout_secs),
            config.fetch_retries,
        )
    }

    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(
        cache_dir: PathBuf,
        discovery: Option<Arc<dyn PeerDiscovery>>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            cache_dir,
            discovery,
            retries: retries.max(1),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Pause between attempts against the same mirror.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Artifact cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `filename` lives in the cache.
    pub fn cached_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    /// Obtain `filename` from the cache, a LAN peer, or the first mirror
    /// that serves it. Network results are written to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unavailable`] when every source failed.
    pub async fn fetch(&self, filename: &str, mirrors: &[String]) -> Result<Fetched, FetchError> {
        let path = self.cached_path(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "cache hit");
                return Ok(Fetched {
                    path,
                    bytes: Bytes::from(bytes),
                    source: FetchSource::Cache,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut attempts = Vec::new();

        if let Some(discovery) = &self.discovery {
            let peers = discovery.discover(filename).await;
            tracing::debug!("{} peer(s) answered for {filename}", peers.len());
            for peer in peers {
                let url = peer.url_for(filename);
                match self.get(&url).await {
                    Ok(bytes) => {
                        self.store(&path, &bytes).await?;
                        return Ok(Fetched {
                            path,
                            bytes,
                            source: FetchSource::Peer(peer.base_url),
                        });
                    }
                    Err(reason) => {
                        tracing::debug!(%url, "peer failed: {reason}");
                        attempts.push(format!("{url}: {reason}"));
                    }
                }
            }
        }

        for mirror in mirrors {
            let url = format!("{}/{filename}", mirror.trim_end_matches('/'));
            for attempt in 1..=self.retries {
                match self.get(&url).await {
                    Ok(bytes) => {
                        self.store(&path, &bytes).await?;
                        return Ok(Fetched {
                            path,
                            bytes,
                            source: FetchSource::Mirror(mirror.clone()),
                        });
                    }
                    Err(reason) => {
                        tracing::debug!(%url, attempt, "mirror failed: {reason}");
                        attempts.push(format!("{url}: {reason}"));
                        if !reason.retryable() {
                            break;
                        }
                        if attempt < self.retries && !self.retry_delay.is_zero() {
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        Err(FetchError::Unavailable {
            filename: filename.to_string(),
            attempts,
        })
    }

    /// Fetch the artifact for `record` and verify it. A failed check
    /// removes the cached copy so the next attempt refetches.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Integrity`] on a checksum or signature
    /// mismatch, otherwise see [`Fetcher::fetch`].
    pub async fn fetch_verified(
        &self,
        record: &PackageRecord,
        mirrors: &[String],
        trusted: bool,
        trusted_key: &str,
    ) -> Result<Fetched, FetchError> {
        let filename = record.artifact_filename();
        let fetched = self.fetch(&filename, mirrors).await?;

        if let Err(source) = verify_artifact(&fetched.bytes, record, trusted, trusted_key) {
            tracing::warn!(%filename, "integrity check failed: {source}");
            if let Err(e) = tokio::fs::remove_file(&fetched.path).await {
                tracing::warn!(path = %fetched.path.display(), "could not drop bad artifact: {e}");
            }
            return Err(FetchError::Integrity { filename, source });
        }
        Ok(fetched)
    }

    async fn get(&self, url: &str) -> Result<Bytes, AttemptError> {
        let response = self.client.get(url).send().await.map_err(AttemptError::Transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AttemptError::Status(status));
        }
        response.bytes().await.map_err(AttemptError::Transport)
    }

    async fn store(&self, path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, path).await?;
        Ok(())
    }
}

#[derive(Debug)]
enum AttemptError {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl AttemptError {
    /// Client errors other than timeouts will not change on retry.
    fn retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => {
                !status.is_client_error() || *status == StatusCode::REQUEST_TIMEOUT
            }
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::record_for;
    use tempfile::tempdir;

    fn fetcher(cache: &Path, peers: Vec<Peer>, retries: u32) -> Fetcher {
        let discovery: Arc<dyn PeerDiscovery> = Arc::new(StaticPeers(peers));
        Fetcher::new(
            cache.to_path_buf(),
            Some(discovery),
            Duration::from_secs(5),
            retries,
        )
        .unwrap()
        .with_retry_delay(Duration::ZERO)
    }

    fn peer(server: &mockito::Server) -> Peer {
        Peer {
            base_url: server.url(),
        }
    }

    #[tokio::test]
    async fn test_peers_then_mirror_in_order() {
        let mut peer1 = mockito::Server::new_async().await;
        let mut peer2 = mockito::Server::new_async().await;
        let mut mirror = mockito::Server::new_async().await;

        let p1 = peer1
            .mock("GET", "/bar-1.0.pkt")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let p2 = peer2
            .mock("GET", "/bar-1.0.pkt")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let m = mirror
            .mock("GET", "/repo/bar-1.0.pkt")
            .with_status(200)
            .with_body("artifact")
            .expect(1)
            .create_async()
            .await;

        let cache = tempdir().unwrap();
        let fetcher = fetcher(cache.path(), vec![peer(&peer1), peer(&peer2)], 3);
        let mirrors = vec![format!("{}/repo/", mirror.url())];

        let fetched = fetcher.fetch("bar-1.0.pkt", &mirrors).await.unwrap();
        assert_eq!(&fetched.bytes[..], b"artifact");
        assert!(matches!(fetched.source, FetchSource::Mirror(_)));
        assert_eq!(std::fs::read(cache.path().join("bar-1.0.pkt")).unwrap(), b"artifact");

        p1.assert_async().await;
        p2.assert_async().await;
        m.assert_async().await;

        // Second fetch never touches the network.
        let again = fetcher.fetch("bar-1.0.pkt", &mirrors).await.unwrap();
        assert_eq!(again.source, FetchSource::Cache);
    }

    #[tokio::test]
    async fn test_mirror_retries_are_bounded() {
        let mut mirror = mockito::Server::new_async().await;
        let m = mirror
            .mock("GET", "/x.pkt")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let cache = tempdir().unwrap();
        let fetcher = fetcher(cache.path(), Vec::new(), 2);
        let err = fetcher.fetch("x.pkt", &[mirror.url()]).await.unwrap_err();

        match err {
            FetchError::Unavailable { attempts, .. } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_integrity_failure_drops_cached_copy() {
        let mut mirror = mockito::Server::new_async().await;
        mirror
            .mock("GET", "/foo-1.0.pkt")
            .with_status(200)
            .with_body("corrupted")
            .create_async()
            .await;

        let cache = tempdir().unwrap();
        let fetcher = fetcher(cache.path(), Vec::new(), 1);
        let mut record = record_for("foo", "1.0");
        record.checksum = sha256_hex(b"original");

        let err = fetcher
            .fetch_verified(&record, &[mirror.url()], false, "")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Integrity { .. }));
        assert!(!cache.path().join("foo-1.0.pkt").exists());
    }

    #[tokio::test]
    async fn test_trusted_records_use_signature() {
        let mut mirror = mockito::Server::new_async().await;
        mirror
            .mock("GET", "/foo-1.0.pkt")
            .with_status(200)
            .with_body("signed bytes")
            .create_async()
            .await;

        let cache = tempdir().unwrap();
        let fetcher = fetcher(cache.path(), Vec::new(), 1);
        let mut record = record_for("foo", "1.0");
        record.signature = verify::tests::sign_b64(b"signed bytes");

        let fetched = fetcher
            .fetch_verified(&record, &[mirror.url()], true, &verify::tests::public_b64())
            .await
            .unwrap();
        assert_eq!(&fetched.bytes[..], b"signed bytes");
    }
}
