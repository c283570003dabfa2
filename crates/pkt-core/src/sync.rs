//! Index sync.
//!
//! Every configured source serves its complete package list. Trusted
//! sources also serve `<url>.sig`, an Ed25519 signature over the exact
//! bytes served; a missing or invalid signature is a hard failure.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use pkt_schema::{Location, SourcePackage, ZSTD_MAGIC};

use crate::config::SourceConfig;
use crate::context::Context;
use crate::error::PktError;
use crate::fetch::verify_signature;
use crate::index::PackageIndex;

/// Result of syncing one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Source that was synced.
    pub location: Location,
    /// Entries now indexed for it.
    pub packages: usize,
}

/// Refresh the index from every configured source, in order.
///
/// # Errors
///
/// Stops at the first source that cannot be downloaded, verified or
/// parsed. Sources already synced keep their new rows.
pub async fn sync(ctx: &Context) -> Result<Vec<SyncSummary>, PktError> {
    if ctx.config.sources.is_empty() {
        ctx.reporter.warning("No sources configured");
        return Ok(Vec::new());
    }

    let client = Client::builder()
        .user_agent(crate::USER_AGENT)
        .timeout(Duration::from_secs(ctx.config.fetch_timeout_secs))
        .build()
        .map_err(|e| PktError::Network(e.to_string()))?;

    ctx.reporter.section("Syncing");
    let mut summaries = Vec::new();
    for source in &ctx.config.sources {
        let summary = sync_source(&client, source, &ctx.index, &ctx.config.trusted_key).await?;
        ctx.reporter
            .info(&format!("{}: {} packages", summary.location, summary.packages));
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Download, verify and load one source.
///
/// # Errors
///
/// Returns [`PktError::Network`] for transport failures,
/// [`PktError::Integrity`] for a bad or missing signature and
/// [`PktError::Context`] for a malformed document.
pub async fn sync_source(
    client: &Client,
    source: &SourceConfig,
    index: &PackageIndex,
    trusted_key: &str,
) -> Result<SyncSummary, PktError> {
    let location = source.location();
    debug!(url = %source.url, %location, "syncing source");

    let bytes = get(client, &source.url).await?;

    if source.trusted {
        let sig_url = format!("{}.sig", source.url);
        let signature = get(client, &sig_url)
            .await
            .map_err(|e| PktError::context("Missing list signature", format!("{sig_url}: {e}")))?;
        let signature = String::from_utf8_lossy(&signature);
        verify_signature(&bytes, &signature, trusted_key).map_err(|source| PktError::Integrity {
            filename: sig_url.clone(),
            source,
        })?;
        debug!(%location, "package list signature verified");
    }

    let document = if bytes.len() >= 4 && bytes[..4] == ZSTD_MAGIC {
        zstd::decode_all(&bytes[..]).map_err(|e| PktError::context("Failed to decompress list", e))?
    } else {
        bytes.to_vec()
    };
    let packages: Vec<SourcePackage> = serde_json::from_slice(&document)
        .map_err(|e| PktError::context("Invalid package list", e))?;

    let count = index.replace_location(&location, packages)?;
    info!(%location, packages = count, "source synced");
    Ok(SyncSummary {
        location,
        packages: count,
    })
}

async fn get(client: &Client, url: &str) -> Result<bytes::Bytes, PktError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PktError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(PktError::Network(format!("{url}: HTTP {}", response.status())));
    }
    response
        .bytes()
        .await
        .map_err(|e| PktError::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::verify::tests::{public_b64, sign_b64};
    use pkt_schema::{PackageId, PackageName};

    const LIST: &str = r#"[
        {"name": "foo", "version": "1.0", "serial": 3, "checksum": "aa"},
        {"name": "foo", "version": "2.0", "serial": 5, "checksum": "bb",
         "dependencies": {"runtime": ["bar"]}},
        {"name": "bar", "version": "0.9", "serial": 1}
    ]"#;

    fn source(server: &mockito::Server, trusted: bool) -> SourceConfig {
        SourceConfig {
            url: format!("{}/pkt/packages.json", server.url()),
            trusted,
        }
    }

    #[tokio::test]
    async fn test_untrusted_plain_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pkt/packages.json")
            .with_body(LIST)
            .create_async()
            .await;

        let index = PackageIndex::open_in_memory().unwrap();
        let summary = sync_source(&Client::new(), &source(&server, false), &index, "")
            .await
            .unwrap();
        assert_eq!(summary.packages, 3);
        assert_eq!(index.candidates(&PackageName::new("foo")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trusted_compressed_list() {
        let compressed = zstd::encode_all(LIST.as_bytes(), 3).unwrap();
        let signature = sign_b64(&compressed);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pkt/packages.json")
            .with_body(compressed)
            .create_async()
            .await;
        server
            .mock("GET", "/pkt/packages.json.sig")
            .with_body(signature)
            .create_async()
            .await;

        let index = PackageIndex::open_in_memory().unwrap();
        let src = source(&server, true);
        sync_source(&Client::new(), &src, &index, &public_b64())
            .await
            .unwrap();
        let record = index
            .get(&PackageId::from_raw("foo@2.0"), &src.location())
            .unwrap()
            .unwrap();
        assert_eq!(record.location, src.location());
    }

    #[tokio::test]
    async fn test_trusted_list_without_signature_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pkt/packages.json")
            .with_body(LIST)
            .create_async()
            .await;
        server
            .mock("GET", "/pkt/packages.json.sig")
            .with_status(404)
            .create_async()
            .await;

        let index = PackageIndex::open_in_memory().unwrap();
        let err = sync_source(&Client::new(), &source(&server, true), &index, &public_b64())
            .await
            .unwrap_err();
        assert!(matches!(err, PktError::Context { .. }));
        assert!(index.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_tampered_list_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pkt/packages.json")
            .with_body(LIST)
            .create_async()
            .await;
        server
            .mock("GET", "/pkt/packages.json.sig")
            .with_body(sign_b64(b"a different list"))
            .create_async()
            .await;

        let index = PackageIndex::open_in_memory().unwrap();
        let err = sync_source(&Client::new(), &source(&server, true), &index, &public_b64())
            .await
            .unwrap_err();
        assert!(matches!(err, PktError::Integrity { .. }));
    }
}
