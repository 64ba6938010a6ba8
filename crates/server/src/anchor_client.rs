//! Concrete `TimestampingClient` implementations (C9).
//!
//! `HttpTimestampingClient` talks to a configured RFC 3161 / OpenTimestamps
//! style endpoint over HTTP, grounded on the teacher indexer's `rpc.rs`
//! `reqwest::Client` usage. `LocalTimestampingClient` is the fallback when
//! no such endpoint is configured: it never touches the network and
//! produces a receipt that is honest about not being externally attested.

use async_trait::async_trait;
use votecore::anchor::TimestampingClient;
use votecore::hash::Hash;

pub struct HttpTimestampingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTimestampingClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl TimestampingClient for HttpTimestampingClient {
    async fn timestamp(&self, payload_hash: &Hash) -> anyhow::Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .body(hex::encode(payload_hash))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Stand-in used when `Config::timestamping_endpoint` is unset. Produces a
/// deterministic, clearly-local receipt rather than silently pretending to
/// anchor externally.
pub struct LocalTimestampingClient;

#[async_trait]
impl TimestampingClient for LocalTimestampingClient {
    async fn timestamp(&self, payload_hash: &Hash) -> anyhow::Result<String> {
        Ok(format!("local-pending-{}", hex::encode(payload_hash)))
    }
}
