//! External anchoring (C9): timestamp an election's start/close moments
//! with an outside authority so the ledger's own signature isn't the only
//! thing vouching for when they happened.
//!
//! Grounded on the teacher indexer's `rpc.rs` client-with-retry pattern
//! (exponential backoff around a fallible external call) and on
//! `hash::canonical_json` for payload construction (§6 requires the
//! anchored payload hash be reproducible by any third party re-deriving it
//! from the public election record). The start and close anchors commit to
//! different facts about the election and so use two distinct payload
//! schemas rather than one generic shape.

use crate::hash::{canonical_json, canonical_json_hash, sha256, Hash};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorKind {
    ElectionStart,
    ElectionClose,
}

impl AnchorKind {
    fn type_tag(self) -> &'static str {
        match self {
            AnchorKind::ElectionStart => "tvs-election-start",
            AnchorKind::ElectionClose => "tvs-election-close",
        }
    }
}

const SCHEMA_VERSION: u64 = 1;

/// Envelope keys common to both payload schemas, always first: `type` then
/// `version`. Content fields follow in the order §4.8 lists them.
fn envelope_fields(kind: AnchorKind) -> Vec<(&'static str, Value)> {
    vec![("type", json!(kind.type_tag())), ("version", json!(SCHEMA_VERSION))]
}

/// Start-of-voting anchor payload: election id, a hash of the finalized
/// threshold public key, a hash of the `{threshold, totalTrustees}` pair,
/// and the anchoring timestamp. There is no ledger root yet at this point
/// in the election's life, so one cannot appear in this schema.
pub fn start_payload_fields(
    election_id: Uuid,
    public_key: &[u8],
    threshold: u16,
    total_trustees: u16,
    timestamp: u64,
) -> Vec<(&'static str, Value)> {
    let public_key_hash = sha256(public_key);
    let threshold_total_hash = canonical_json_hash(&[
        ("threshold", json!(threshold)),
        ("totalTrustees", json!(total_trustees)),
    ]);

    let mut fields = envelope_fields(AnchorKind::ElectionStart);
    fields.push(("election_id", json!(election_id.to_string())));
    fields.push(("public_key_hash", json!(hex::encode(public_key_hash))));
    fields.push(("threshold_total_hash", json!(hex::encode(threshold_total_hash))));
    fields.push(("timestamp", json!(timestamp)));
    fields
}

/// Close-of-tallying anchor payload: election id, the final root-of-roots
/// Merkle root, the total vote count across every question, and the
/// anchoring timestamp.
pub fn close_payload_fields(
    election_id: Uuid,
    root: &Hash,
    vote_count: u64,
    timestamp: u64,
) -> Vec<(&'static str, Value)> {
    let mut fields = envelope_fields(AnchorKind::ElectionClose);
    fields.push(("election_id", json!(election_id.to_string())));
    fields.push(("root", json!(hex::encode(root))));
    fields.push(("vote_count", json!(vote_count)));
    fields.push(("timestamp", json!(timestamp)));
    fields
}

pub fn payload_json(fields: &[(&str, Value)]) -> String {
    canonical_json(fields)
}

pub fn payload_hash(fields: &[(&str, Value)]) -> Hash {
    canonical_json_hash(fields)
}

#[derive(Debug, Clone)]
pub struct AnchorRecord {
    pub kind: AnchorKind,
    pub election_id: Uuid,
    /// Raw JSON of the anchored payload, exactly as hashed and timestamped.
    pub payload_json: String,
    pub payload_hash: Hash,
    pub receipt: String,
    pub is_bitcoin_attested: bool,
}

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("timestamping service unavailable after {attempts} attempts: {source}")]
    ServiceUnavailable {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// A third-party timestamping service. The production implementation talks
/// to an RFC 3161 / OpenTimestamps-style endpoint over HTTP; tests inject a
/// fake.
#[async_trait]
pub trait TimestampingClient: Send + Sync {
    async fn timestamp(&self, payload_hash: &Hash) -> anyhow::Result<String>;
}

/// Bitcoin-anchored OpenTimestamps receipts carry this marker once the
/// calendar server's proof has been upgraded to include a Bitcoin block
/// attestation; before that the receipt is only a pending calendar proof.
const BITCOIN_ATTESTATION_MARKER: &[u8] = b"bitcoinBlockHeaderAttestation";

fn is_bitcoin_attested(receipt: &str) -> bool {
    receipt.as_bytes().windows(BITCOIN_ATTESTATION_MARKER.len()).any(|w| w == BITCOIN_ATTESTATION_MARKER)
}

/// Non-generic over its client so one orchestrator instance can live in
/// shared application state regardless of which concrete `TimestampingClient`
/// backs it (a real HTTP client in production, a local stand-in in tests
/// and single-node deployments without an external timestamping budget).
pub struct AnchorOrchestrator {
    client: Arc<dyn TimestampingClient>,
    max_attempts: u32,
    base_delay: Duration,
}

impl AnchorOrchestrator {
    pub fn new(client: Arc<dyn TimestampingClient>) -> Self {
        Self {
            client,
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }

    /// Anchor a payload already built by the caller via
    /// [`start_payload_fields`]/[`close_payload_fields`] plus
    /// [`payload_json`]/[`payload_hash`]. The orchestrator itself is
    /// schema-agnostic: it only retries and records the receipt.
    pub async fn anchor(
        &self,
        kind: AnchorKind,
        election_id: Uuid,
        payload_json: String,
        payload_hash: Hash,
    ) -> Result<AnchorRecord, AnchorError> {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match self.client.timestamp(&payload_hash).await {
                Ok(receipt) => {
                    let is_attested = is_bitcoin_attested(&receipt);
                    return Ok(AnchorRecord {
                        kind,
                        election_id,
                        payload_json,
                        payload_hash,
                        receipt,
                        is_bitcoin_attested: is_attested,
                    });
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "anchor attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.base_delay * 2u32.pow(attempt - 1)).await;
                    }
                }
            }
        }

        Err(AnchorError::ServiceUnavailable {
            attempts: self.max_attempts,
            source: last_error.expect("loop always attempts at least once"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        fail_times: u32,
        calls: Arc<AtomicU32>,
        receipt: String,
    }

    #[async_trait]
    impl TimestampingClient for FlakyClient {
        async fn timestamp(&self, _payload_hash: &Hash) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                anyhow::bail!("calendar server timeout");
            }
            Ok(self.receipt.clone())
        }
    }

    fn orchestrator(fail_times: u32, receipt: &str, calls: Arc<AtomicU32>) -> AnchorOrchestrator {
        AnchorOrchestrator::new(Arc::new(FlakyClient {
            fail_times,
            calls,
            receipt: receipt.to_string(),
        }))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let orch = orchestrator(2, "calendar-pending", calls.clone());

        let fields = close_payload_fields(Uuid::nil(), &[7u8; 32], 10, 1_700_000_000);
        let record = orch
            .anchor(AnchorKind::ElectionClose, Uuid::nil(), payload_json(&fields), payload_hash(&fields))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!record.is_bitcoin_attested);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let orch = orchestrator(10, "", calls.clone());

        let fields = close_payload_fields(Uuid::nil(), &[1u8; 32], 0, 1_700_000_000);
        let err = orch
            .anchor(AnchorKind::ElectionClose, Uuid::nil(), payload_json(&fields), payload_hash(&fields))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            AnchorError::ServiceUnavailable { attempts, .. } => assert_eq!(attempts, 3),
        }
    }

    #[tokio::test]
    async fn detects_bitcoin_attestation_marker() {
        let orch = orchestrator(
            0,
            "prefix-bitcoinBlockHeaderAttestation-suffix",
            Arc::new(AtomicU32::new(0)),
        );
        let fields = start_payload_fields(Uuid::nil(), b"pubkey-bytes", 2, 3, 1_700_000_000);
        let record = orch
            .anchor(AnchorKind::ElectionStart, Uuid::nil(), payload_json(&fields), payload_hash(&fields))
            .await
            .unwrap();
        assert!(record.is_bitcoin_attested);
    }

    #[test]
    fn start_and_close_schemas_produce_different_hashes() {
        let start = start_payload_fields(Uuid::nil(), b"pubkey-bytes", 2, 3, 1_700_000_000);
        let close = close_payload_fields(Uuid::nil(), &[9u8; 32], 42, 1_700_000_000);
        assert_ne!(payload_hash(&start), payload_hash(&close));
    }

    #[test]
    fn start_payload_hash_is_stable_for_same_inputs() {
        let f1 = start_payload_fields(Uuid::nil(), b"pubkey-bytes", 2, 3, 1_700_000_000);
        let f2 = start_payload_fields(Uuid::nil(), b"pubkey-bytes", 2, 3, 1_700_000_000);
        assert_eq!(payload_hash(&f1), payload_hash(&f2));
    }
}
