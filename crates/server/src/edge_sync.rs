//! Edge-node batch sync (C11).
//!
//! An edge node collects ballots while disconnected from the cloud core
//! and later uploads them as one RSA-PKCS1v15/SHA-256-signed batch. This
//! mirrors the RustCrypto-based signature verification the pack's
//! `zavodil-private-dao-ark` example leans on (`rsa` + `sha2`), applied
//! here to edge-node authenticity rather than on-chain key material.
//!
//! Replays are made idempotent by `batch_id`: an edge node that didn't get
//! a response (network partition, timeout) can safely resend the same
//! batch, and the second call returns the first call's result instead of
//! re-appending every ballot a second time.

use crate::error::ApiError;
use crate::state::AppState;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct EdgeBatchItem {
    pub nullifier: String,
    pub commitment: String,
    pub encrypted_ballot: String,
}

#[derive(Debug, Deserialize)]
pub struct EdgeBatchRequest {
    pub batch_id: Uuid,
    pub election_id: Uuid,
    pub question_id: Uuid,
    /// Which registered edge node this batch came from; selects which
    /// public key verifies `signature`.
    pub node_id: String,
    /// Hex Merkle root the edge node computed locally over this batch
    /// before upload. Carried as a signing input and in the response for
    /// audit; the cloud root it lands at after append is independent and
    /// reported separately as `cloud_merkle_root`.
    pub batch_merkle_root: String,
    /// Edge node's local submission timestamp, carried through verbatim.
    pub submitted_at: String,
    pub votes: Vec<EdgeBatchItem>,
    /// Base64 RSA-PKCS1v15/SHA-256 signature over
    /// `batch_id:batch_merkle_root:election_id:node_id`.
    pub signature: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct EdgeBatchResponse {
    pub batch_id: Uuid,
    pub cloud_start_position: u64,
    pub accepted: u64,
    pub rejected: Vec<String>,
    pub cloud_merkle_root: String,
    pub processed_at: String,
}

/// Cache of already-processed batch ids, keyed for idempotent replay.
#[derive(Default)]
pub struct ReplayCache {
    seen: Mutex<HashMap<Uuid, EdgeBatchResponse>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unix_timestamp_now() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
        .to_string()
}

fn canonical_batch_bytes(req: &EdgeBatchRequest) -> Vec<u8> {
    format!(
        "{}:{}:{}:{}",
        req.batch_id, req.batch_merkle_root, req.election_id, req.node_id
    )
    .into_bytes()
}

fn verify_signature(config_pem: &str, req: &EdgeBatchRequest) -> Result<(), ApiError> {
    let public_key = RsaPublicKey::from_pkcs1_pem(config_pem)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid edge RSA public key: {e}")))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let sig_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &req.signature)
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 signature: {e}")))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| ApiError::BadRequest(format!("malformed signature: {e}")))?;

    verifying_key
        .verify(&canonical_batch_bytes(req), &signature)
        .map_err(|_| ApiError::BadRequest("batch signature does not verify".to_string()))
}

pub async fn sync_batch(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::Json(req): axum::Json<EdgeBatchRequest>,
) -> Result<axum::Json<EdgeBatchResponse>, ApiError> {
    let cache = state.edge_replay_cache.clone();
    if let Some(cached) = cache
        .seen
        .lock()
        .expect("replay cache lock poisoned")
        .get(&req.batch_id)
        .cloned()
    {
        return Ok(axum::Json(cached));
    }

    let pem = state
        .config
        .edge_node_keys
        .get(&req.node_id)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown edge node '{}'", req.node_id)))?;
    verify_signature(pem, &req)?;

    let handle = state.registry.get(req.election_id)?;
    let cloud_start_position = handle.ledger.size(req.question_id)?;

    let mut accepted = 0u64;
    let mut rejected = Vec::new();
    for item in &req.votes {
        let nullifier = crate::hex_field::decode_hash(&item.nullifier, "nullifier")?;
        let commitment = crate::hex_field::decode_hash(&item.commitment, "commitment")?;
        let encrypted_ballot = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &item.encrypted_ballot,
        )
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 item payload: {e}")))?;

        match handle
            .ledger
            .append(req.question_id, nullifier, commitment, encrypted_ballot)
            .await
        {
            Ok(_) => accepted += 1,
            Err(e) => rejected.push(format!("{}: {e}", item.nullifier)),
        }
    }

    let cloud_merkle_root = hex::encode(handle.ledger.root(req.question_id)?);
    let response = EdgeBatchResponse {
        batch_id: req.batch_id,
        cloud_start_position,
        accepted,
        rejected,
        cloud_merkle_root,
        processed_at: unix_timestamp_now(),
    };

    cache
        .seen
        .lock()
        .expect("replay cache lock poisoned")
        .insert(req.batch_id, response.clone());

    Ok(axum::Json(response))
}
