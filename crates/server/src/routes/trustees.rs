//! Threshold key-generation ceremony routes (C4). Commitment points cross
//! the HTTP boundary as hex-encoded compressed Ristretto255 bytes;
//! `curve25519-dalek`'s own serde support isn't enabled here since this is
//! the only call site that needs it and a manual decode keeps the wire
//! format explicit.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use votecore::election::Trustee;

fn decode_point(hex_str: &str) -> Result<RistrettoPoint, ApiError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ApiError::BadRequest(format!("invalid hex point: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ApiError::BadRequest("point must be 32 bytes".to_string()))?;
    CompressedRistretto(arr)
        .decompress()
        .ok_or_else(|| ApiError::BadRequest("point is not a valid curve point".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterTrusteeRequest {
    pub name: String,
    /// Hex-encoded enrollment public key; stored opaquely, not interpreted
    /// as a curve point here.
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterTrusteeResponse {
    pub trustee_id: u16,
    pub share_index: u16,
}

/// `POST /api/elections/{id}/trustees`: §4.3's `register_trustee`.
pub async fn register_trustee(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
    Json(req): Json<RegisterTrusteeRequest>,
) -> Result<Json<RegisterTrusteeResponse>, ApiError> {
    let handle = state.registry.get(election_id)?;
    let pubkey_bytes = hex::decode(&req.public_key)
        .map_err(|e| ApiError::BadRequest(format!("invalid hex public key: {e}")))?;

    let trustee_id = {
        let mut guard = handle.key_ceremony.lock().expect("key ceremony lock poisoned");
        let ceremony = guard
            .as_mut()
            .ok_or_else(|| ApiError::NotFound("key ceremony not started".to_string()))?;
        ceremony.register_trustee(req.name.clone(), pubkey_bytes)?
    };

    handle
        .election
        .lock()
        .expect("election lock poisoned")
        .record_trustee(Trustee {
            id: trustee_id,
            name: req.name,
        });

    Ok(Json(RegisterTrusteeResponse {
        trustee_id: trustee_id.0,
        share_index: trustee_id.0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitCommitmentRequest {
    pub commitment_hash: String,
    /// Hex-encoded compressed Ristretto255 points, `threshold` of them.
    pub feldman_commitments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyCeremonyStatus {
    pub phase: String,
    pub public_key: Option<String>,
}

fn key_ceremony_phase_name(phase: votecore::ceremony::threshold::CeremonyPhase) -> &'static str {
    use votecore::ceremony::threshold::CeremonyPhase;
    match phase {
        CeremonyPhase::Created => "created",
        CeremonyPhase::Registration => "registration",
        CeremonyPhase::Commitment => "commitment",
        CeremonyPhase::Finalized => "finalized",
    }
}

/// `POST /api/elections/{id}/trustees/{tid}/commitment`: §4.3's
/// `submit_commitment`.
pub async fn submit_commitment(
    State(state): State<AppState>,
    Path((election_id, trustee_id)): Path<(Uuid, u16)>,
    Json(req): Json<SubmitCommitmentRequest>,
) -> Result<Json<KeyCeremonyStatus>, ApiError> {
    let handle = state.registry.get(election_id)?;
    let hash = crate::hex_field::decode_hash(&req.commitment_hash, "commitmentHash")?;
    let points = req
        .feldman_commitments
        .iter()
        .map(|s| decode_point(s))
        .collect::<Result<Vec<_>, _>>()?;

    let mut guard = handle.key_ceremony.lock().expect("key ceremony lock poisoned");
    let ceremony = guard
        .as_mut()
        .ok_or_else(|| ApiError::NotFound("key ceremony not started".to_string()))?;
    ceremony.submit_commitment(votecore::ceremony::threshold::TrusteeId(trustee_id), hash, points)?;

    Ok(Json(KeyCeremonyStatus {
        phase: key_ceremony_phase_name(ceremony.phase()).to_string(),
        public_key: ceremony
            .public_key()
            .map(|pk| hex::encode(pk.compress().as_bytes())),
    }))
}
