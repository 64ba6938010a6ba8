//! Threshold decryption ceremony routes (C5). Each election tracks one
//! per-question decryption ceremony (it parameterizes over "the list of
//! per-question ledgers to decrypt"); the HTTP surface takes the election
//! id from the path and the question id from the request body/query so a
//! caller drives one ceremony per question under a single election-scoped
//! URL.
//!
//! The ciphertexts a ceremony decrypts are never supplied by the caller:
//! they're assembled from the question's own ballots in the ledger via
//! homomorphic aggregation, one ciphertext per candidate.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use votecore::ceremony::decryption::{DecryptionCeremony, DecryptionPhase};
use votecore::ceremony::threshold::TrusteeId;

fn decode_point_or_bad_request(s: &str) -> Result<RistrettoPoint, ApiError> {
    let bytes = hex::decode(s).map_err(|e| ApiError::BadRequest(format!("invalid hex: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ApiError::BadRequest("point must be 32 bytes".to_string()))?;
    CompressedRistretto(arr)
        .decompress()
        .ok_or_else(|| ApiError::BadRequest("not a valid curve point".to_string()))
}

fn decryption_phase_name(phase: DecryptionPhase) -> &'static str {
    match phase {
        DecryptionPhase::Pending => "pending",
        DecryptionPhase::InProgress => "in_progress",
        DecryptionPhase::Completed => "completed",
    }
}

#[derive(Debug, Deserialize)]
pub struct StartDecryptionRequest {
    pub question_id: Uuid,
    pub threshold: u16,
    pub committee: Vec<u16>,
}

#[derive(Debug, Serialize)]
pub struct TallyResultResponse {
    pub totals: Vec<u64>,
    pub total_votes: u64,
}

#[derive(Debug, Serialize)]
pub struct DecryptionStatus {
    pub question_id: Uuid,
    pub phase: String,
    pub tally: Option<TallyResultResponse>,
}

/// `POST /api/vote/tally/{id}/start`: §4.4 `start`, `{id}` is the election.
/// Aggregates every accepted ballot for the question into one ciphertext
/// per candidate before opening the ceremony.
pub async fn start_decryption(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
    Json(req): Json<StartDecryptionRequest>,
) -> Result<Json<DecryptionStatus>, ApiError> {
    let handle = state.registry.get(election_id)?;

    let num_candidates = {
        let election = handle.election.lock().expect("election lock poisoned");
        election
            .question(req.question_id)
            .ok_or_else(|| ApiError::NotFound(format!("question {} not found", req.question_id)))?
            .candidates
            .len()
    };

    let ciphertexts = handle
        .ledger
        .aggregate_ballot_ciphertexts(req.question_id, num_candidates)
        .await?;
    let total_votes = handle.ledger.size(req.question_id)?;

    let mut ceremony = DecryptionCeremony::new(
        req.question_id,
        req.threshold,
        req.committee.into_iter().map(TrusteeId).collect(),
        ciphertexts,
        total_votes,
    );
    ceremony.start();
    let phase = ceremony.phase();
    handle
        .decryption_ceremonies
        .lock()
        .expect("decryption ceremonies lock poisoned")
        .insert(req.question_id, ceremony);

    Ok(Json(DecryptionStatus {
        question_id: req.question_id,
        phase: decryption_phase_name(phase).to_string(),
        tally: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PartialDecryption {
    pub index: u16,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitSharesRequest {
    pub question_id: Uuid,
    pub trustee_id: u16,
    pub partial_decryptions: Vec<PartialDecryption>,
}

fn tally_response(ceremony: &DecryptionCeremony) -> Option<TallyResultResponse> {
    ceremony.tally().map(|t| TallyResultResponse {
        totals: t.totals.clone(),
        total_votes: t.total_votes,
    })
}

/// `POST /api/vote/tally/{id}/decrypt`: §4.4 `submit_shares`. Every
/// ciphertext position must be decrypted in the same call, one partial per
/// candidate.
pub async fn submit_decryption_share(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
    Json(req): Json<SubmitSharesRequest>,
) -> Result<Json<DecryptionStatus>, ApiError> {
    let handle = state.registry.get(election_id)?;

    let mut shares = Vec::with_capacity(req.partial_decryptions.len());
    for partial in req.partial_decryptions {
        let value = decode_point_or_bad_request(&partial.value)?;
        shares.push((partial.index as usize, value));
    }

    let mut guard = handle
        .decryption_ceremonies
        .lock()
        .expect("decryption ceremonies lock poisoned");
    let ceremony = guard
        .get_mut(&req.question_id)
        .ok_or_else(|| ApiError::NotFound("decryption ceremony not started for this question".to_string()))?;
    ceremony.submit_shares(TrusteeId(req.trustee_id), shares)?;

    Ok(Json(DecryptionStatus {
        question_id: req.question_id,
        phase: decryption_phase_name(ceremony.phase()).to_string(),
        tally: tally_response(ceremony),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub question_id: Uuid,
}

/// `GET /api/vote/tally/{id}/status`: §4.4 `status`.
pub async fn get_status(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<DecryptionStatus>, ApiError> {
    let handle = state.registry.get(election_id)?;
    let guard = handle
        .decryption_ceremonies
        .lock()
        .expect("decryption ceremonies lock poisoned");
    let ceremony = guard
        .get(&query.question_id)
        .ok_or_else(|| ApiError::NotFound("decryption ceremony not started for this question".to_string()))?;

    Ok(Json(DecryptionStatus {
        question_id: query.question_id,
        phase: decryption_phase_name(ceremony.phase()).to_string(),
        tally: tally_response(ceremony),
    }))
}
