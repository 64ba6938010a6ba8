//! Ballot ingestion routes (C10): the hot path every voter hits, plus the
//! election-wide aggregate reads used by observers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use votecore::election::ElectionPhase;
use votecore::verifier::{AcceptAllVerifier, ProofKind, ProofVerifier};

fn decode_base64(field: &str, name: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(field)
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 {name}: {e}")))
}

/// 16 uppercase hex characters from 8 random bytes, per §6's confirmation
/// code format.
fn generate_confirmation_code() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Deserialize)]
pub struct Credential {
    pub election_id: Uuid,
    /// 64-hex-character nullifier.
    pub nullifier: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct ProofStepResponse {
    pub sibling: String,
    pub sibling_is_right: bool,
}

#[derive(Debug, Serialize)]
pub struct MerkleProofResponse {
    pub leaf: String,
    pub position: u64,
    pub root: String,
    pub steps: Vec<ProofStepResponse>,
}

impl From<votecore::merkle::InclusionProof> for MerkleProofResponse {
    fn from(p: votecore::merkle::InclusionProof) -> Self {
        Self {
            leaf: hex::encode(p.leaf),
            position: p.position,
            root: hex::encode(p.root),
            steps: p
                .steps
                .into_iter()
                .map(|s| ProofStepResponse {
                    sibling: hex::encode(s.sibling),
                    sibling_is_right: s.sibling_is_right,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitVoteRequest {
    pub election_id: Uuid,
    pub question_id: Uuid,
    pub credential: Credential,
    pub encrypted_payload: String,
    pub commitment: String,
    pub zk_proof: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitVoteResponse {
    pub confirmation_code: String,
    pub position: u64,
    pub merkle_root: String,
    pub merkle_proof: MerkleProofResponse,
}

/// `POST /api/vote`: §4.9's single-question ingestion contract. Checks run
/// in the order the spec fixes them: election state, credential binding,
/// nullifier freshness, then proof shape, before anything is appended.
pub async fn submit_vote(
    State(state): State<AppState>,
    Json(req): Json<SubmitVoteRequest>,
) -> Result<Json<SubmitVoteResponse>, ApiError> {
    let handle = state.registry.get(req.election_id)?;

    let status = handle.election.lock().expect("election lock poisoned").phase();
    if status != ElectionPhase::Voting {
        return Err(ApiError::BadRequest(format!(
            "election is not accepting votes, current status is '{}'",
            status.as_str()
        )));
    }

    if req.credential.election_id != req.election_id {
        return Err(ApiError::BadRequest(
            "credential election id does not match the submission's election id".to_string(),
        ));
    }

    let nullifier = crate::hex_field::decode_hash(&req.credential.nullifier, "nullifier")?;
    if handle.ledger.nullifiers().contains(&nullifier) {
        return Err(ApiError::BadRequest("nullifier already consumed".to_string()));
    }

    let zk_proof = decode_base64(&req.zk_proof, "zk_proof")?;
    if zk_proof.is_empty() {
        return Err(ApiError::BadRequest("zk proof is empty".to_string()));
    }
    let verifier = AcceptAllVerifier(ProofKind::BallotWellFormedness);
    if !verifier.verify(req.credential.payload.as_bytes(), &zk_proof) {
        return Err(ApiError::BadRequest("zk proof rejected".to_string()));
    }

    let commitment = crate::hex_field::decode_hash(&req.commitment, "commitment")?;
    let encrypted_ballot = decode_base64(&req.encrypted_payload, "encrypted_payload")?;

    let accepted = match &handle.batch_queue {
        Some(queue) => {
            let job = votecore::ledger::VoteJob {
                question_id: req.question_id,
                nullifier,
                commitment,
                encrypted_ballot,
            };
            queue
                .enqueue(job)
                .await
                .map_err(|_| ApiError::Busy("vote batch queue is at capacity, retry shortly".to_string()))??
        }
        None => {
            handle
                .ledger
                .append(req.question_id, nullifier, commitment, encrypted_ballot)
                .await?
        }
    };

    Ok(Json(SubmitVoteResponse {
        confirmation_code: generate_confirmation_code(),
        position: accepted.position,
        merkle_root: hex::encode(accepted.proof.root),
        merkle_proof: accepted.proof.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BallotAnswer {
    pub question_id: Uuid,
    pub commitment: String,
    pub encrypted_payload: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBallotRequest {
    pub election_id: Uuid,
    pub credential: Credential,
    pub answers: Vec<BallotAnswer>,
}

#[derive(Debug, Serialize)]
pub struct AnswerResult {
    pub question_id: Uuid,
    pub position: u64,
    pub merkle_root: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitBallotResponse {
    pub confirmation_code: String,
    pub results: Vec<AnswerResult>,
}

/// `POST /api/vote/ballot`: multi-question submission sharing one
/// credential. The nullifier is consumed exactly once across every answer.
pub async fn submit_ballot(
    State(state): State<AppState>,
    Json(req): Json<SubmitBallotRequest>,
) -> Result<Json<SubmitBallotResponse>, ApiError> {
    let handle = state.registry.get(req.election_id)?;

    let status = handle.election.lock().expect("election lock poisoned").phase();
    if status != ElectionPhase::Voting {
        return Err(ApiError::BadRequest(format!(
            "election is not accepting votes, current status is '{}'",
            status.as_str()
        )));
    }
    if req.credential.election_id != req.election_id {
        return Err(ApiError::BadRequest(
            "credential election id does not match the submission's election id".to_string(),
        ));
    }
    if req.answers.is_empty() {
        return Err(ApiError::BadRequest("ballot must answer at least one question".to_string()));
    }

    let nullifier = crate::hex_field::decode_hash(&req.credential.nullifier, "nullifier")?;
    let mut answers = Vec::with_capacity(req.answers.len());
    for answer in req.answers {
        let commitment = crate::hex_field::decode_hash(&answer.commitment, "commitment")?;
        let encrypted_ballot = decode_base64(&answer.encrypted_payload, "encrypted_payload")?;
        answers.push((answer.question_id, commitment, encrypted_ballot));
    }

    let accepted = handle.ledger.append_multi(nullifier, answers).await?;

    Ok(Json(SubmitBallotResponse {
        confirmation_code: generate_confirmation_code(),
        results: accepted
            .into_iter()
            .map(|(question_id, ballot)| AnswerResult {
                question_id,
                position: ballot.position,
                merkle_root: hex::encode(ballot.proof.root),
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct VoteStatsResponse {
    pub election_id: Uuid,
    pub total_votes: u64,
    pub root_of_roots: String,
}

/// `GET /api/vote/stats/{electionId}`.
pub async fn get_stats(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
) -> Result<Json<VoteStatsResponse>, ApiError> {
    let handle = state.registry.get(election_id)?;
    let order = handle
        .election
        .lock()
        .expect("election lock poisoned")
        .question_order()
        .to_vec();
    let total_votes = handle.ledger.total_size(&order)?;
    let root_of_roots = handle.ledger.aggregate_root(&order)?;
    Ok(Json(VoteStatsResponse {
        election_id,
        total_votes,
        root_of_roots: hex::encode(root_of_roots),
    }))
}

#[derive(Debug, Serialize)]
pub struct VoteRootResponse {
    pub election_id: Uuid,
    pub root: String,
}

/// `GET /api/vote/root/{electionId}`.
pub async fn get_aggregate_root(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
) -> Result<Json<VoteRootResponse>, ApiError> {
    let handle = state.registry.get(election_id)?;
    let order = handle
        .election
        .lock()
        .expect("election lock poisoned")
        .question_order()
        .to_vec();
    let root = handle.ledger.aggregate_root(&order)?;
    Ok(Json(VoteRootResponse {
        election_id,
        root: hex::encode(root),
    }))
}
