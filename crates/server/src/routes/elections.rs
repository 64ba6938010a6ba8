//! Election lifecycle routes (C8): creation, the read model, and the
//! single generic status-transition endpoint. One `PATCH .../status`
//! handler rather than a route per edge keeps the legal-transition graph
//! (§4.7) in exactly one place instead of scattered across handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use votecore::blob::InMemoryBlobWriter;
use votecore::ceremony::threshold::CeremonyPhase;
use votecore::election::{BallotQuestion, Candidate, ElectionPhase, QuestionKind};
use votecore::registry::ElectionHandle;

#[derive(Debug, Deserialize)]
pub struct CandidateInput {
    pub display_name: String,
    pub description: Option<String>,
}

fn default_kind() -> String {
    "single".to_string()
}

#[derive(Debug, Deserialize)]
pub struct QuestionInput {
    pub title: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub max_selections: Option<u8>,
    pub candidates: Vec<CandidateInput>,
}

fn parse_kind(s: &str) -> Result<QuestionKind, ApiError> {
    match s {
        "single" => Ok(QuestionKind::Single),
        "multi" => Ok(QuestionKind::Multi),
        "ranked" => Ok(QuestionKind::Ranked),
        "yes_no" => Ok(QuestionKind::YesNo),
        "write_in" => Ok(QuestionKind::WriteIn),
        other => Err(ApiError::BadRequest(format!("unknown question kind '{other}'"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateElectionRequest {
    pub title: String,
    pub threshold: u16,
    pub total_trustees: u16,
    #[serde(default)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Serialize)]
pub struct QuestionSummary {
    pub id: Uuid,
    pub title: String,
    pub candidate_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ElectionResponse {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub threshold: u16,
    pub total_trustees: u16,
    pub trustee_count: usize,
    pub questions: Vec<QuestionSummary>,
    pub ceremony_phase: String,
    pub public_key: Option<String>,
}

fn unix_timestamp_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
}

fn ceremony_phase_name(phase: CeremonyPhase) -> &'static str {
    match phase {
        CeremonyPhase::Created => "created",
        CeremonyPhase::Registration => "registration",
        CeremonyPhase::Commitment => "commitment",
        CeremonyPhase::Finalized => "finalized",
    }
}

fn build_response(handle: &ElectionHandle) -> ElectionResponse {
    let election = handle.election.lock().expect("election lock poisoned");
    let ceremony = handle.key_ceremony.lock().expect("key ceremony lock poisoned");
    let (ceremony_phase, public_key) = match ceremony.as_ref() {
        Some(c) => (
            ceremony_phase_name(c.phase()).to_string(),
            c.public_key().map(|pk| hex::encode(pk.compress().as_bytes())),
        ),
        None => ("created".to_string(), None),
    };
    ElectionResponse {
        id: election.id,
        title: election.title.clone(),
        status: election.phase().as_str().to_string(),
        threshold: election.threshold,
        total_trustees: election.total_trustees,
        trustee_count: election.trustees().len(),
        questions: election
            .questions()
            .map(|q| QuestionSummary {
                id: q.id,
                title: q.title.clone(),
                candidate_count: q.candidates.len(),
            })
            .collect(),
        ceremony_phase,
        public_key,
    }
}

pub async fn create_election(
    State(state): State<AppState>,
    Json(req): Json<CreateElectionRequest>,
) -> Result<Json<ElectionResponse>, ApiError> {
    let blobs = std::sync::Arc::new(InMemoryBlobWriter::new(state.config.blob_backlog_limit));
    let batch_config = votecore::batch::BatchConfig {
        batch_size: state.config.batch_size,
        flush_interval: state.config.batch_flush_interval,
        backlog_limit: state.config.batch_backlog_limit,
    };
    let id = state.registry.create_election(
        req.title.clone(),
        req.threshold,
        req.total_trustees,
        blobs,
        batch_config,
        state.config.batch_enabled,
    )?;
    let handle = state.registry.get(id)?;

    {
        let mut election = handle.election.lock().expect("election lock poisoned");
        for (i, q) in req.questions.into_iter().enumerate() {
            let kind = parse_kind(&q.kind)?;
            let max_selections = kind.fixed_max_selections().unwrap_or(q.max_selections.unwrap_or(1));
            let candidates = q
                .candidates
                .into_iter()
                .map(|c| Candidate {
                    id: Uuid::new_v4(),
                    display_name: c.display_name,
                    description: c.description,
                })
                .collect();
            let question_id = Uuid::new_v4();
            election.add_question(BallotQuestion {
                id: question_id,
                title: q.title,
                kind,
                max_selections,
                candidates,
                display_order: i as u32,
            })?;
            handle.ledger.register_question(question_id);
        }
    }

    Ok(Json(build_response(&handle)))
}

pub async fn get_election(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
) -> Result<Json<ElectionResponse>, ApiError> {
    let handle = state.registry.get(election_id)?;
    Ok(Json(build_response(&handle)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// `PATCH /api/elections/{id}/status`: the only way an election's phase
/// moves. Transitions not on the §4.7 graph come back as a 400, matching
/// the "Illegal transition" scenario rather than a generic conflict.
pub async fn update_status(
    State(state): State<AppState>,
    Path(election_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ElectionResponse>, ApiError> {
    let target = ElectionPhase::parse(&req.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{}'", req.status)))?;
    let handle = state.registry.get(election_id)?;
    let current = handle.election.lock().expect("election lock poisoned").phase();

    match (current, target) {
        (ElectionPhase::Setup, ElectionPhase::Draft) => {
            let finalized = matches!(
                handle
                    .key_ceremony
                    .lock()
                    .expect("key ceremony lock poisoned")
                    .as_ref()
                    .map(|c| c.phase()),
                Some(CeremonyPhase::Finalized)
            );
            handle
                .election
                .lock()
                .expect("election lock poisoned")
                .open_draft(finalized)?;
        }
        (ElectionPhase::Draft, ElectionPhase::Registration) => {
            handle
                .election
                .lock()
                .expect("election lock poisoned")
                .open_registration()?;
        }
        (ElectionPhase::Registration, ElectionPhase::Voting) => {
            handle
                .election
                .lock()
                .expect("election lock poisoned")
                .start_voting()?;

            let (public_key, threshold, total_trustees) = {
                let election = handle.election.lock().expect("election lock poisoned");
                let ceremony = handle.key_ceremony.lock().expect("key ceremony lock poisoned");
                let public_key = ceremony
                    .as_ref()
                    .and_then(|c| c.public_key())
                    .map(|pk| pk.compress().to_bytes().to_vec())
                    .unwrap_or_default();
                (public_key, election.threshold, election.total_trustees)
            };
            let fields = votecore::anchor::start_payload_fields(
                election_id,
                &public_key,
                threshold,
                total_trustees,
                unix_timestamp_now(),
            );
            match state
                .anchor_orchestrator
                .anchor(
                    votecore::anchor::AnchorKind::ElectionStart,
                    election_id,
                    votecore::anchor::payload_json(&fields),
                    votecore::anchor::payload_hash(&fields),
                )
                .await
            {
                Ok(record) => handle.anchors.lock().expect("anchors lock poisoned").push(record),
                Err(e) => tracing::warn!(election_id = %election_id, error = %e, "election-start anchoring failed"),
            }
        }
        (ElectionPhase::Voting, ElectionPhase::Tallying) => {
            handle
                .election
                .lock()
                .expect("election lock poisoned")
                .close_voting()?;
        }
        (ElectionPhase::Tallying, ElectionPhase::Complete) => {
            let completed = {
                let ceremonies = handle
                    .decryption_ceremonies
                    .lock()
                    .expect("decryption ceremonies lock poisoned");
                !ceremonies.is_empty()
                    && ceremonies
                        .values()
                        .all(|c| c.phase() == votecore::ceremony::decryption::DecryptionPhase::Completed)
            };
            handle
                .election
                .lock()
                .expect("election lock poisoned")
                .complete(completed)?;

            let order = handle
                .election
                .lock()
                .expect("election lock poisoned")
                .question_order()
                .to_vec();
            let root = handle.ledger.aggregate_root(&order)?;
            let vote_count = handle.ledger.total_size(&order)?;
            let fields = votecore::anchor::close_payload_fields(election_id, &root, vote_count, unix_timestamp_now());
            match state
                .anchor_orchestrator
                .anchor(
                    votecore::anchor::AnchorKind::ElectionClose,
                    election_id,
                    votecore::anchor::payload_json(&fields),
                    votecore::anchor::payload_hash(&fields),
                )
                .await
            {
                Ok(record) => handle.anchors.lock().expect("anchors lock poisoned").push(record),
                Err(e) => tracing::warn!(election_id = %election_id, error = %e, "election-close anchoring failed"),
            }
        }
        (from, to) => {
            return Err(ApiError::BadRequest(format!(
                "illegal transition from {} to {}",
                from.as_str(),
                to.as_str()
            )))
        }
    }

    Ok(Json(build_response(&handle)))
}
