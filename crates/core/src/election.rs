//! Election lifecycle (C8).
//!
//! Grounded on `programs/cloakcraft/src/state/ballot.rs` and
//! `state/committee.rs` for the entity shapes (a question with fixed
//! options, a trustee roster), generalized from the teacher's single
//! on-chain ballot account into the full
//! `setup -> draft -> registration -> voting -> tallying -> complete`
//! lifecycle this system's elections go through end to end. Trustee
//! registration itself lives in the threshold ceremony (C4); this module
//! only mirrors committed trustees into a read model once the ceremony
//! reports them, and gates the `setup -> draft` edge on that ceremony
//! having finalized.

use crate::ceremony::threshold::TrusteeId;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Setup,
    Draft,
    Registration,
    Voting,
    Tallying,
    Complete,
}

impl ElectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionPhase::Setup => "setup",
            ElectionPhase::Draft => "draft",
            ElectionPhase::Registration => "registration",
            ElectionPhase::Voting => "voting",
            ElectionPhase::Tallying => "tallying",
            ElectionPhase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(ElectionPhase::Setup),
            "draft" => Some(ElectionPhase::Draft),
            "registration" => Some(ElectionPhase::Registration),
            "voting" => Some(ElectionPhase::Voting),
            "tallying" => Some(ElectionPhase::Tallying),
            "complete" => Some(ElectionPhase::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Single,
    Multi,
    Ranked,
    YesNo,
    WriteIn,
}

impl QuestionKind {
    /// `k = 1` is fixed for `single`/`yes_no`; other kinds take the
    /// caller-supplied `max_selections`.
    pub fn fixed_max_selections(&self) -> Option<u8> {
        match self {
            QuestionKind::Single | QuestionKind::YesNo => Some(1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BallotQuestion {
    pub id: Uuid,
    pub title: String,
    pub kind: QuestionKind,
    pub max_selections: u8,
    pub candidates: Vec<Candidate>,
    pub display_order: u32,
}

#[derive(Debug, Clone)]
pub struct Trustee {
    pub id: TrusteeId,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    #[error("election is in phase {from:?}, cannot transition directly to {to:?}")]
    IllegalTransition {
        from: ElectionPhase,
        to: ElectionPhase,
    },
    #[error("setup -> draft requires the key ceremony to have finalized first")]
    CeremonyNotFinalized,
    #[error("tallying -> complete requires the decryption ceremony to have completed first")]
    DecryptionNotCompleted,
    #[error("election must have at least one question before leaving registration")]
    NoQuestions,
    #[error("question with id {0} already exists")]
    DuplicateQuestion(Uuid),
    #[error("questions can only be added before voting opens")]
    NotEditable,
    #[error("question must have at least two candidates")]
    TooFewCandidates,
}

pub struct Election {
    pub id: Uuid,
    pub title: String,
    phase: ElectionPhase,
    questions: BTreeMap<Uuid, BallotQuestion>,
    question_order: Vec<Uuid>,
    trustees: Vec<Trustee>,
    pub threshold: u16,
    pub total_trustees: u16,
}

impl Election {
    pub fn new(id: Uuid, title: impl Into<String>, threshold: u16, total_trustees: u16) -> Self {
        Self {
            id,
            title: title.into(),
            phase: ElectionPhase::Setup,
            questions: BTreeMap::new(),
            question_order: Vec::new(),
            trustees: Vec::new(),
            threshold,
            total_trustees,
        }
    }

    pub fn phase(&self) -> ElectionPhase {
        self.phase
    }

    pub fn questions(&self) -> impl Iterator<Item = &BallotQuestion> {
        self.question_order.iter().filter_map(|id| self.questions.get(id))
    }

    pub fn question(&self, id: Uuid) -> Option<&BallotQuestion> {
        self.questions.get(&id)
    }

    pub fn question_order(&self) -> &[Uuid] {
        &self.question_order
    }

    pub fn trustees(&self) -> &[Trustee] {
        &self.trustees
    }

    /// Mirrors a trustee the threshold ceremony just accepted into this
    /// election's read model. Not gated on phase: the ceremony's own state
    /// machine is the source of truth for when registration is legal.
    pub fn record_trustee(&mut self, trustee: Trustee) {
        self.trustees.push(trustee);
    }

    fn require_editable(&self) -> Result<(), ElectionError> {
        match self.phase {
            ElectionPhase::Setup | ElectionPhase::Draft | ElectionPhase::Registration => Ok(()),
            _ => Err(ElectionError::NotEditable),
        }
    }

    pub fn add_question(&mut self, question: BallotQuestion) -> Result<(), ElectionError> {
        self.require_editable()?;
        if self.questions.contains_key(&question.id) {
            return Err(ElectionError::DuplicateQuestion(question.id));
        }
        if question.candidates.len() < 2 {
            return Err(ElectionError::TooFewCandidates);
        }
        self.question_order.push(question.id);
        self.questions.insert(question.id, question);
        Ok(())
    }

    /// `setup -> draft`, legal only once the key ceremony has finalized.
    pub fn open_draft(&mut self, ceremony_finalized: bool) -> Result<(), ElectionError> {
        if !ceremony_finalized {
            return Err(ElectionError::CeremonyNotFinalized);
        }
        self.transition(ElectionPhase::Setup, ElectionPhase::Draft)
    }

    /// `draft -> registration` (voter registration, not trustee registration).
    pub fn open_registration(&mut self) -> Result<(), ElectionError> {
        self.transition(ElectionPhase::Draft, ElectionPhase::Registration)
    }

    /// `registration -> voting`; instantiates per-question ledgers and
    /// triggers the start anchor at the caller's level.
    pub fn start_voting(&mut self) -> Result<(), ElectionError> {
        if self.question_order.is_empty() {
            return Err(ElectionError::NoQuestions);
        }
        self.transition(ElectionPhase::Registration, ElectionPhase::Voting)
    }

    /// `voting -> tallying`; starts the decryption ceremony at the caller's
    /// level.
    pub fn close_voting(&mut self) -> Result<(), ElectionError> {
        self.transition(ElectionPhase::Voting, ElectionPhase::Tallying)
    }

    /// `tallying -> complete`, legal only once the decryption ceremony has
    /// completed. Triggers the close anchor at the caller's level.
    pub fn complete(&mut self, decryption_completed: bool) -> Result<(), ElectionError> {
        if !decryption_completed {
            return Err(ElectionError::DecryptionNotCompleted);
        }
        self.transition(ElectionPhase::Tallying, ElectionPhase::Complete)
    }

    fn transition(&mut self, from: ElectionPhase, to: ElectionPhase) -> Result<(), ElectionError> {
        if self.phase != from {
            return Err(ElectionError::IllegalTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}
