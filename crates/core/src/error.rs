//! Crate-wide error type. Each module keeps its own narrow `thiserror` enum
//! (`MerkleError`, `ThresholdError`, `LedgerError`, ...); this one exists
//! for call sites — mainly the server crate's route handlers — that need
//! to fold any of them into a single `?`-friendly type.

use crate::ceremony::decryption::DecryptionError;
use crate::ceremony::threshold::ThresholdError;
use crate::election::ElectionError;
use crate::ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    #[error("election {0} not found")]
    UnknownElection(uuid::Uuid),
}
