//! HTTP-facing error type. Mirrors the teacher indexer's split of an inner
//! `thiserror` enum carrying the real cause from an outer `anyhow` glue
//! layer, but here the inner enum also knows how to render itself as an
//! HTTP status, since that's the one thing a route handler needs beyond
//! what `votecore`'s own errors already say.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use votecore::ceremony::decryption::DecryptionError;
use votecore::ceremony::threshold::ThresholdError;
use votecore::election::ElectionError;
use votecore::ledger::LedgerError;
use votecore::CoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Busy(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Ledger(e) => ApiError::Ledger(e),
            CoreError::Election(e) => ApiError::Election(e),
            CoreError::Threshold(e) => ApiError::Threshold(e),
            CoreError::Decryption(e) => ApiError::Decryption(e),
            CoreError::UnknownElection(id) => ApiError::NotFound(format!("election {id} not found")),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ledger(LedgerError::DoubleVote) => StatusCode::CONFLICT,
            ApiError::Ledger(LedgerError::UnknownQuestion(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Election(_) => StatusCode::CONFLICT,
            ApiError::Threshold(_) => StatusCode::CONFLICT,
            ApiError::Decryption(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
