//! The HTTP boundary's single error type (§7), grounded directly on this
//! codebase's identity-error pattern: one enum, a machine-readable `code()`,
//! a `status_code()`, and an `IntoResponse` impl returning
//! `{error, message, reason?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] sync_registry::ValidationError),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("refresh token is invalid, expired, or already rotated")]
    InvalidRefreshToken,

    #[error("{0} may not decide this change request")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{reason}")]
    StateConflict { reason: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::InvalidCredentials | Self::InvalidRefreshToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StateConflict { .. } => StatusCode::CONFLICT,
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<sync_store::StoreError> for ApiError {
    fn from(e: sync_store::StoreError) -> Self {
        use sync_store::StoreError;
        match e {
            StoreError::OwnerAlreadyAssigned { .. } => ApiError::StateConflict { reason: e.to_string() },
            StoreError::UniqueViolation { .. } => ApiError::StateConflict { reason: e.to_string() },
            StoreError::ChangeRequestNotFound(id) => ApiError::NotFound(id),
            StoreError::ChangeRequestNotPending { .. } => ApiError::StateConflict { reason: e.to_string() },
            StoreError::Ledger(_) => ApiError::StorageUnavailable(e.to_string()),
            StoreError::StorageUnavailable(msg) => ApiError::StorageUnavailable(msg),
        }
    }
}

impl From<sync_gate::GateError> for ApiError {
    fn from(e: sync_gate::GateError) -> Self {
        use sync_gate::GateError;
        match e {
            GateError::NotAllowed(who) => ApiError::Forbidden(who),
            GateError::Validation(v) => ApiError::Validation(v),
            GateError::NotFound(id) => ApiError::NotFound(id),
            GateError::UnknownTable(t) => ApiError::BadRequest(format!("unknown table: {t}")),
            GateError::Serialization(err) => ApiError::BadRequest(err.to_string()),
            GateError::Store(store_err) => store_err.into(),
        }
    }
}

impl From<sync_protocol::ProtocolError> for ApiError {
    fn from(e: sync_protocol::ProtocolError) -> Self {
        use sync_protocol::ProtocolError;
        match e {
            ProtocolError::Store(store_err) => store_err.into(),
            ProtocolError::Gate(gate_err) => gate_err.into(),
            ProtocolError::Serialization(err) => ApiError::BadRequest(err.to_string()),
            ProtocolError::UnknownTable(t) => ApiError::BadRequest(format!("unknown table: {t}")),
            ProtocolError::PushTooLarge { table, limit, actual } => ApiError::StateConflict {
                reason: format!("push payload exceeds {limit} rows for table {table} (got {actual})"),
            },
        }
    }
}
