use thiserror::Error;

/// Errors surfaced by the Change-Request Gate (§4.E), matching the
/// `AuthError` / `ValidationError` / `NotFound` / `StateConflict` taxonomy
/// entries of §7.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error(transparent)]
    Validation(#[from] sync_registry::ValidationError),

    #[error("change request not found: {0}")]
    NotFound(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("malformed change request payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] sync_store::StoreError),
}
