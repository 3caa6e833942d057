use thiserror::Error;

/// Errors surfaced by push/pull orchestration, matching the
/// `StorageUnavailable` / `StateConflict` taxonomy entries of §7. Per-row
/// validation failures are never represented here — they are reported
/// inline in [`crate::PushResponse::errors`] so a partial batch can still
/// succeed.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Store(#[from] sync_store::StoreError),

    #[error(transparent)]
    Gate(#[from] sync_gate::GateError),

    #[error("malformed row payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("push payload exceeds {limit} rows for table {table} (got {actual})")]
    PushTooLarge {
        table: String,
        limit: u32,
        actual: u32,
    },
}
