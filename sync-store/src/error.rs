use thiserror::Error;

/// Errors surfaced by [`crate::AuthoritativeStore`] operations, matching the
/// `StateConflict` / `StorageUnavailable` / `NotFound` taxonomy entries of
/// §7.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row owner already assigned for {table_name}/{row_id}")]
    OwnerAlreadyAssigned { table_name: String, row_id: String },

    #[error("unique constraint violated on {table_name}: {detail}")]
    UniqueViolation { table_name: String, detail: String },

    #[error("change request not found: {0}")]
    ChangeRequestNotFound(String),

    #[error("change request {id} is no longer pending (status: {status})")]
    ChangeRequestNotPending { id: String, status: String },

    #[error(transparent)]
    Ledger(#[from] sync_ledger::LedgerError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}
