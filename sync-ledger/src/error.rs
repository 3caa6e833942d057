use thiserror::Error;

/// Errors surfaced by [`crate::LedgerStore`] operations, matching the
/// `LedgerConflict` / `StorageUnavailable` taxonomy entries of §7.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger conflict: expected last_seq {expected}, observed {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error("ledger storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] sync_atom::AtomError),
}
