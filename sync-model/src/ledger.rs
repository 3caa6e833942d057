//! The immutable ledger entry and checkpoint shapes, plus the unsigned
//! payload a caller hands to the Ledger Store's `append`.

use crate::actor::Actor;
use crate::sync::ChangeOp;
use serde::{Deserialize, Serialize};

/// One transaction offered to the Ledger Store's `append` (§4.A). The store
/// assigns `seq`, `prev_hash`, `tx_hash`, and `sig`; everything else is
/// supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPayload {
    pub table_name: String,
    pub row_id: String,
    pub op: ChangeOp,
    /// Canonical JSON of the full row being written (or of `{"id": ...}` for
    /// a delete), serialized as a string to match the wire format's
    /// convention for JSON payload fields.
    pub payload_json: String,
    pub actor: Actor,
    pub ts: i64,
}

/// An immutable, hash-chained, signed record of one accepted transaction.
///
/// Layout matches §6's on-disk/in-table representation:
/// `{ seq, ts, op, table, row_id, row, actor, prev_hash, tx_hash, sig }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub ts: i64,
    pub op: ChangeOp,
    pub table_name: String,
    pub row_id: String,
    pub payload_json: String,
    pub actor: Actor,
    pub prev_hash: String,
    pub tx_hash: String,
    pub sig: String,
}

/// A periodic attestation that the ledger up to `last_seq` hashes to
/// `digest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_seq: u64,
    pub digest: String,
    pub created_at: i64,
    pub sig: String,
}
