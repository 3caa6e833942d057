//! The server-side bookkeeping entities that make sync and moderation work:
//! row ownership, the outbound change log, and change requests.

use serde::{Deserialize, Serialize};

/// The kind of mutation a [`ChangeLogRow`] or [`crate::ledger::LedgerEntry`]
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

/// Assigns a custodian to each mutable row. Set on creation, immutable
/// thereafter (invariant 7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOwner {
    pub table_name: String,
    pub row_id: String,
    pub user_id: String,
    pub username: String,
    pub created_at: i64,
}

/// The pull-side outbound log produced by the Authoritative Store.
/// Monotonically numbered by `server_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogRow {
    pub server_seq: i64,
    pub table_name: String,
    pub row_id: String,
    pub op: ChangeOp,
    pub payload_json: String,
    pub created_at: i64,
}

/// The lifecycle state of a [`ChangeRequest`] (§4.E). `pending` is the only
/// non-terminal state; `applied`/`rejected` are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Applied,
    Rejected,
}

/// A pending proposal for a change to a foreign-owned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: String,
    pub table_name: String,
    pub row_id: String,
    pub before_json: Option<String>,
    pub after_json: String,
    pub change_author_id: String,
    pub change_author_username: String,
    pub record_owner_id: String,
    pub record_owner_username: String,
    pub status: ChangeRequestStatus,
    pub decided_at: Option<i64>,
    pub decided_by: Option<String>,
    pub note: Option<String>,
    pub created_at: i64,
}
