//! Request/response shapes for [`crate::AuthoritativeStore`], independent of
//! any particular wire or storage encoding — the registry is what converts
//! [`sync_model::row::WireRow`] to the [`sync_model::row::DbRow`] carried
//! here.

use sync_model::actor::Actor;
use sync_model::row::DbRow;
use sync_model::sync::{ChangeOp, ChangeRequestStatus};

/// One row `writeSyncChanges` (§4.C) is asked to apply.
#[derive(Debug, Clone)]
pub struct WriteInput {
    pub table_name: String,
    pub row_id: String,
    pub op: ChangeOp,
    /// The proposed storage-shape row. For a delete, only `id`/`deleted_at`
    /// need be meaningful; the store still merges `updated_at` per
    /// invariant 6.
    pub row: DbRow,
}

/// One row actually written by a `writeSyncChanges` call, including
/// synthetic parent touches (§4.C step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub table_name: String,
    pub row_id: String,
    pub server_seq: i64,
}

/// The result of one `writeSyncChanges` call.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub applied: Vec<AppliedChange>,
}

/// One table's slice of a pull response, rows in `change_log` order.
#[derive(Debug, Clone)]
pub struct TableChanges {
    pub table_name: String,
    pub rows: Vec<DbRow>,
}

/// The result of `queryPullSince` (§4.C).
#[derive(Debug, Clone)]
pub struct PullPage {
    pub changes: Vec<TableChanges>,
    pub next_cursor: i64,
    pub has_more: bool,
}

/// Input to create a new pending [`sync_model::sync::ChangeRequest`] (§4.E
/// step 5).
#[derive(Debug, Clone)]
pub struct NewChangeRequest {
    pub table_name: String,
    pub row_id: String,
    pub before_json: Option<String>,
    pub after_json: String,
    pub change_author: Actor,
    pub record_owner_id: String,
    pub record_owner_username: String,
}

/// A decided change request's terminal state, used by
/// `AuthoritativeStore::apply_change_request`/`reject_change_request` to
/// check it is still actionable.
pub fn is_terminal(status: ChangeRequestStatus) -> bool {
    !matches!(status, ChangeRequestStatus::Pending)
}
