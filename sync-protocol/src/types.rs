//! Wire-shaped request/response types for `/sync/push` and `/sync/pull`
//! (§6), independent of any particular HTTP framework.

use serde::{Deserialize, Serialize};
use sync_model::row::WireRow;

/// One table's slice of an incoming push (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableUpserts {
    pub table: String,
    pub rows: Vec<WireRow>,
}

/// `POST /sync/push` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub client_id: String,
    pub upserts: Vec<TableUpserts>,
}

/// One row that failed validation or a domain rule (§4.D step 3, §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushError {
    pub table: String,
    pub id: String,
    pub reason: String,
}

/// One row that was deflected into a change request instead of being
/// applied (§4.D step 3, §9's open question: kept distinct from `applied`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeflectedRow {
    pub table: String,
    pub id: String,
    pub change_request_id: String,
}

/// `POST /sync/push` response body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushResponse {
    pub applied: u64,
    pub errors: Vec<PushError>,
    pub deflected: Vec<DeflectedRow>,
}

/// `GET /sync/pull` request parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PullRequest {
    pub cursor_seq: i64,
    pub limit: Option<u32>,
}

/// One table's slice of a pull response, rows in `change_log` order (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTableChanges {
    pub table: String,
    pub rows: Vec<WireRow>,
}

/// `GET /sync/pull` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<WireTableChanges>,
    pub next_cursor: i64,
    pub has_more: bool,
}
