//! The Authoritative Store (§4.C): the server-side relational projection of
//! the ledger. Guards domain invariants and emits `change_log` rows for
//! pull.

mod error;
mod memory;
mod pg;
mod types;

pub use error::StoreError;
pub use memory::InMemoryAuthoritativeStore;
pub use pg::PgAuthoritativeStore;
pub use types::{AppliedChange, NewChangeRequest, PullPage, TableChanges, WriteInput, WriteOutcome};

use async_trait::async_trait;
use sync_model::actor::Actor;
use sync_model::row::DbRow;
use sync_model::sync::{ChangeRequest, ChangeRequestStatus, RowOwner};

/// The Authoritative Store's operations (§4.C), implemented by a production
/// PostgreSQL-backed store and an in-memory fake shared by every other
/// crate's tests.
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Apply every input inside one transaction: merge `updated_at`,
    /// UPSERT, append to the ledger, emit `change_log` rows, touch parent
    /// rows, and record first-write ownership (§4.C's five steps).
    async fn write_sync_changes(
        &self,
        inputs: Vec<WriteInput>,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError>;

    /// Read `change_log` where `server_seq > cursor_seq`, ordered
    /// ascending, capped by `limit`, grouped by table preserving order,
    /// deduplicated by `(table, row_id)` keeping the last occurrence.
    async fn query_pull_since(&self, cursor_seq: i64, limit: u32) -> Result<PullPage, StoreError>;

    /// The custodian of a row, if one has been assigned.
    async fn row_owner(&self, table_name: &str, row_id: &str) -> Result<Option<RowOwner>, StoreError>;

    /// The row's current stored state, if it exists.
    async fn current_row(&self, table_name: &str, row_id: &str) -> Result<Option<DbRow>, StoreError>;

    /// Create a new pending change request (§4.E step 5).
    async fn create_change_request(
        &self,
        request: NewChangeRequest,
    ) -> Result<ChangeRequest, StoreError>;

    async fn get_change_request(&self, id: &str) -> Result<Option<ChangeRequest>, StoreError>;

    /// List change requests, optionally filtered by status, newest first.
    async fn list_change_requests(
        &self,
        status: Option<ChangeRequestStatus>,
        limit: u32,
    ) -> Result<Vec<ChangeRequest>, StoreError>;

    /// Apply a pending change request: writes `row` via
    /// [`AuthoritativeStore::write_sync_changes`] and marks the request
    /// `applied`, atomically. Fails with
    /// [`StoreError::ChangeRequestNotPending`] if it is not `pending`.
    async fn apply_change_request(
        &self,
        id: &str,
        row: WriteInput,
        decider: &Actor,
    ) -> Result<WriteOutcome, StoreError>;

    /// Reject a pending change request. No ledger or `change_log` write.
    async fn reject_change_request(
        &self,
        id: &str,
        decider: &Actor,
        note: Option<String>,
    ) -> Result<(), StoreError>;
}

/// Whether the moderation UI should hide `after` as timestamp-only churn
/// relative to `before` for `table_name` (§4.D's noise filter, §9's open
/// question: unknown tables default to "show everything", i.e. never
/// suppressed).
pub fn suppress_noise(table_name: &str, before: &DbRow, after: &DbRow) -> bool {
    match sync_registry::table(table_name) {
        Some(def) => !def.differs_outside_noise_filter(before, after),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suppress_noise_hides_timestamp_only_churn_on_entity_types() {
        let before = DbRow(
            json!({"code": "engine", "name": "Engine", "deleted_at": null, "updated_at": 1})
                .as_object()
                .unwrap()
                .clone(),
        );
        let after = DbRow(
            json!({"code": "engine", "name": "Engine", "deleted_at": null, "updated_at": 2})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert!(suppress_noise("entity_types", &before, &after));
    }

    #[test]
    fn suppress_noise_defaults_to_show_everything_for_unknown_tables() {
        let before = DbRow(json!({"a": 1}).as_object().unwrap().clone());
        let after = DbRow(json!({"a": 2}).as_object().unwrap().clone());
        assert!(!suppress_noise("not_a_real_table", &before, &after));
    }
}
