//! A `tokio::sync::Mutex`-backed fake implementation of
//! [`crate::AuthoritativeStore`], used throughout this workspace's tests in
//! place of a live PostgreSQL instance. A `tokio` mutex (not `std`'s) is used
//! deliberately: the guard is held across `.append().await` on the injected
//! ledger, which a `std::sync::MutexGuard` cannot soundly do.

use crate::error::StoreError;
use crate::types::{AppliedChange, NewChangeRequest, PullPage, TableChanges, WriteInput, WriteOutcome};
use crate::AuthoritativeStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use sync_ledger::{AppendRequest, LedgerStore};
use sync_model::actor::Actor;
use sync_model::clock::Clock;
use sync_model::ledger::TxPayload;
use sync_model::row::DbRow;
use sync_model::sync::{ChangeLogRow, ChangeOp, ChangeRequest, ChangeRequestStatus, RowOwner};
use uuid::Uuid;

#[derive(Default)]
struct State {
    rows: HashMap<(String, String), DbRow>,
    owners: HashMap<(String, String), RowOwner>,
    change_log: Vec<ChangeLogRow>,
    change_requests: HashMap<String, ChangeRequest>,
}

pub struct InMemoryAuthoritativeStore {
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    state: tokio::sync::Mutex<State>,
}

impl InMemoryAuthoritativeStore {
    pub fn new(ledger: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            clock,
            state: tokio::sync::Mutex::new(State::default()),
        }
    }

    /// Check every `unique_when_live` constraint the registry declares for
    /// `table_name` against `candidate`, excluding `row_id` itself
    /// (invariant 1). Soft-deleted rows (`deleted_at` set) never conflict.
    fn check_uniqueness(
        state: &State,
        table_name: &str,
        row_id: &str,
        candidate: &DbRow,
    ) -> Result<(), StoreError> {
        let Some(def) = sync_registry::table(table_name) else {
            return Ok(());
        };
        for key_fields in def.unique_when_live {
            let candidate_key: Vec<Option<&serde_json::Value>> =
                key_fields.iter().map(|f| candidate.get(f)).collect();
            for ((t, id), row) in state.rows.iter() {
                if t != table_name || id == row_id {
                    continue;
                }
                if row.get("deleted_at").map(|v| !v.is_null()).unwrap_or(false) {
                    continue;
                }
                let existing_key: Vec<Option<&serde_json::Value>> =
                    key_fields.iter().map(|f| row.get(f)).collect();
                if existing_key == candidate_key {
                    return Err(StoreError::UniqueViolation {
                        table_name: table_name.to_string(),
                        detail: format!("{:?} already in use", key_fields),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bump the parent row's `updated_at` and emit a synthetic
    /// `change_log` row for it, if `table_name` declares a parent
    /// (§4.C step 4).
    async fn touch_parent(
        state: &mut State,
        ledger: &Arc<dyn LedgerStore>,
        now: i64,
        table_name: &str,
        child_row: &DbRow,
        actor: &Actor,
        applied: &mut Vec<AppliedChange>,
    ) -> Result<(), StoreError> {
        let Some(def) = sync_registry::table(table_name) else {
            return Ok(());
        };
        let Some(parent) = def.parent else {
            return Ok(());
        };
        let Some(parent_id) = child_row.get_str(parent.fk_field).map(str::to_owned) else {
            return Ok(());
        };
        let key = (parent.table.to_string(), parent_id.clone());
        let Some(parent_row) = state.rows.get_mut(&key) else {
            return Ok(());
        };
        parent_row.set("updated_at", serde_json::json!(now));
        let payload_json = serde_json::to_string(&parent_row.0)
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let entries = ledger
            .append(AppendRequest {
                expected_last_seq: None,
                txs: vec![TxPayload {
                    table_name: parent.table.to_string(),
                    row_id: parent_id.clone(),
                    op: ChangeOp::Upsert,
                    payload_json: payload_json.clone(),
                    actor: actor.clone(),
                    ts: now,
                }],
            })
            .await?;
        let server_seq = entries[0].seq as i64;

        state.change_log.push(ChangeLogRow {
            server_seq,
            table_name: parent.table.to_string(),
            row_id: parent_id.clone(),
            op: ChangeOp::Upsert,
            payload_json,
            created_at: now,
        });
        applied.push(AppliedChange {
            table_name: parent.table.to_string(),
            row_id: parent_id,
            server_seq,
        });
        Ok(())
    }

    async fn write_locked(
        state: &mut State,
        ledger: &Arc<dyn LedgerStore>,
        now: i64,
        inputs: Vec<WriteInput>,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let mut applied = Vec::new();

        for input in inputs {
            let key = (input.table_name.clone(), input.row_id.clone());
            let existing = state.rows.get(&key).cloned();

            // Invariant 6 / last-writer-wins (§4.C step 1, §8 scenario 2): a
            // stale incoming row whose own `updated_at` trails the row
            // already stored must not clobber it, regardless of arrival
            // order.
            let incoming_updated_at = input.row.get_i64("updated_at").unwrap_or(now);
            let stored_is_newer = existing
                .as_ref()
                .and_then(|e| e.get_i64("updated_at"))
                .is_some_and(|existing_updated_at| existing_updated_at > incoming_updated_at);

            let row = if stored_is_newer {
                existing.clone().expect("stored_is_newer implies existing is Some")
            } else {
                let mut row = input.row.clone();
                let created_at = existing
                    .as_ref()
                    .and_then(|e| e.get_i64("created_at"))
                    .unwrap_or(now);
                row.set("created_at", serde_json::json!(created_at));
                row.set("updated_at", serde_json::json!(incoming_updated_at.max(now)));

                if matches!(input.op, ChangeOp::Delete) {
                    row.set("deleted_at", serde_json::json!(now));
                }
                row
            };

            Self::check_uniqueness(state, &input.table_name, &input.row_id, &row)?;

            let payload_json = serde_json::to_string(&row.0)
                .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

            let entries = ledger
                .append(AppendRequest {
                    expected_last_seq: None,
                    txs: vec![TxPayload {
                        table_name: input.table_name.clone(),
                        row_id: input.row_id.clone(),
                        op: input.op,
                        payload_json: payload_json.clone(),
                        actor: actor.clone(),
                        ts: now,
                    }],
                })
                .await?;
            let server_seq = entries[0].seq as i64;

            state.rows.insert(key.clone(), row.clone());
            state.change_log.push(ChangeLogRow {
                server_seq,
                table_name: input.table_name.clone(),
                row_id: input.row_id.clone(),
                op: input.op,
                payload_json,
                created_at: now,
            });
            applied.push(AppliedChange {
                table_name: input.table_name.clone(),
                row_id: input.row_id.clone(),
                server_seq,
            });

            if !state.owners.contains_key(&key) {
                state.owners.insert(
                    key,
                    RowOwner {
                        table_name: input.table_name.clone(),
                        row_id: input.row_id.clone(),
                        user_id: actor.user_id.clone(),
                        username: actor.username.clone(),
                        created_at: now,
                    },
                );
            }

            Self::touch_parent(state, ledger, now, &input.table_name, &row, actor, &mut applied).await?;
        }

        Ok(WriteOutcome { applied })
    }
}

#[async_trait]
impl AuthoritativeStore for InMemoryAuthoritativeStore {
    async fn write_sync_changes(
        &self,
        inputs: Vec<WriteInput>,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        Self::write_locked(&mut state, &self.ledger, now, inputs, actor).await
    }

    async fn query_pull_since(&self, cursor_seq: i64, limit: u32) -> Result<PullPage, StoreError> {
        let state = self.state.lock().await;

        let mut window: Vec<&ChangeLogRow> = state
            .change_log
            .iter()
            .filter(|row| row.server_seq > cursor_seq)
            .collect();
        window.sort_by_key(|row| row.server_seq);

        let has_more = window.len() > limit as usize;
        window.truncate(limit as usize);

        let next_cursor = window
            .last()
            .map(|row| row.server_seq)
            .unwrap_or(cursor_seq);

        // Dedup by (table, row_id) keeping the *last* occurrence, while
        // preserving the ascending-seq order of that last occurrence.
        let mut last_index: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, row) in window.iter().enumerate() {
            last_index.insert((row.table_name.as_str(), row.row_id.as_str()), i);
        }
        let mut kept_indices: Vec<usize> = last_index.values().copied().collect();
        kept_indices.sort_unstable();

        let mut by_table: Vec<(String, Vec<DbRow>)> = Vec::new();
        for idx in kept_indices {
            let row = window[idx];
            let db_row = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(
                &row.payload_json,
            )
            .map(DbRow)
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

            match by_table.iter_mut().find(|(t, _)| t == &row.table_name) {
                Some((_, rows)) => rows.push(db_row),
                None => by_table.push((row.table_name.clone(), vec![db_row])),
            }
        }

        Ok(PullPage {
            changes: by_table
                .into_iter()
                .map(|(table_name, rows)| TableChanges { table_name, rows })
                .collect(),
            next_cursor,
            has_more,
        })
    }

    async fn row_owner(&self, table_name: &str, row_id: &str) -> Result<Option<RowOwner>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .owners
            .get(&(table_name.to_string(), row_id.to_string()))
            .cloned())
    }

    async fn current_row(&self, table_name: &str, row_id: &str) -> Result<Option<DbRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .get(&(table_name.to_string(), row_id.to_string()))
            .cloned())
    }

    async fn create_change_request(
        &self,
        request: NewChangeRequest,
    ) -> Result<ChangeRequest, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        let cr = ChangeRequest {
            id: Uuid::new_v4().to_string(),
            table_name: request.table_name,
            row_id: request.row_id,
            before_json: request.before_json,
            after_json: request.after_json,
            change_author_id: request.change_author.user_id,
            change_author_username: request.change_author.username,
            record_owner_id: request.record_owner_id,
            record_owner_username: request.record_owner_username,
            status: ChangeRequestStatus::Pending,
            decided_at: None,
            decided_by: None,
            note: None,
            created_at: now,
        };
        state.change_requests.insert(cr.id.clone(), cr.clone());
        Ok(cr)
    }

    async fn get_change_request(&self, id: &str) -> Result<Option<ChangeRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.change_requests.get(id).cloned())
    }

    async fn list_change_requests(
        &self,
        status: Option<ChangeRequestStatus>,
        limit: u32,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let state = self.state.lock().await;
        let mut items: Vec<ChangeRequest> = state
            .change_requests
            .values()
            .filter(|cr| status.map(|s| cr.status == s).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by_key(|cr| std::cmp::Reverse(cr.created_at));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn apply_change_request(
        &self,
        id: &str,
        row: WriteInput,
        decider: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        let cr = state
            .change_requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ChangeRequestNotFound(id.to_string()))?;
        if cr.status != ChangeRequestStatus::Pending {
            return Err(StoreError::ChangeRequestNotPending {
                id: id.to_string(),
                status: format!("{:?}", cr.status),
            });
        }

        let outcome = Self::write_locked(&mut state, &self.ledger, now, vec![row], decider).await?;

        if let Some(cr) = state.change_requests.get_mut(id) {
            cr.status = ChangeRequestStatus::Applied;
            cr.decided_at = Some(now);
            cr.decided_by = Some(decider.user_id.clone());
        }

        Ok(outcome)
    }

    async fn reject_change_request(
        &self,
        id: &str,
        decider: &Actor,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        let cr = state
            .change_requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ChangeRequestNotFound(id.to_string()))?;
        if cr.status != ChangeRequestStatus::Pending {
            return Err(StoreError::ChangeRequestNotPending {
                id: id.to_string(),
                status: format!("{:?}", cr.status),
            });
        }

        let cr = state.change_requests.get_mut(id).unwrap();
        cr.status = ChangeRequestStatus::Rejected;
        cr.decided_at = Some(now);
        cr.decided_by = Some(decider.user_id.clone());
        cr.note = note;
        Ok(())
    }
}
