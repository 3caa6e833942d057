//! PostgreSQL-backed [`crate::AuthoritativeStore`]. Rows are stored as one
//! generic `sync_row(table_name, row_id, data, created_at, updated_at)`
//! table rather than one relational table per registered business table:
//! the registry already owns each table's shape, so the store only needs a
//! place to keep `DbRow`'s JSON and a primary key to UPSERT against. This
//! mirrors the same JSONB-backed EAV storage this system's data model (§3)
//! already commits to for attribute values, generalized one level further.
//!
//! Every write goes through one `SERIALIZABLE` transaction that also calls
//! into [`sync_ledger::PgLedgerStore::append_within`], so the ledger append,
//! the row UPSERT, and the `change_log` insert commit or roll back together
//! (§4.C, §9).

use crate::error::StoreError;
use crate::types::{AppliedChange, NewChangeRequest, PullPage, TableChanges, WriteInput, WriteOutcome};
use crate::AuthoritativeStore;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use sync_ledger::{LedgerKeys, PgLedgerStore};
use sync_model::actor::Actor;
use sync_model::clock::now_ms;
use sync_model::ledger::TxPayload;
use sync_model::row::DbRow;
use sync_model::sync::{ChangeOp, ChangeRequest, ChangeRequestStatus, RowOwner};
use uuid::Uuid;

pub struct PgAuthoritativeStore {
    pool: PgPool,
    keys: LedgerKeys,
}

fn op_str(op: ChangeOp) -> &'static str {
    match op {
        ChangeOp::Upsert => "upsert",
        ChangeOp::Delete => "delete",
    }
}

fn op_from_str(s: &str) -> ChangeOp {
    if s == "delete" {
        ChangeOp::Delete
    } else {
        ChangeOp::Upsert
    }
}

fn status_str(status: ChangeRequestStatus) -> &'static str {
    match status {
        ChangeRequestStatus::Pending => "pending",
        ChangeRequestStatus::Applied => "applied",
        ChangeRequestStatus::Rejected => "rejected",
    }
}

fn status_from_str(s: &str) -> ChangeRequestStatus {
    match s {
        "applied" => ChangeRequestStatus::Applied,
        "rejected" => ChangeRequestStatus::Rejected,
        _ => ChangeRequestStatus::Pending,
    }
}

impl PgAuthoritativeStore {
    pub fn new(pool: PgPool, keys: LedgerKeys) -> Self {
        Self { pool, keys }
    }

    async fn fetch_row(
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        row_id: &str,
    ) -> Result<Option<DbRow>, StoreError> {
        let row = sqlx::query("SELECT data FROM sync_row WHERE table_name = $1 AND row_id = $2 FOR UPDATE")
            .bind(table_name)
            .bind(row_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(row.map(|r| {
            let data: serde_json::Value = r.get("data");
            DbRow(data.as_object().cloned().unwrap_or_default())
        }))
    }

    /// Check every `unique_when_live` constraint the registry declares for
    /// `table_name`, excluding `row_id` itself (invariant 1). Soft-deleted
    /// rows never conflict.
    async fn check_uniqueness(
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        row_id: &str,
        candidate: &DbRow,
    ) -> Result<(), StoreError> {
        let Some(def) = sync_registry::table(table_name) else {
            return Ok(());
        };
        for key_fields in def.unique_when_live {
            let mut sql = String::from(
                "SELECT 1 FROM sync_row WHERE table_name = $1 AND row_id <> $2 \
                 AND (data->>'deleted_at') IS NULL",
            );
            for (i, field) in key_fields.iter().enumerate() {
                sql.push_str(&format!(" AND data->>'{field}' = ${}", i + 3));
            }
            let mut query = sqlx::query(&sql).bind(table_name).bind(row_id);
            for field in *key_fields {
                let value = candidate
                    .get(field)
                    .and_then(|v| v.as_str().map(str::to_owned).or_else(|| Some(v.to_string())))
                    .unwrap_or_default();
                query = query.bind(value);
            }
            let hit = query
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
            if hit.is_some() {
                return Err(StoreError::UniqueViolation {
                    table_name: table_name.to_string(),
                    detail: format!("{:?} already in use", key_fields),
                });
            }
        }
        Ok(())
    }

    async fn upsert_row(
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        row_id: &str,
        data: &serde_json::Value,
        created_at: i64,
        updated_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_row (table_name, row_id, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (table_name, row_id)
            DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(table_name)
        .bind(row_id)
        .bind(data)
        .bind(created_at)
        .bind(updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn insert_change_log(
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        row_id: &str,
        op: ChangeOp,
        payload_json: &str,
        created_at: i64,
    ) -> Result<i64, StoreError> {
        let server_seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO change_log (table_name, row_id, op, payload_json, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING server_seq
            "#,
        )
        .bind(table_name)
        .bind(row_id)
        .bind(op_str(op))
        .bind(payload_json)
        .bind(created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(server_seq)
    }

    async fn assign_owner_if_absent(
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        row_id: &str,
        actor: &Actor,
        now: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO row_owner (table_name, row_id, user_id, username, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (table_name, row_id) DO NOTHING
            "#,
        )
        .bind(table_name)
        .bind(row_id)
        .bind(&actor.user_id)
        .bind(&actor.username)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn touch_parent(
        tx: &mut Transaction<'_, Postgres>,
        keys: &LedgerKeys,
        table_name: &str,
        child_row: &DbRow,
        actor: &Actor,
        now: i64,
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
        let Some(mut parent_row) = Self::fetch_row(tx, parent.table, &parent_id).await? else {
            return Ok(());
        };
        parent_row.set("updated_at", serde_json::json!(now));
        let created_at = parent_row.get_i64("created_at").unwrap_or(now);
        let payload_json = serde_json::to_string(&parent_row.0)
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        Self::upsert_row(tx, parent.table, &parent_id, &serde_json::Value::Object(parent_row.0), created_at, now)
            .await?;

        let entries = PgLedgerStore::append_within(
            tx,
            keys,
            None,
            vec![TxPayload {
                table_name: parent.table.to_string(),
                row_id: parent_id.clone(),
                op: ChangeOp::Upsert,
                payload_json: payload_json.clone(),
                actor: actor.clone(),
                ts: now,
            }],
        )
        .await
        .map_err(StoreError::Ledger)?;
        let _ = entries;

        let server_seq =
            Self::insert_change_log(tx, parent.table, &parent_id, ChangeOp::Upsert, &payload_json, now)
                .await?;

        applied.push(AppliedChange {
            table_name: parent.table.to_string(),
            row_id: parent_id,
            server_seq,
        });
        Ok(())
    }

    async fn write_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        keys: &LedgerKeys,
        inputs: Vec<WriteInput>,
        actor: &Actor,
        now: i64,
    ) -> Result<WriteOutcome, StoreError> {
        let mut applied = Vec::new();

        for input in inputs {
            let existing = Self::fetch_row(tx, &input.table_name, &input.row_id).await?;

            // Invariant 6 / last-writer-wins (§4.C step 1, §8 scenario 2): a
            // stale incoming row whose own `updated_at` trails the row
            // already stored must not clobber it, regardless of arrival
            // order.
            let incoming_updated_at = input.row.get_i64("updated_at").unwrap_or(now);
            let stored_is_newer = existing
                .as_ref()
                .and_then(|r| r.get_i64("updated_at"))
                .is_some_and(|existing_updated_at| existing_updated_at > incoming_updated_at);

            let (row, created_at, updated_at) = if stored_is_newer {
                let row = existing
                    .clone()
                    .expect("stored_is_newer implies existing is Some");
                let created_at = row.get_i64("created_at").unwrap_or(now);
                let updated_at = row.get_i64("updated_at").unwrap_or(now);
                (row, created_at, updated_at)
            } else {
                let mut row = input.row.clone();
                let created_at = existing
                    .as_ref()
                    .and_then(|r| r.get_i64("created_at"))
                    .unwrap_or(now);
                let updated_at = incoming_updated_at.max(now);
                row.set("created_at", serde_json::json!(created_at));
                row.set("updated_at", serde_json::json!(updated_at));
                if matches!(input.op, ChangeOp::Delete) {
                    row.set("deleted_at", serde_json::json!(now));
                }
                (row, created_at, updated_at)
            };

            Self::check_uniqueness(tx, &input.table_name, &input.row_id, &row).await?;

            let payload_json = serde_json::to_string(&row.0)
                .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

            Self::upsert_row(
                tx,
                &input.table_name,
                &input.row_id,
                &serde_json::Value::Object(row.0.clone()),
                created_at,
                updated_at,
            )
            .await?;

            PgLedgerStore::append_within(
                tx,
                keys,
                None,
                vec![TxPayload {
                    table_name: input.table_name.clone(),
                    row_id: input.row_id.clone(),
                    op: input.op,
                    payload_json: payload_json.clone(),
                    actor: actor.clone(),
                    ts: now,
                }],
            )
            .await
            .map_err(StoreError::Ledger)?;

            let server_seq = Self::insert_change_log(
                tx,
                &input.table_name,
                &input.row_id,
                input.op,
                &payload_json,
                now,
            )
            .await?;

            applied.push(AppliedChange {
                table_name: input.table_name.clone(),
                row_id: input.row_id.clone(),
                server_seq,
            });

            Self::assign_owner_if_absent(tx, &input.table_name, &input.row_id, actor, now).await?;
            Self::touch_parent(tx, keys, &input.table_name, &row, actor, now, &mut applied).await?;
        }

        Ok(WriteOutcome { applied })
    }
}

#[async_trait]
impl AuthoritativeStore for PgAuthoritativeStore {
    async fn write_sync_changes(
        &self,
        inputs: Vec<WriteInput>,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let now = now_ms();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let outcome = Self::write_in_tx(&mut tx, &self.keys, inputs, actor, now).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        tracing::info!(
            actor = actor.user_id.as_str(),
            applied = outcome.applied.len(),
            "write_sync_changes committed"
        );

        Ok(outcome)
    }

    async fn query_pull_since(&self, cursor_seq: i64, limit: u32) -> Result<PullPage, StoreError> {
        // Over-fetch by one to detect `has_more`, then dedup by
        // `(table_name, row_id)` keeping the last (highest-seq) occurrence
        // while preserving ascending order.
        let rows = sqlx::query(
            r#"
            SELECT server_seq, table_name, row_id, payload_json
            FROM change_log
            WHERE server_seq > $1
            ORDER BY server_seq ASC
            LIMIT $2
            "#,
        )
        .bind(cursor_seq)
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let has_more = rows.len() > limit as usize;
        let window: Vec<_> = rows.into_iter().take(limit as usize).collect();

        let next_cursor = window
            .last()
            .map(|r| r.get::<i64, _>("server_seq"))
            .unwrap_or(cursor_seq);

        let mut last_index: std::collections::HashMap<(String, String), usize> =
            std::collections::HashMap::new();
        for (i, row) in window.iter().enumerate() {
            let table_name: String = row.get("table_name");
            let row_id: String = row.get("row_id");
            last_index.insert((table_name, row_id), i);
        }
        let mut kept: Vec<usize> = last_index.values().copied().collect();
        kept.sort_unstable();

        let mut by_table: Vec<(String, Vec<DbRow>)> = Vec::new();
        for idx in kept {
            let row = &window[idx];
            let table_name: String = row.get("table_name");
            let payload_json: String = row.get("payload_json");
            let db_row = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&payload_json)
                .map(DbRow)
                .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

            match by_table.iter_mut().find(|(t, _)| t == &table_name) {
                Some((_, rows)) => rows.push(db_row),
                None => by_table.push((table_name, vec![db_row])),
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
        let row = sqlx::query(
            "SELECT table_name, row_id, user_id, username, created_at FROM row_owner WHERE table_name = $1 AND row_id = $2",
        )
        .bind(table_name)
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        Ok(row.map(|r| RowOwner {
            table_name: r.get("table_name"),
            row_id: r.get("row_id"),
            user_id: r.get("user_id"),
            username: r.get("username"),
            created_at: r.get("created_at"),
        }))
    }

    async fn current_row(&self, table_name: &str, row_id: &str) -> Result<Option<DbRow>, StoreError> {
        let row = sqlx::query("SELECT data FROM sync_row WHERE table_name = $1 AND row_id = $2")
            .bind(table_name)
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(row.map(|r| {
            let data: serde_json::Value = r.get("data");
            DbRow(data.as_object().cloned().unwrap_or_default())
        }))
    }

    async fn create_change_request(
        &self,
        request: NewChangeRequest,
    ) -> Result<ChangeRequest, StoreError> {
        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO change_request
                (id, table_name, row_id, before_json, after_json, change_author_id,
                 change_author_username, record_owner_id, record_owner_username,
                 status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&id)
        .bind(&request.table_name)
        .bind(&request.row_id)
        .bind(&request.before_json)
        .bind(&request.after_json)
        .bind(&request.change_author.user_id)
        .bind(&request.change_author.username)
        .bind(&request.record_owner_id)
        .bind(&request.record_owner_username)
        .bind(status_str(ChangeRequestStatus::Pending))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        self.get_change_request(&id)
            .await?
            .ok_or_else(|| StoreError::ChangeRequestNotFound(id))
    }

    async fn get_change_request(&self, id: &str) -> Result<Option<ChangeRequest>, StoreError> {
        let row = sqlx::query("SELECT * FROM change_request WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Ok(row.as_ref().map(row_to_change_request))
    }

    async fn list_change_requests(
        &self,
        status: Option<ChangeRequestStatus>,
        limit: u32,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let rows = match status {
            Some(status) => sqlx::query("SELECT * FROM change_request WHERE status = $1 ORDER BY created_at DESC LIMIT $2")
                .bind(status_str(status))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query("SELECT * FROM change_request ORDER BY created_at DESC LIMIT $1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        Ok(rows.iter().map(row_to_change_request).collect())
    }

    async fn apply_change_request(
        &self,
        id: &str,
        row: WriteInput,
        decider: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let now = now_ms();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let existing = sqlx::query("SELECT status FROM change_request WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?
            .ok_or_else(|| StoreError::ChangeRequestNotFound(id.to_string()))?;

        let status: String = existing.get("status");
        if status_from_str(&status) != ChangeRequestStatus::Pending {
            return Err(StoreError::ChangeRequestNotPending {
                id: id.to_string(),
                status,
            });
        }

        let outcome = Self::write_in_tx(&mut tx, &self.keys, vec![row], decider, now).await?;

        sqlx::query(
            "UPDATE change_request SET status = $1, decided_at = $2, decided_by = $3 WHERE id = $4",
        )
        .bind(status_str(ChangeRequestStatus::Applied))
        .bind(now)
        .bind(&decider.user_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        Ok(outcome)
    }

    async fn reject_change_request(
        &self,
        id: &str,
        decider: &Actor,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let existing = sqlx::query("SELECT status FROM change_request WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?
            .ok_or_else(|| StoreError::ChangeRequestNotFound(id.to_string()))?;

        let status: String = existing.get("status");
        if status_from_str(&status) != ChangeRequestStatus::Pending {
            return Err(StoreError::ChangeRequestNotPending {
                id: id.to_string(),
                status,
            });
        }

        sqlx::query(
            "UPDATE change_request SET status = $1, decided_at = $2, decided_by = $3, note = $4 WHERE id = $5",
        )
        .bind(status_str(ChangeRequestStatus::Rejected))
        .bind(now)
        .bind(&decider.user_id)
        .bind(&note)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }
}

fn row_to_change_request(row: &sqlx::postgres::PgRow) -> ChangeRequest {
    let status: String = row.get("status");
    ChangeRequest {
        id: row.get("id"),
        table_name: row.get("table_name"),
        row_id: row.get("row_id"),
        before_json: row.get("before_json"),
        after_json: row.get("after_json"),
        change_author_id: row.get("change_author_id"),
        change_author_username: row.get("change_author_username"),
        record_owner_id: row.get("record_owner_id"),
        record_owner_username: row.get("record_owner_username"),
        status: status_from_str(&status),
        decided_at: row.get("decided_at"),
        decided_by: row.get("decided_by"),
        note: row.get("note"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    // `PgAuthoritativeStore` needs a live PostgreSQL instance; its
    // behavioral contract is exercised via `InMemoryAuthoritativeStore` in
    // `memory.rs`, which implements the identical `AuthoritativeStore`
    // trait.
    use super::*;

    #[test]
    fn op_round_trips_through_its_string_encoding() {
        assert_eq!(op_from_str(op_str(ChangeOp::Upsert)), ChangeOp::Upsert);
        assert_eq!(op_from_str(op_str(ChangeOp::Delete)), ChangeOp::Delete);
    }

    #[test]
    fn status_round_trips_through_its_string_encoding() {
        for status in [
            ChangeRequestStatus::Pending,
            ChangeRequestStatus::Applied,
            ChangeRequestStatus::Rejected,
        ] {
            assert_eq!(status_from_str(status_str(status)), status);
        }
    }
}
