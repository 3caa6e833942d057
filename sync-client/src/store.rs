//! The Client Replica's local storage (§4.F): an embedded SQLite mirror of
//! the registry's tables, generalized from a single-purpose oplog into a
//! fully registry-driven schema, plus a `local_outbox` pending-queue and a
//! `sync_kv` table for cursor/clock bookkeeping — following this line of
//! client-sync code's existing conventions (see
//! `sync-engine`'s `oplog.rs`), generalized to N registry-declared tables
//! instead of one.

use std::sync::Mutex;

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use sync_model::row::{DbRow, WireRow};
use sync_protocol::{PullResponse, TableUpserts};
use sync_registry::{FieldKind, TableDef};

use crate::error::ClientError;

/// One replicated table's outbound slice, read from `local_outbox`.
pub struct PendingPack {
    pub table: String,
    pub rows: Vec<WireRow>,
}

/// A locally-created or locally-edited row, not yet acknowledged by the
/// server.
const STATUS_PENDING: &str = "pending";
const STATUS_SYNCED: &str = "synced";
const STATUS_ERROR: &str = "error";

/// The embedded local replica. Connection access is behind a `Mutex`
/// because the sync worker and the UI-facing write path both touch it
/// (§1's exclusion: UI rendering is out of scope, but the storage surface it
/// writes through is this one).
pub struct LocalStore {
    conn: Mutex<Connection>,
}

fn sql_type_for(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String | FieldKind::Json => "TEXT",
        FieldKind::Number => "REAL",
        FieldKind::Bool => "INTEGER",
        FieldKind::NullableTimestamp => "INTEGER",
    }
}

fn value_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_value(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

impl LocalStore {
    /// Open (creating if absent) the SQLite database at `path` and ensure
    /// the registry-driven schema exists. Safe to call repeatedly.
    pub fn open(path: &str) -> Result<Self, ClientError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// An in-memory store, used by tests and short-lived embedders.
    pub fn open_in_memory() -> Result<Self, ClientError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), ClientError> {
        let conn = self.conn.lock().expect("local store mutex poisoned");
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        for table in sync_registry::registry() {
            let mut cols: Vec<String> = table
                .fields
                .iter()
                .map(|f| format!("{} {}", f.db, sql_type_for(f.kind)))
                .collect();
            cols.push("sync_status TEXT NOT NULL DEFAULT 'pending'".to_string());
            cols.push("last_server_seq INTEGER".to_string());
            let pk = table.conflict_target.join(", ");
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
                table.sync_name,
                cols.join(", "),
                pk
            );
            conn.execute(&ddl, [])?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS local_outbox (
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'pending',
                payload_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, row_id)
            );
            CREATE INDEX IF NOT EXISTS idx_local_outbox_pending
                ON local_outbox(sync_status, table_name, row_id);
            CREATE TABLE IF NOT EXISTS sync_kv (
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Record a locally-originated mutation (create or edit) on `table`: a
    /// UI-facing write path lands the row here with `sync_status='pending'`
    /// and mirrors it into `local_outbox` for `collect_all_pending`.
    ///
    /// The row fails local validation (the same `registry.schema` the
    /// server enforces) is marked `error` immediately and never resent
    /// (§4.F step 2).
    pub fn put_local(&self, table_name: &str, wire: WireRow, now_ms: i64) -> Result<(), ClientError> {
        let table = sync_registry::table(table_name)
            .ok_or_else(|| ClientError::UnknownTable(table_name.to_string()))?;
        let row_id = wire.get_str("id").unwrap_or("").to_string();

        let status = match (table.schema)(&wire) {
            Ok(()) => STATUS_PENDING,
            Err(e) => {
                tracing::warn!(table = table_name, row_id = row_id.as_str(), error = %e, "row failed local validation");
                STATUS_ERROR
            }
        };

        let db_row = table.to_db_row(&wire);
        let mut conn = self.conn.lock().expect("local store mutex poisoned");
        let tx = conn.transaction()?;
        Self::upsert_table_row(&tx, table, &db_row, status, None)?;

        if status == STATUS_PENDING {
            let payload = serde_json::to_string(&wire.0)?;
            tx.execute(
                "INSERT INTO local_outbox (table_name, row_id, sync_status, payload_json, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4)
                 ON CONFLICT(table_name, row_id) DO UPDATE SET
                    sync_status = 'pending', payload_json = excluded.payload_json, updated_at = excluded.updated_at",
                rusqlite::params![table_name, row_id, payload, now_ms],
            )?;
        } else {
            tx.execute(
                "DELETE FROM local_outbox WHERE table_name = ?1 AND row_id = ?2",
                rusqlite::params![table_name, row_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_table_row(
        conn: &rusqlite::Connection,
        table: &TableDef,
        row: &DbRow,
        sync_status: &str,
        last_server_seq: Option<i64>,
    ) -> Result<(), ClientError> {
        let mut cols: Vec<&str> = table.fields.iter().map(|f| f.db).collect();
        let mut values: Vec<rusqlite::types::Value> =
            table.fields.iter().map(|f| row.get(f.db).map(value_to_sql).unwrap_or(rusqlite::types::Value::Null)).collect();
        cols.push("sync_status");
        values.push(rusqlite::types::Value::Text(sync_status.to_string()));
        cols.push("last_server_seq");
        values.push(
            last_server_seq
                .map(rusqlite::types::Value::Integer)
                .unwrap_or(rusqlite::types::Value::Null),
        );

        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        let update_clause: Vec<String> = cols
            .iter()
            .filter(|c| !table.conflict_target.contains(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})
             ON CONFLICT({}) DO UPDATE SET {}",
            table.sync_name,
            cols.join(", "),
            placeholders.join(", "),
            table.conflict_target.join(", "),
            update_clause.join(", "),
        );
        conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// `collectAllPending` (§4.F step 1): scan `local_outbox` in registry
    /// dependency order, up to `max_per_table` rows per table and
    /// `max_total` overall, and wrap them into [`PendingPack`]s.
    pub fn collect_all_pending(&self, max_per_table: u32, max_total: u32) -> Result<Vec<PendingPack>, ClientError> {
        let conn = self.conn.lock().expect("local store mutex poisoned");
        let mut packs = Vec::new();
        let mut total = 0u32;

        for table in sync_registry::dependency_ordered() {
            if total >= max_total {
                break;
            }
            let remaining = max_total - total;
            let limit = remaining.min(max_per_table);

            let mut stmt = conn.prepare(
                "SELECT payload_json FROM local_outbox
                 WHERE table_name = ?1 AND sync_status = 'pending'
                 ORDER BY row_id ASC
                 LIMIT ?2",
            )?;
            let rows: Vec<String> = stmt
                .query_map(rusqlite::params![table.sync_name, limit], |r| r.get(0))?
                .collect::<Result<_, _>>()?;

            if rows.is_empty() {
                continue;
            }
            let mut wire_rows = Vec::with_capacity(rows.len());
            for raw in &rows {
                let value: Value = serde_json::from_str(raw)?;
                wire_rows.push(WireRow(value.as_object().cloned().unwrap_or_default()));
            }
            total += wire_rows.len() as u32;
            packs.push(PendingPack { table: table.sync_name.to_string(), rows: wire_rows });
        }
        Ok(packs)
    }

    /// Flip a pushed row to `synced` (applied or deflected — both mean the
    /// server acknowledged receipt and the client stops resending it, §4.D's
    /// open question) and dequeue it from `local_outbox`.
    pub fn mark_synced(&self, table_name: &str, row_id: &str) -> Result<(), ClientError> {
        sync_registry::table(table_name).ok_or_else(|| ClientError::UnknownTable(table_name.to_string()))?;
        let conn = self.conn.lock().expect("local store mutex poisoned");
        conn.execute(
            &format!("UPDATE {table_name} SET sync_status = 'synced' WHERE id = ?1"),
            rusqlite::params![row_id],
        )?;
        conn.execute(
            "DELETE FROM local_outbox WHERE table_name = ?1 AND row_id = ?2",
            rusqlite::params![table_name, row_id],
        )?;
        Ok(())
    }

    /// Flip a row to `error` (§4.F step 2: never resent).
    pub fn mark_error(&self, table_name: &str, row_id: &str) -> Result<(), ClientError> {
        sync_registry::table(table_name).ok_or_else(|| ClientError::UnknownTable(table_name.to_string()))?;
        let conn = self.conn.lock().expect("local store mutex poisoned");
        conn.execute(
            &format!("UPDATE {table_name} SET sync_status = 'error' WHERE id = ?1"),
            rusqlite::params![row_id],
        )?;
        conn.execute(
            "UPDATE local_outbox SET sync_status = 'error' WHERE table_name = ?1 AND row_id = ?2",
            rusqlite::params![table_name, row_id],
        )?;
        Ok(())
    }

    /// Project a pull response into the local tables and persist the new
    /// cursor atomically with the projected rows (§4.F step 3 — the cursor
    /// only advances once the whole batch has been applied).
    pub fn apply_pull_page(&self, page: &PullResponse) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().expect("local store mutex poisoned");
        let tx = conn.transaction()?;

        for table_changes in &page.changes {
            let table = sync_registry::table(&table_changes.table)
                .ok_or_else(|| ClientError::UnknownTable(table_changes.table.clone()))?;
            for wire in &table_changes.rows {
                let db_row = table.to_db_row(wire);
                Self::upsert_table_row(&tx, table, &db_row, STATUS_SYNCED, Some(page.next_cursor))?;
            }
        }

        tx.execute(
            "INSERT INTO sync_kv (k, v) VALUES ('last_server_seq', ?1)
             ON CONFLICT(k) DO UPDATE SET v = excluded.v",
            rusqlite::params![page.next_cursor.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The cursor persisted by the last successful [`Self::apply_pull_page`]
    /// call, or 0 for a fresh client (scenario 1: bootstrap from cursor 0).
    pub fn cursor(&self) -> Result<i64, ClientError> {
        let conn = self.conn.lock().expect("local store mutex poisoned");
        let v: Option<String> = conn
            .query_row("SELECT v FROM sync_kv WHERE k = 'last_server_seq'", [], |r| r.get(0))
            .optional()?;
        Ok(v.and_then(|s| s.parse().ok()).unwrap_or(0))
    }

    /// Read back one row's current local state, for tests and callers that
    /// want to confirm a projection landed.
    pub fn get_row(&self, table_name: &str, row_id: &str) -> Result<Option<DbRow>, ClientError> {
        let table = sync_registry::table(table_name)
            .ok_or_else(|| ClientError::UnknownTable(table_name.to_string()))?;
        let conn = self.conn.lock().expect("local store mutex poisoned");
        let cols: Vec<&str> = table.fields.iter().map(|f| f.db).collect();
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", cols.join(", "), table_name);
        let result = conn
            .query_row(&sql, rusqlite::params![row_id], |r| {
                let mut map = Map::new();
                for (i, col) in cols.iter().enumerate() {
                    map.insert(col.to_string(), sql_to_value(r.get_ref(i)?));
                }
                Ok(map)
            })
            .optional()?;
        Ok(result.map(DbRow))
    }

    /// The row's current `sync_status`, for tests asserting §4.F outcomes.
    pub fn sync_status(&self, table_name: &str, row_id: &str) -> Result<Option<String>, ClientError> {
        let conn = self.conn.lock().expect("local store mutex poisoned");
        let status = conn
            .query_row(
                &format!("SELECT sync_status FROM {table_name} WHERE id = ?1"),
                rusqlite::params![row_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status)
    }
}

/// Convert [`PendingPack`]s into the wire-shaped request body
/// `sync-protocol` and the server expect.
pub fn packs_to_upserts(packs: Vec<PendingPack>) -> Vec<TableUpserts> {
    packs.into_iter().map(|p| TableUpserts { table: p.table, rows: p.rows }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(v: Value) -> WireRow {
        WireRow(v.as_object().unwrap().clone())
    }

    #[test]
    fn put_local_marks_valid_row_pending_and_enqueues_outbox() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_local(
                "entity_types",
                wire(json!({"id": "et-1", "code": "engine", "name": "Engine", "created_at": 1, "updated_at": 1})),
                1,
            )
            .unwrap();

        assert_eq!(store.sync_status("entity_types", "et-1").unwrap().as_deref(), Some("pending"));
        let packs = store.collect_all_pending(100, 100).unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].table, "entity_types");
        assert_eq!(packs[0].rows.len(), 1);
    }

    #[test]
    fn put_local_marks_invalid_row_error_and_never_queues_it() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_local("entity_types", wire(json!({"id": "et-1", "code": "", "name": "Engine", "created_at": 1, "updated_at": 1})), 1)
            .unwrap();

        assert_eq!(store.sync_status("entity_types", "et-1").unwrap().as_deref(), Some("error"));
        let packs = store.collect_all_pending(100, 100).unwrap();
        assert!(packs.is_empty());
    }

    #[test]
    fn mark_synced_clears_outbox_entry() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_local(
                "entity_types",
                wire(json!({"id": "et-1", "code": "engine", "name": "Engine", "created_at": 1, "updated_at": 1})),
                1,
            )
            .unwrap();
        store.mark_synced("entity_types", "et-1").unwrap();

        assert_eq!(store.sync_status("entity_types", "et-1").unwrap().as_deref(), Some("synced"));
        assert!(store.collect_all_pending(100, 100).unwrap().is_empty());
    }

    #[test]
    fn apply_pull_page_projects_rows_and_advances_cursor() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.cursor().unwrap(), 0);

        let page = PullResponse {
            changes: vec![sync_protocol::WireTableChanges {
                table: "entity_types".to_string(),
                rows: vec![wire(json!({"id": "et-1", "code": "engine", "name": "Engine", "created_at": 1, "updated_at": 1}))],
            }],
            next_cursor: 7,
            has_more: false,
        };
        store.apply_pull_page(&page).unwrap();

        assert_eq!(store.cursor().unwrap(), 7);
        assert_eq!(store.sync_status("entity_types", "et-1").unwrap().as_deref(), Some("synced"));
        let row = store.get_row("entity_types", "et-1").unwrap().unwrap();
        assert_eq!(row.get_str("code"), Some("engine"));
    }

    #[test]
    fn dependency_order_is_respected_in_pending_collection() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_local("entities", wire(json!({"id": "e1", "type_id": "et-1", "created_at": 1, "updated_at": 1})), 1)
            .unwrap();
        store
            .put_local("entity_types", wire(json!({"id": "et-1", "code": "engine", "name": "Engine", "created_at": 1, "updated_at": 1})), 1)
            .unwrap();

        let packs = store.collect_all_pending(100, 100).unwrap();
        assert_eq!(packs[0].table, "entity_types");
        assert_eq!(packs[1].table, "entities");
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.sqlite3");
        let path = path.to_str().unwrap();

        {
            let store = LocalStore::open(path).unwrap();
            store
                .put_local(
                    "entity_types",
                    wire(json!({"id": "et-1", "code": "engine", "name": "Engine", "created_at": 1, "updated_at": 1})),
                    1,
                )
                .unwrap();
            store.mark_synced("entity_types", "et-1").unwrap();
        }

        let reopened = LocalStore::open(path).unwrap();
        let row = reopened.get_row("entity_types", "et-1").unwrap().unwrap();
        assert_eq!(row.get_str("code"), Some("engine"));
        assert_eq!(reopened.sync_status("entity_types", "et-1").unwrap().as_deref(), Some("synced"));
    }
}
