//! `push` (§4.D): validate each incoming row, run it through the gate, and
//! apply every admitted row in one atomic [`AuthoritativeStore::write_sync_changes`]
//! call.

use std::sync::Arc;

use sync_gate::{Gate, Outcome};
use sync_model::actor::Actor;
use sync_model::row::WireRow;
use sync_model::sync::ChangeOp;
use sync_store::{AuthoritativeStore, WriteInput};

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::types::{DeflectedRow, PushError, PushRequest, PushResponse};

/// Run `request` through validation, the gate, and a single batched write
/// (§4.D steps 1-3). A row that fails schema validation is reported in
/// [`PushResponse::errors`] and otherwise ignored; every admitted row shares
/// one transaction, so either all of them land or — on a store error — none
/// do and the whole pack is safe to retry on the client's next push (§7).
pub async fn push<S: AuthoritativeStore>(
    store: &Arc<S>,
    gate: &Gate<S>,
    config: &ProtocolConfig,
    actor: &Actor,
    request: PushRequest,
) -> Result<PushResponse, ProtocolError> {
    let mut response = PushResponse::default();
    let mut batch: Vec<WriteInput> = Vec::new();

    let mut total_rows = 0u32;
    for upsert in &request.upserts {
        let count = upsert.rows.len() as u32;
        total_rows += count;
        if count > config.push_max_per_table {
            return Err(ProtocolError::PushTooLarge {
                table: upsert.table.clone(),
                limit: config.push_max_per_table,
                actual: count,
            });
        }
    }
    if total_rows > config.push_max_total {
        return Err(ProtocolError::PushTooLarge {
            table: "*".to_string(),
            limit: config.push_max_total,
            actual: total_rows,
        });
    }

    // Process only tables the request names, parents before children
    // (invariant 3), so a row's parent-touch observations stay consistent
    // within one push.
    let ordered = sync_registry::dependency_ordered();
    for table_def in ordered {
        let Some(upsert) = request.upserts.iter().find(|u| u.table == table_def.sync_name) else {
            continue;
        };

        for wire in &upsert.rows {
            if let Err(e) = (table_def.schema)(wire) {
                response.errors.push(PushError {
                    table: table_def.sync_name.to_string(),
                    id: wire.get_str("id").unwrap_or("").to_string(),
                    reason: e.to_string(),
                });
                continue;
            }

            let row_id = wire.get_str("id").unwrap_or("").to_string();
            let after = table_def.to_db_row(wire);
            let before = store.current_row(table_def.sync_name, &row_id).await?;

            match gate
                .admit_or_deflect(table_def.sync_name, &row_id, before, after.clone(), actor)
                .await?
            {
                Outcome::Admit => batch.push(WriteInput {
                    table_name: table_def.sync_name.to_string(),
                    row_id,
                    op: op_of(wire),
                    row: after,
                }),
                Outcome::Deflect(cr) => response.deflected.push(DeflectedRow {
                    table: table_def.sync_name.to_string(),
                    id: cr.row_id.clone(),
                    change_request_id: cr.id,
                }),
            }
        }
    }

    if !batch.is_empty() {
        let outcome = store.write_sync_changes(batch, actor).await?;
        response.applied = outcome.applied.len() as u64;
    }

    tracing::info!(
        actor = actor.user_id.as_str(),
        applied = response.applied,
        errors = response.errors.len(),
        deflected = response.deflected.len(),
        "push complete"
    );
    Ok(response)
}

/// A deleted row is any row whose `deleted_at` is non-null (invariant 2:
/// deletes are soft, never a distinct wire verb).
fn op_of(wire: &WireRow) -> ChangeOp {
    match wire.get("deleted_at") {
        Some(v) if !v.is_null() => ChangeOp::Delete,
        _ => ChangeOp::Upsert,
    }
}
