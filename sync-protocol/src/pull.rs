//! `pull` (§4.D): a total, cursor-bounded replay of `change_log`, converted
//! back to wire rows table by table.

use std::sync::Arc;

use sync_store::AuthoritativeStore;

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::types::{PullRequest, PullResponse, WireTableChanges};

/// Fetch everything after `request.cursor_seq`, capped at
/// `request.limit.unwrap_or(config.default_pull_limit)` (invariant 3: pull is
/// a total replay, never a delta the client must reconcile by hand).
pub async fn pull<S: AuthoritativeStore>(
    store: &Arc<S>,
    config: &ProtocolConfig,
    request: PullRequest,
) -> Result<PullResponse, ProtocolError> {
    let limit = request.limit.unwrap_or(config.default_pull_limit);
    let page = store.query_pull_since(request.cursor_seq, limit).await?;

    let mut changes = Vec::with_capacity(page.changes.len());
    for table_changes in page.changes {
        let table = sync_registry::table(&table_changes.table_name)
            .ok_or_else(|| ProtocolError::UnknownTable(table_changes.table_name.clone()))?;
        let rows = table_changes.rows.iter().map(|row| table.to_wire_row(row)).collect();
        changes.push(WireTableChanges {
            table: table_changes.table_name,
            rows,
        });
    }

    Ok(PullResponse {
        changes,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    })
}
