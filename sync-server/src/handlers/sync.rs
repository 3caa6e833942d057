//! `/sync/push` and `/sync/pull` (§6), thin axum wrappers around
//! `sync_protocol::{push, pull}`.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use sync_model::actor::Actor;
use sync_protocol::{PullRequest, PushRequest, PushResponse};

#[derive(Debug, Serialize)]
pub struct PushHttpResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub inner: PushResponse,
}

/// `POST /sync/push`.
pub async fn push(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<PushRequest>,
) -> Result<Json<PushHttpResponse>, ApiError> {
    let config = state.config.protocol_config();
    let response = sync_protocol::push(&state.store, &state.gate, &config, &actor, body).await?;
    Ok(Json(PushHttpResponse { ok: true, inner: response }))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    pub cursor: i64,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PullHttpResponse {
    pub ok: bool,
    pub changes: Vec<sync_protocol::WireTableChanges>,
    pub next_cursor: i64,
    pub has_more: bool,
}

/// `GET /sync/pull?cursor=&limit=`.
pub async fn pull(
    State(state): State<AppState>,
    Extension(_actor): Extension<Actor>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullHttpResponse>, ApiError> {
    let config = state.config.protocol_config();
    let response = sync_protocol::pull(
        &state.store,
        &config,
        PullRequest { cursor_seq: query.cursor, limit: query.limit },
    )
    .await?;
    Ok(Json(PullHttpResponse {
        ok: true,
        changes: response.changes,
        next_cursor: response.next_cursor,
        has_more: response.has_more,
    }))
}
