//! `/changes`, `/changes/:id/apply`, `/changes/:id/reject` (§6): the
//! moderation queue and its apply/reject actions, delegating the admission
//! logic to `sync-gate::Gate`.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use sync_model::actor::Actor;
use sync_model::sync::{ChangeRequest, ChangeRequestStatus};
use sync_store::AuthoritativeStore;

fn parse_status(s: &str) -> Option<ChangeRequestStatus> {
    match s {
        "pending" => Some(ChangeRequestStatus::Pending),
        "applied" => Some(ChangeRequestStatus::Applied),
        "rejected" => Some(ChangeRequestStatus::Rejected),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ListChangesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default, rename = "includeNoise")]
    pub include_noise: bool,
}

fn default_limit() -> u32 {
    200
}

/// One change request enriched with a display label resolved from the
/// registry's per-table `label` function (§9's label-heuristic note).
#[derive(Debug, Serialize)]
pub struct ChangeRequestWithLabel {
    #[serde(flatten)]
    pub request: ChangeRequest,
    pub label: Option<String>,
}

fn label_for(request: &ChangeRequest) -> Option<String> {
    let table = sync_registry::table(&request.table_name)?;
    let label_fn = table.label?;
    let after: serde_json::Value = serde_json::from_str(&request.after_json).ok()?;
    let db_row = sync_model::row::DbRow(after.as_object().cloned().unwrap_or_default());
    label_fn(&db_row)
}

#[derive(Debug, Serialize)]
pub struct ListChangesResponse {
    pub ok: bool,
    pub changes: Vec<ChangeRequestWithLabel>,
}

/// `GET /changes?status=&limit=&includeNoise=`.
pub async fn list(
    State(state): State<AppState>,
    Extension(_actor): Extension<Actor>,
    Query(query): Query<ListChangesQuery>,
) -> Result<Json<ListChangesResponse>, ApiError> {
    let status = query.status.as_deref().and_then(parse_status);
    let requests = state.store.list_change_requests(status, query.limit).await?;

    let requests = if query.include_noise {
        requests
    } else {
        sync_protocol::filter_change_requests_noise(requests)
    };

    let changes = requests
        .into_iter()
        .map(|request| {
            let label = label_for(&request);
            ChangeRequestWithLabel { request, label }
        })
        .collect();

    Ok(Json(ListChangesResponse { ok: true, changes }))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `POST /changes/:id/apply`.
pub async fn apply(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.gate.apply(&id, &actor).await?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectBody {
    pub note: Option<String>,
}

/// `POST /changes/:id/reject`.
pub async fn reject(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> Result<Json<OkResponse>, ApiError> {
    let note = body.and_then(|Json(b)| b.note);
    state.gate.reject(&id, &actor, note).await?;
    Ok(Json(OkResponse { ok: true }))
}
