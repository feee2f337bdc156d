use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::{internal_error, not_found};

#[derive(Deserialize)]
pub struct BrowseQuery {
    layer_name: Option<String>,
    status: Option<String>,
    since: Option<String>,
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /runs?{layer_name, status, since, offset, limit}
pub async fn browse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let runs = state
        .store
        .browse_runs(
            query.layer_name.as_deref(),
            query.status.as_deref(),
            query.since.as_deref(),
            query.offset,
            query.limit,
        )
        .map_err(internal_error)?;
    Ok(Json(json!({ "runs": runs })))
}

/// GET /runs/{id}
pub async fn by_id_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let run = state.store.get_run(&id).map_err(internal_error)?;
    let Some(run) = run else {
        return Err(not_found(format!("no such run: {id}")));
    };
    let insights = state.store.list_insights_by_run(&id).map_err(internal_error)?;
    Ok(Json(json!({ "run": run, "insights": insights })))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_days")]
    days: u32,
}

fn default_days() -> u32 {
    7
}

/// GET /runs/stats/summary?days=...
pub async fn stats_summary_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let summary = state.store.run_stats_summary(query.days).map_err(internal_error)?;
    Ok(Json(json!({ "days": query.days, "layers": summary })))
}
