use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness and persistence health. A failed `topic_balance`
/// probe against a sentinel key is treated as a database-health signal.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = state.store.topic_balance("health:probe").is_ok();

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": if db_ok { "ok" } else { "unreachable" },
    }))
}
