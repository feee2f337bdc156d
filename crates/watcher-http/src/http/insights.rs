use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use watcher_insights::{Profile, RetrievalRequest};

use crate::app::AppState;
use crate::error::{bad_request, internal_error};
use crate::http::readable::humanize_key;

#[derive(Deserialize)]
pub struct BrowseQuery {
    category: Option<String>,
    since: Option<String>,
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    readable: bool,
}

fn default_limit() -> u32 {
    50
}

/// GET /insights?{category, since, offset, limit}
pub async fn browse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let insights = state
        .store
        .browse_insights(query.category.as_deref(), query.since.as_deref(), query.offset, query.limit)
        .map_err(internal_error)?;

    Ok(Json(json!({
        "insights": insights.into_iter().map(|i| render_insight(&i, query.readable)).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    readable: bool,
}

/// GET /insights/search?q=...
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if query.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let insights = state.store.search_insights(&query.q, query.limit).map_err(internal_error)?;
    Ok(Json(json!({
        "insights": insights.into_iter().map(|i| render_insight(&i, query.readable)).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct ByTopicQuery {
    #[serde(default = "default_profile")]
    profile: String,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    include_quarantined: bool,
    #[serde(default)]
    readable: bool,
}

fn default_profile() -> String {
    "balanced".to_string()
}

/// GET /insights/{topic_key}?profile=...&limit=...&include_quarantined=...
///
/// `user:<id>` is dispatched to the global 50/50 retrieval of §4.D; every
/// other category goes through plain single-topic retrieval.
pub async fn by_topic_handler(
    State(state): State<Arc<AppState>>,
    Path(topic_key): Path<String>,
    Query(query): Query<ByTopicQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let profile: Profile = query.profile.parse().map_err(bad_request)?;
    let now = Utc::now();

    let hits = if is_global_user(&topic_key) {
        let user_id = topic_key.strip_prefix("user:").unwrap_or(&topic_key);
        watcher_insights::retrieve_global_user(&state.store, user_id, profile, query.limit, query.include_quarantined, now)
            .map_err(internal_error)?
    } else {
        let request = RetrievalRequest {
            topic_key: &topic_key,
            profile,
            limit: query.limit,
            include_quarantined: query.include_quarantined,
        };
        watcher_insights::retrieve(&state.store, &request, now).map_err(internal_error)?
    };

    Ok(Json(json!({
        "topic": if query.readable { humanize_key(&topic_key) } else { topic_key.clone() },
        "topic_key": topic_key,
        "profile": query.profile,
        "insights": hits.into_iter().map(|r| render_retrieved(&r, query.readable)).collect::<Vec<_>>(),
    })))
}

fn is_global_user(topic_key: &str) -> bool {
    topic_key.starts_with("user:") && topic_key.matches(':').count() == 1
}

#[derive(Serialize)]
struct RenderedInsight<'a> {
    #[serde(flatten)]
    insight: &'a watcher_store::model::Insight,
    topic: Option<String>,
}

fn render_insight(insight: &watcher_store::model::Insight, readable: bool) -> Value {
    let topic = readable.then(|| humanize_key(&insight.topic_key));
    serde_json::to_value(RenderedInsight { insight, topic }).unwrap_or(Value::Null)
}

fn render_retrieved(retrieved: &watcher_insights::RetrievedInsight, readable: bool) -> Value {
    let mut value = serde_json::to_value(retrieved).unwrap_or(Value::Null);
    if readable {
        if let Value::Object(map) = &mut value {
            map.insert("topic".to_string(), json!(humanize_key(&retrieved.insight.topic_key)));
        }
    }
    value
}
