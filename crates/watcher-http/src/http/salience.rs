use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use watcher_topics::BudgetGroup;

use crate::app::AppState;
use crate::error::{bad_request, internal_error};
use crate::http::readable::humanize_key;

const ALL_GROUPS: &[BudgetGroup] = &[
    BudgetGroup::Social,
    BudgetGroup::Global,
    BudgetGroup::Spaces,
    BudgetGroup::Semantic,
    BudgetGroup::Culture,
    BudgetGroup::SelfGroup,
];

#[derive(Deserialize)]
pub struct BrowseQuery {
    group: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    readable: bool,
}

fn default_limit() -> u32 {
    50
}

/// GET /salience?{group, limit} — topics in `group` (or every group if
/// unset) with a positive balance, sorted by balance descending.
pub async fn browse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let groups: Vec<BudgetGroup> = match &query.group {
        Some(raw) => vec![BudgetGroup::parse(raw).ok_or_else(|| bad_request(format!("unknown budget group: {raw}")))?],
        None => ALL_GROUPS.to_vec(),
    };

    let mut rows: Vec<(String, f64, &'static str)> = Vec::new();
    for group in groups {
        for topic in watcher_topics::topics_in_group(&state.store, group).map_err(internal_error)? {
            let balance = state.store.topic_balance(&topic.key).map_err(internal_error)?;
            if balance > 0.0 {
                rows.push((topic.key, balance, group.as_str()));
            }
        }
    }
    rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    rows.truncate(query.limit as usize);

    let topics: Vec<Value> = rows
        .into_iter()
        .map(|(key, balance, group)| {
            json!({
                "topic_key": key,
                "topic": if query.readable { humanize_key(&key) } else { key.clone() },
                "balance": balance,
                "group": group,
            })
        })
        .collect();

    Ok(Json(json!({ "topics": topics })))
}

/// GET /salience/groups — one row per budget group with its current
/// aggregate positive balance and topic count.
pub async fn groups_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut groups = Vec::new();
    for group in ALL_GROUPS {
        let topics = watcher_topics::topics_in_group(&state.store, *group).map_err(internal_error)?;
        let mut total_balance = 0.0;
        let mut warm_count = 0u32;
        for topic in &topics {
            let balance = state.store.topic_balance(&topic.key).map_err(internal_error)?;
            if balance > 0.0 {
                total_balance += balance;
            }
            if balance > state.ledger_config.warm_threshold {
                warm_count += 1;
            }
        }
        groups.push(json!({
            "group": group.as_str(),
            "topic_count": topics.len(),
            "warm_count": warm_count,
            "total_balance": total_balance,
        }));
    }
    Ok(Json(json!({ "groups": groups })))
}

#[derive(Deserialize)]
pub struct ByTopicQuery {
    #[serde(default = "default_transaction_limit")]
    transaction_limit: u32,
    #[serde(default)]
    readable: bool,
}

fn default_transaction_limit() -> u32 {
    50
}

/// GET /salience/{topic_key}?transaction_limit=... — current balance plus
/// the most recent ledger entries, newest first.
pub async fn by_topic_handler(
    State(state): State<Arc<AppState>>,
    Path(topic_key): Path<String>,
    Query(query): Query<ByTopicQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let topic = state.store.get_topic(&topic_key).map_err(internal_error)?;
    let Some(topic) = topic else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown topic: {topic_key}") }))));
    };
    let balance = state.store.topic_balance(&topic_key).map_err(internal_error)?;
    let entries = state.store.list_entries_for_topic(&topic_key, query.transaction_limit).map_err(internal_error)?;

    Ok(Json(json!({
        "topic_key": topic.key,
        "topic": if query.readable { humanize_key(&topic.key) } else { topic.key.clone() },
        "category": topic.category,
        "scope": topic.scope,
        "provisional": topic.provisional,
        "balance": balance,
        "warm": balance > state.ledger_config.warm_threshold,
        "last_activity_at": topic.last_activity_at,
        "transactions": entries,
    })))
}
