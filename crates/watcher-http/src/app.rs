use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use watcher_core::config::LedgerConfig;
use watcher_store::Store;

/// Central shared state handed to every handler. Read-only by contract: no
/// handler in this crate ever mutates the store.
pub struct AppState {
    pub store: Arc<Store>,
    pub ledger_config: LedgerConfig,
}

impl AppState {
    pub fn new(store: Arc<Store>, ledger_config: LedgerConfig) -> Self {
        Self { store, ledger_config }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/insights", get(crate::http::insights::browse_handler))
        .route("/insights/search", get(crate::http::insights::search_handler))
        .route("/insights/{topic_key}", get(crate::http::insights::by_topic_handler))
        .route("/salience", get(crate::http::salience::browse_handler))
        .route("/salience/groups", get(crate::http::salience::groups_handler))
        .route("/salience/{topic_key}", get(crate::http::salience::by_topic_handler))
        .route("/runs", get(crate::http::runs::browse_handler))
        .route("/runs/stats/summary", get(crate::http::runs::stats_summary_handler))
        .route("/runs/{id}", get(crate::http::runs::by_id_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
