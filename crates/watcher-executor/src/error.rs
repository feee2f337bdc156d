use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),

    #[error(transparent)]
    Topics(#[from] watcher_topics::TopicsError),

    #[error(transparent)]
    Ledger(#[from] watcher_ledger::LedgerError),

    #[error(transparent)]
    Insights(#[from] watcher_insights::InsightsError),

    #[error(transparent)]
    Model(#[from] watcher_model::ModelError),

    #[error("layer file error: {0}")]
    LayerFile(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("node {node} failed: {message}")]
    Node { node: String, message: String },
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
