use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("invalid insight: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),
}

pub type Result<T> = std::result::Result<T, InsightsError>;
