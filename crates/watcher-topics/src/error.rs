use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopicsError {
    #[error("malformed topic key: {0}")]
    MalformedKey(String),

    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),
}

pub type Result<T> = std::result::Result<T, TopicsError>;
