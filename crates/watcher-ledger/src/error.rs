use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),

    #[error(transparent)]
    Topics(#[from] watcher_topics::TopicsError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
