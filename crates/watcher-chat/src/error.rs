use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),

    #[error(transparent)]
    Topics(#[from] watcher_topics::TopicsError),

    #[error(transparent)]
    Ledger(#[from] watcher_ledger::LedgerError),

    #[error("adapter connection failed: {0}")]
    ConnectionFailed(String),

    #[error("adapter send rejected: observation-only adapters never send")]
    SendNotSupported,
}

pub type Result<T> = std::result::Result<T, ChatError>;
