use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] watcher_store::StoreError),

    #[error(transparent)]
    Topics(#[from] watcher_topics::TopicsError),

    #[error(transparent)]
    Ledger(#[from] watcher_ledger::LedgerError),

    #[error(transparent)]
    Executor(#[from] watcher_executor::ExecutorError),

    #[error("invalid schedule `{expr}`: {message}")]
    InvalidSchedule { expr: String, message: String },

    #[error("layer `{0}` names no resolvable target group")]
    NoTargetGroup(String),

    #[error("layer `{0}` already has an activation in flight")]
    AlreadyRunning(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
