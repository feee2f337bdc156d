pub mod error;
pub mod retrieval;
pub mod write;

pub use error::{InsightsError, Result};
pub use retrieval::{retrieve, retrieve_global_user, Profile, RetrievalRequest, RetrievedInsight, StrengthBucket};
pub use write::{fallback_metrics, store_insight, InsightMetrics, StoreInsightOutcome};
