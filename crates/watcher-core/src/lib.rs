pub mod config;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::WatcherConfig;
pub use error::{CoreError, Result};
pub use ids::Tsid;
