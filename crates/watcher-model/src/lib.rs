pub mod anthropic;
pub mod client;
pub mod error;
pub mod pricing;
pub mod stub;

pub use anthropic::AnthropicClient;
pub use client::{Completion, LlmClient, Usage};
pub use error::{ModelError, Result};
pub use pricing::estimate_cost;
pub use stub::StubClient;
