pub mod adapter;
pub mod adapters;
pub mod earning;
pub mod error;
pub mod manager;
pub mod types;

pub use adapter::ChatAdapter;
pub use adapters::{DiscordAdapter, LoopbackAdapter};
pub use earning::EarningProcessor;
pub use error::{ChatError, Result};
pub use manager::ChatManager;
pub use types::{ChannelStatus, ChatEvent, ObservedMessage, ObservedReaction, ObservedThread};
