use serde::{Deserialize, Serialize};

use watcher_store::model::VisibilityScope;

/// Sentinel prefix on a contextual display id marking an anonymous
/// participant — such an id never earns salience individually (§6).
pub const ANONYMOUS_PREFIX: &str = "anon:";

pub fn is_anonymous(id: &str) -> bool {
    id.starts_with(ANONYMOUS_PREFIX)
}

/// A message observed by an adapter, carrying every field the core's
/// persistence and earning rules need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedMessage {
    pub id: String,
    pub channel_id: String,
    pub server_id: Option<String>,
    pub author_id: Option<String>,
    pub content: String,
    pub created_at: String,
    pub visibility_scope: VisibilityScope,
    pub reply_target_id: Option<String>,
    pub thread_id: Option<String>,
    pub has_media: bool,
    pub has_link: bool,
    /// User ids mentioned in `content`, already resolved by the adapter.
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedReaction {
    pub message_id: String,
    pub actor_id: String,
    pub emoji: String,
    pub is_custom: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedThread {
    pub id: String,
    pub channel_id: String,
    pub creator_id: String,
    pub server_id: Option<String>,
}

/// The five observation events a chat adapter delivers, per §6. Each is
/// processed by the core as: persist, then run the earning rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    MessageAdded(ObservedMessage),
    MessageDeleted { id: String },
    ReactionAdded(ObservedReaction),
    ReactionRemoved(ObservedReaction),
    ThreadCreated(ObservedThread),
}

/// Runtime connection state of an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_sentinel_is_recognized_by_prefix() {
        assert!(is_anonymous("anon:abc123"));
        assert!(!is_anonymous("user-42"));
    }
}
