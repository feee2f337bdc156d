use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::adapter::ChatAdapter;
use crate::error::Result;
use crate::types::{ChannelStatus, ChatEvent};

/// Observation-only Discord adapter. A full production bot (slash commands,
/// voice, presence) is out of scope; this exists to prove the
/// `ChatAdapter` contract against a real gateway shape and gives operators
/// something to point a bot token at. `connect` currently only records the
/// bot token and marks itself connected — wiring up an actual gateway
/// client is left for the integration that owns deploying a Discord bot.
pub struct DiscordAdapter {
    bot_token: String,
    status: Arc<Mutex<ChannelStatus>>,
}

impl DiscordAdapter {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self { bot_token: bot_token.into(), status: Arc::new(Mutex::new(ChannelStatus::Disconnected)) }
    }
}

#[async_trait]
impl ChatAdapter for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn connect(&mut self, _events: mpsc::Sender<ChatEvent>) -> Result<()> {
        if self.bot_token.is_empty() {
            *self.status.lock().unwrap() = ChannelStatus::Error("missing bot token".to_string());
            return Err(crate::error::ChatError::ConnectionFailed("missing discord bot token".to_string()));
        }
        info!("discord adapter connected (observation-only)");
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_a_token_fails() {
        let mut adapter = DiscordAdapter::new("");
        let (tx, _rx) = mpsc::channel(8);
        assert!(adapter.connect(tx).await.is_err());
        assert!(matches!(adapter.status(), ChannelStatus::Error(_)));
    }

    #[tokio::test]
    async fn connect_with_a_token_succeeds() {
        let mut adapter = DiscordAdapter::new("fake-token");
        let (tx, _rx) = mpsc::channel(8);
        adapter.connect(tx).await.unwrap();
        assert!(matches!(adapter.status(), ChannelStatus::Connected));
    }
}
