use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::adapter::ChatAdapter;
use crate::error::Result;
use crate::types::{ChannelStatus, ChatEvent};

/// An in-memory adapter for tests and local development: events are pushed
/// onto it directly via [`LoopbackAdapter::push`] rather than arriving from
/// a real gateway. `connect` just forwards whatever is queued so far and
/// remembers the sender for any events pushed afterwards.
pub struct LoopbackAdapter {
    status: Arc<Mutex<ChannelStatus>>,
    sender: Arc<Mutex<Option<mpsc::Sender<ChatEvent>>>>,
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(ChannelStatus::Disconnected)),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Feed an event as if it had just arrived from the wire. Returns
    /// immediately if `connect` hasn't been called yet.
    pub async fn push(&self, event: ChatEvent) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatAdapter for LoopbackAdapter {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&mut self, events: mpsc::Sender<ChatEvent>) -> Result<()> {
        *self.sender.lock().unwrap() = Some(events);
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.sender.lock().unwrap() = None;
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
    use crate::types::ObservedMessage;
    use watcher_store::model::VisibilityScope;

    #[tokio::test]
    async fn pushed_events_arrive_once_connected() {
        let mut adapter = LoopbackAdapter::new();
        let (tx, mut rx) = mpsc::channel(8);
        adapter.connect(tx).await.unwrap();

        adapter
            .push(ChatEvent::MessageAdded(ObservedMessage {
                id: "m1".to_string(),
                channel_id: "c1".to_string(),
                server_id: None,
                author_id: Some("u1".to_string()),
                content: "hi".to_string(),
                created_at: "2026-01-01T00:00:00Z".to_string(),
                visibility_scope: VisibilityScope::Dm,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
                mentions: vec![],
            }))
            .await;

        let event = rx.recv().await.expect("event delivered");
        assert!(matches!(event, ChatEvent::MessageAdded(_)));
    }

    #[tokio::test]
    async fn events_pushed_before_connect_are_dropped() {
        let adapter = LoopbackAdapter::new();
        // No connect() yet, so this is a no-op rather than a panic.
        adapter.push(ChatEvent::MessageDeleted { id: "m1".to_string() }).await;
        assert!(matches!(adapter.status(), ChannelStatus::Disconnected));
    }
}
