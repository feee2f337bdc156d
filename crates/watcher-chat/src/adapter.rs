use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ChannelStatus, ChatEvent};

/// Common interface implemented by every chat adapter. Inbound-only: the
/// core never speaks, so there is no `send`. `connect` is handed a sender
/// and is expected to
/// spawn whatever background task(s) feed it observed events; it returns
/// once the adapter has reached a stable connected (or failed) state.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"discord"`).
    fn name(&self) -> &str;

    async fn connect(&mut self, events: mpsc::Sender<ChatEvent>) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn status(&self) -> ChannelStatus;
}
