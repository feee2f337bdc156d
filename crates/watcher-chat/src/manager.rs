use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::adapter::ChatAdapter;
use crate::error::{ChatError, Result};
use crate::types::{ChannelStatus, ChatEvent};

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;
const MAX_ATTEMPTS: u32 = 10;
const JITTER_FRACTION: f64 = 0.10;

/// Registers and connects chat adapters, applying an exponential-
/// backoff-with-jitter reconnect policy to each. Every adapter shares one
/// event channel — the core doesn't care which adapter an event came from
/// beyond what's already embedded in the event's own server/channel ids.
pub struct ChatManager {
    adapters: HashMap<String, Box<dyn ChatAdapter>>,
}

impl ChatManager {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(&mut self, adapter: Box<dyn ChatAdapter>) {
        let name = adapter.name().to_string();
        info!(adapter = %name, "registering chat adapter");
        self.adapters.insert(name, adapter);
    }

    /// Connect every registered adapter, each feeding `events`. Failures
    /// are logged and that adapter is skipped; the others still proceed.
    pub async fn connect_all(&mut self, events: mpsc::Sender<ChatEvent>) {
        for (name, adapter) in self.adapters.iter_mut() {
            info!(adapter = %name, "connecting chat adapter");
            if let Err(e) = connect_with_backoff(name, adapter.as_mut(), events.clone()).await {
                error!(adapter = %name, error = %e, "failed to connect chat adapter after retries");
            }
        }
    }

    pub async fn disconnect_all(&mut self) {
        for (name, adapter) in self.adapters.iter_mut() {
            info!(adapter = %name, "disconnecting chat adapter");
            if let Err(e) = adapter.disconnect().await {
                warn!(adapter = %name, error = %e, "error while disconnecting chat adapter");
            }
        }
    }

    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> =
            self.adapters.iter().map(|(name, a)| (name.clone(), a.status())).collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChatManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_with_backoff(name: &str, adapter: &mut dyn ChatAdapter, events: mpsc::Sender<ChatEvent>) -> Result<()> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match adapter.connect(events.clone()).await {
            Ok(()) => {
                info!(adapter = %name, attempt, "chat adapter connected successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    adapter = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "chat adapter connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    Err(ChatError::ConnectionFailed(format!("{name}: exhausted {MAX_ATTEMPTS} attempts")))
}

/// Deterministic pseudo-random jitter derived from the current timestamp,
/// avoiding a `rand` dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
