use watcher_core::config::LedgerConfig;
use watcher_store::model::TxnKind;
use watcher_store::Store;
use watcher_topics::TopicKey;

use crate::error::Result;

/// First DM activity from a user warms their global user topic, unless
/// already warm. Returns whether a warm entry was written.
pub fn warm_on_first_dm(store: &Store, config: &LedgerConfig, user: &str) -> Result<bool> {
    warm_if_cold(store, config, &TopicKey::user(user), "first_dm_activity")
}

/// Activity observed in at least two distinct servers warms the global
/// user topic, unless already warm.
pub fn warm_on_multi_server(store: &Store, config: &LedgerConfig, user: &str, distinct_servers: u32) -> Result<bool> {
    if distinct_servers < 2 {
        return Ok(false);
    }
    warm_if_cold(store, config, &TopicKey::user(user), "multi_server_activity")
}

fn warm_if_cold(store: &Store, config: &LedgerConfig, key: &TopicKey, reason: &str) -> Result<bool> {
    let rendered = key.render();
    let balance = store.topic_balance(&rendered)?;
    if balance > config.warm_threshold {
        return Ok(false);
    }
    store.upsert_topic(&rendered, key.category.as_str(), "global", true)?;
    store.append_ledger_entry(&rendered, TxnKind::Warm, config.initial_global_warmth, reason, None)?;
    store.touch_topic(&rendered)?;
    Ok(true)
}

/// A global dyad is warm iff both of its members' global user topics are
/// warm. No warm entry is ever written for the dyad itself.
pub fn dyad_is_warm(store: &Store, config: &LedgerConfig, a: &str, b: &str) -> Result<bool> {
    let balance_a = store.topic_balance(&TopicKey::user(a).render())?;
    let balance_b = store.topic_balance(&TopicKey::user(b).render())?;
    Ok(balance_a > config.warm_threshold && balance_b > config.warm_threshold)
}
