use watcher_core::config::LedgerConfig;
use watcher_store::model::TxnKind;
use watcher_store::Store;
use watcher_topics::{Category, TopicKey, TopicRegistry};

use crate::error::Result;
use crate::warming;

/// The earn/spend/propagate machinery of §4.C, bound to one store, topic
/// registry and config. Stateless beyond those three — safe to construct
/// fresh per call site.
pub struct Ledger<'a> {
    store: &'a Store,
    topics: &'a TopicRegistry,
    config: &'a LedgerConfig,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a Store, topics: &'a TopicRegistry, config: &'a LedgerConfig) -> Self {
        Self { store, topics, config }
    }

    fn cap_for(&self, key: &TopicKey) -> f64 {
        self.config
            .caps
            .get(key.category.as_str())
            .copied()
            .unwrap_or(self.config.default_cap)
    }

    /// `earn(topic, amount, reason, source?)` per §4.C. Returns
    /// `(new_balance, overflow)`.
    pub fn earn(&self, key: &TopicKey, amount: f64, reason: &str, source: Option<&TopicKey>) -> Result<(f64, f64)> {
        self.topics.ensure(key)?;
        let rendered = key.render();
        let balance = self.store.topic_balance(&rendered)?;
        let cap = self.cap_for(key);
        let headroom = (cap - balance).max(0.0);
        let actual = amount.min(headroom).max(0.0);
        let overflow = amount - actual;

        if actual > 0.0 {
            let source_key = source.map(|s| s.render());
            self.store
                .append_ledger_entry(&rendered, TxnKind::Earn, actual, reason, source_key.as_deref())?;
            self.store.touch_topic(&rendered)?;
            self.propagate(key, actual)?;
        }
        if overflow > 0.0 {
            self.spillover(key, overflow)?;
        }

        Ok((balance + actual, overflow))
    }

    /// `spend(topic, amount, reason)` per §4.C. Returns the actual amount
    /// spent (clamped to the available balance).
    pub fn spend(&self, key: &TopicKey, amount: f64, reason: &str) -> Result<f64> {
        let rendered = key.render();
        let balance = self.store.topic_balance(&rendered)?;
        let actual = amount.min(balance).max(0.0);
        if actual > 0.0 {
            self.store
                .append_ledger_entry(&rendered, TxnKind::Spend, -actual, reason, None)?;
            self.store.append_ledger_entry(
                &rendered,
                TxnKind::Retain,
                actual * self.config.retention_rate,
                reason,
                None,
            )?;
        }
        Ok(actual)
    }

    pub fn balance(&self, key: &TopicKey) -> Result<f64> {
        Ok(self.store.topic_balance(&key.render())?)
    }

    /// A global dyad has no balance of its own that determines warmth — it
    /// is warm iff both its members' global user topics are warm (§4.C
    /// "Warming"). Every other topic is warm when its own balance exceeds
    /// the configured threshold.
    pub fn is_warm(&self, key: &TopicKey) -> Result<bool> {
        if key.category == Category::Dyad && key.is_global() {
            return Ok(warming::dyad_is_warm(self.store, self.config, &key.parts[0], &key.parts[1])?);
        }
        Ok(self.balance(key)? > self.config.warm_threshold)
    }

    /// One-hop, non-recursive propagation of an earn to the topic's
    /// related set (§4.B). Only warm related topics receive a share.
    fn propagate(&self, key: &TopicKey, amount: f64) -> Result<()> {
        for related in watcher_topics::related_topics(self.store, key)? {
            if !self.is_warm(&related)? {
                continue;
            }
            let factor = if key.is_global() != related.is_global() {
                self.config.global_propagation_factor
            } else {
                self.config.propagation_factor
            };
            self.store.append_ledger_entry(
                &related.render(),
                TxnKind::Propagate,
                amount * factor,
                "propagation",
                Some(&key.render()),
            )?;
        }
        Ok(())
    }

    /// Spillover of the overflow from a capped earn, to the same related
    /// set, again restricted to warm targets. Does not itself propagate.
    fn spillover(&self, key: &TopicKey, overflow: f64) -> Result<()> {
        for related in watcher_topics::related_topics(self.store, key)? {
            if !self.is_warm(&related)? {
                continue;
            }
            self.store.append_ledger_entry(
                &related.render(),
                TxnKind::Spillover,
                overflow * self.config.spillover_factor,
                "spillover",
                Some(&key.render()),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn harness() -> (Arc<Store>, LedgerConfig) {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        (store, LedgerConfig::default())
    }

    #[test]
    fn earn_clamps_to_cap_and_reports_overflow() {
        let (store, mut config) = harness();
        config.caps.insert("user".to_string(), 5.0);
        let topics = TopicRegistry::new(store.clone());
        let ledger = Ledger::new(&store, &topics, &config);
        let key = TopicKey::user("u-1");

        let (balance, overflow) = ledger.earn(&key, 8.0, "message", None).expect("earn");
        assert_eq!(balance, 5.0);
        assert_eq!(overflow, 3.0);
    }

    #[test]
    fn spend_never_goes_below_zero_and_books_retain() {
        let (store, config) = harness();
        let topics = TopicRegistry::new(store.clone());
        let ledger = Ledger::new(&store, &topics, &config);
        let key = TopicKey::user("u-1");

        ledger.earn(&key, 2.0, "message", None).expect("earn");
        let spent = ledger.spend(&key, 10.0, "insight").expect("spend");
        assert_eq!(spent, 2.0);
        assert_eq!(ledger.balance(&key).expect("balance"), 2.0 - 2.0 + 2.0 * config.retention_rate);
    }

    #[test]
    fn global_dyad_warmth_follows_its_members_not_its_own_balance() {
        let (store, config) = harness();
        let topics = TopicRegistry::new(store.clone());
        let ledger = Ledger::new(&store, &topics, &config);
        let dyad = TopicKey::dyad("a", "b");

        assert!(!ledger.is_warm(&dyad).expect("cold before either member warms"));

        crate::warming::warm_on_first_dm(&store, &config, "a").expect("warm a");
        assert!(!ledger.is_warm(&dyad).expect("still cold with only one member warm"));

        crate::warming::warm_on_first_dm(&store, &config, "b").expect("warm b");
        assert!(ledger.is_warm(&dyad).expect("warm once both members are warm"));
    }
}
