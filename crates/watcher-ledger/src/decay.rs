use chrono::{DateTime, Duration, Utc};
use tracing::info;
use watcher_core::config::LedgerConfig;
use watcher_store::model::TxnKind;
use watcher_store::Store;

use crate::error::Result;

/// Run the periodic decay job (expected daily). For every topic inactive
/// longer than `decay_threshold_days` with a positive balance, applies one
/// decay entry covering every whole day missed since the last decay (or
/// since last activity, if never decayed), using the compounding formula
/// `amount = balance * (1 - (1 - rate) ^ days)`. Idempotent within a single
/// day: a topic already decayed today is skipped. Returns the topic keys
/// that were decayed.
pub fn run_decay(store: &Store, config: &LedgerConfig, now: DateTime<Utc>) -> Result<Vec<String>> {
    let mut decayed = Vec::new();
    let threshold = now - Duration::days(config.decay_threshold_days);
    let inactive = store.list_inactive_topics(&threshold.to_rfc3339())?;

    for topic in inactive {
        let balance = store.topic_balance(&topic.key)?;
        if balance <= 0.0 {
            continue;
        }

        // A topic only starts accruing decay once it crosses the grace
        // threshold, not from the moment it last went quiet — so the
        // baseline for a never-yet-decayed topic is `last_activity_at +
        // decay_threshold_days`, and the exponent is days past *that*
        // instant (see S3: 10 days inactive, 7-day threshold -> 3 days
        // of decay, not 10).
        let baseline = match store.last_entry_of_kind(&topic.key, TxnKind::Decay)? {
            Some(entry) => parse_or(&entry.created_at, now),
            None => parse_or(&topic.last_activity_at, now) + Duration::days(config.decay_threshold_days),
        };

        let days = (now - baseline).num_days();
        if days < 1 {
            continue;
        }

        let retained_fraction = (1.0 - config.decay_rate_per_day).powi(days as i32);
        let amount = balance * (1.0 - retained_fraction);
        if amount < config.decay_min_step {
            continue;
        }

        store.append_ledger_entry(&topic.key, TxnKind::Decay, -amount, "periodic_decay", None)?;
        info!(topic = %topic.key, amount, days, "decay_applied");
        decayed.push(topic.key);
    }

    Ok(decayed)
}

fn parse_or(raw: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher_topics::TopicKey;

    #[test]
    fn freshly_active_topics_never_decay() {
        let store = Store::open_in_memory().expect("open");
        let config = LedgerConfig::default();
        let key = TopicKey::user("u-1").render();
        store.upsert_topic(&key, "user", "global", false).expect("upsert");
        store
            .append_ledger_entry(&key, TxnKind::Earn, 10.0, "message", None)
            .expect("earn");
        store.touch_topic(&key).expect("touch");

        let decayed = run_decay(&store, &config, Utc::now()).expect("decay");
        assert!(decayed.is_empty());
    }

    #[test]
    fn decay_after_grace_period_uses_days_past_threshold_not_days_since_activity() {
        // S3: balance 100, decay_threshold_days=7, decay_rate_per_day=0.01,
        // last_activity_at exactly 10 days ago -> exponent is 10-7=3, not 10.
        let store = Store::open_in_memory().expect("open");
        let config = LedgerConfig::default();
        let key = TopicKey::user("u-1").render();
        store.upsert_topic(&key, "user", "global", false).expect("upsert");
        store
            .append_ledger_entry(&key, TxnKind::Earn, 100.0, "message", None)
            .expect("earn");
        let ten_days_ago = Utc::now() - Duration::days(10);
        store.set_last_activity_at(&key, &ten_days_ago.to_rfc3339()).expect("backdate");

        let decayed = run_decay(&store, &config, Utc::now()).expect("decay");
        assert_eq!(decayed, vec![key.clone()]);

        let balance = store.topic_balance(&key).expect("balance");
        assert!((balance - 97.03).abs() < 0.05, "balance was {balance}");
    }

    #[test]
    fn decay_is_idempotent_within_the_same_day() {
        let store = Store::open_in_memory().expect("open");
        let config = LedgerConfig::default();
        let key = TopicKey::user("u-1").render();
        store.upsert_topic(&key, "user", "global", false).expect("upsert");
        store
            .append_ledger_entry(&key, TxnKind::Earn, 100.0, "message", None)
            .expect("earn");
        let ten_days_ago = Utc::now() - Duration::days(10);
        store.set_last_activity_at(&key, &ten_days_ago.to_rfc3339()).expect("backdate");

        let now = Utc::now();
        run_decay(&store, &config, now).expect("first decay");
        let balance_after_first = store.topic_balance(&key).expect("balance");

        run_decay(&store, &config, now + Duration::seconds(5)).expect("second decay");
        let balance_after_second = store.topic_balance(&key).expect("balance");

        assert_eq!(balance_after_first, balance_after_second);
    }

    #[test]
    fn compounding_formula_matches_one_minus_rate_to_the_days() {
        let balance = 10.0_f64;
        let rate = 0.01_f64;
        let days = 14_i32;
        let amount = balance * (1.0 - (1.0 - rate).powi(days));
        assert!((amount - 1.306).abs() < 0.01);
    }
}
