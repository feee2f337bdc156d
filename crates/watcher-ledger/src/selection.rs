use std::collections::HashMap;

use watcher_core::config::LedgerConfig;
use watcher_store::Store;
use watcher_topics::BudgetGroup;

use crate::error::Result;

const GROUPS: &[BudgetGroup] = &[
    BudgetGroup::Social,
    BudgetGroup::Global,
    BudgetGroup::Spaces,
    BudgetGroup::Semantic,
    BudgetGroup::Culture,
];

/// Greedily pick topics from `group`, sorted by balance descending,
/// spending `group_budget` at `estimated_cost_per_topic` each, up to
/// `max_targets`. `key_filter`, if set, restricts candidates to keys
/// containing the given substring (a layer's `target_filter`). Returns the
/// picked keys and the unspent remainder.
pub fn select_group(
    store: &Store,
    group: BudgetGroup,
    group_budget: f64,
    estimated_cost_per_topic: f64,
    max_targets: u32,
    key_filter: Option<&str>,
) -> Result<(Vec<String>, f64)> {
    let mut candidates: Vec<(String, f64)> = watcher_topics::topics_in_group(store, group)?
        .into_iter()
        .filter(|topic| key_filter.map(|f| topic.key.contains(f)).unwrap_or(true))
        .filter_map(|topic| {
            let balance = store.topic_balance(&topic.key).ok()?;
            (balance > 0.0).then_some((topic.key, balance))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut picked = Vec::new();
    let mut remaining = group_budget;
    for (key, _balance) in candidates {
        if picked.len() as u32 >= max_targets {
            break;
        }
        if estimated_cost_per_topic <= 0.0 || remaining < estimated_cost_per_topic {
            break;
        }
        picked.push(key);
        remaining -= estimated_cost_per_topic;
    }
    Ok((picked, remaining.max(0.0)))
}

/// Full multi-group selection per §4.C step 1-3: split `total_budget`
/// across groups by `group_allocations`, select greedily within each, then
/// redistribute any unspent remainder proportionally among groups that had
/// demand. Does not touch the independent self pool — use [`select_self`].
pub fn select_multi(
    store: &Store,
    config: &LedgerConfig,
    total_budget: f64,
    estimated_cost_per_topic: f64,
    max_targets_per_group: u32,
) -> Result<HashMap<BudgetGroup, Vec<String>>> {
    let mut results: HashMap<BudgetGroup, Vec<String>> = HashMap::new();
    let mut unspent: HashMap<BudgetGroup, f64> = HashMap::new();
    let mut had_demand: Vec<BudgetGroup> = Vec::new();

    for &group in GROUPS {
        let allocation = config.group_allocations.get(group.as_str()).copied().unwrap_or(0.0);
        let group_budget = total_budget * allocation;
        let (picked, left) = select_group(store, group, group_budget, estimated_cost_per_topic, max_targets_per_group, None)?;
        if !picked.is_empty() {
            had_demand.push(group);
        }
        unspent.insert(group, left);
        results.insert(group, picked);
    }

    let total_unspent: f64 = unspent.values().sum();
    if total_unspent > 0.0 && !had_demand.is_empty() {
        let share = total_unspent / had_demand.len() as f64;
        for group in had_demand {
            let already = results.get(&group).map(|v| v.len() as u32).unwrap_or(0);
            let remaining_slots = max_targets_per_group.saturating_sub(already);
            if remaining_slots == 0 {
                continue;
            }
            let (more, _left) = select_group(store, group, share, estimated_cost_per_topic, remaining_slots, None)?;
            results.entry(group).or_default().extend(more);
        }
    }

    Ok(results)
}

/// Sum of positive balances across every topic in `group` — used by the
/// scheduler (§4.F step 2) as the available pool a layer activation draws
/// its `total_budget` from, scaled by that group's configured allocation.
pub fn group_total_balance(store: &Store, group: BudgetGroup) -> Result<f64> {
    let total = watcher_topics::topics_in_group(store, group)?
        .into_iter()
        .filter_map(|topic| store.topic_balance(&topic.key).ok())
        .filter(|b| *b > 0.0)
        .sum();
    Ok(total)
}

/// Restricted single-group selection for one layer activation (§4.F).
pub fn select_for_layer(
    store: &Store,
    group: BudgetGroup,
    total_budget: f64,
    estimated_cost_per_topic: f64,
    max_targets: u32,
    key_filter: Option<&str>,
) -> Result<Vec<String>> {
    let (picked, _left) = select_group(store, group, total_budget, estimated_cost_per_topic, max_targets, key_filter)?;
    Ok(picked)
}

/// The `self` group's independent pool, consumed separately from the
/// other five groups.
pub fn select_self(
    store: &Store,
    config: &LedgerConfig,
    estimated_cost_per_topic: f64,
    max_targets: u32,
    key_filter: Option<&str>,
) -> Result<Vec<String>> {
    let (picked, _left) = select_group(
        store,
        BudgetGroup::SelfGroup,
        config.self_pool,
        estimated_cost_per_topic,
        max_targets,
        key_filter,
    )?;
    Ok(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher_topics::{TopicKey, TopicRegistry};

    #[test]
    fn select_group_never_picks_nonpositive_balances() {
        let store = Store::open_in_memory().expect("open");
        let key = TopicKey::server_channel("srv-1", "c-1");
        store
            .upsert_topic(&key.render(), "channel", "srv-1", false)
            .expect("upsert");
        let (picked, _) = select_group(&store, BudgetGroup::Spaces, 10.0, 1.0, 5, None).expect("select");
        assert!(picked.is_empty());
    }

    #[test]
    fn select_group_respects_max_targets() {
        use std::sync::Arc;
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let topics = TopicRegistry::new(store.clone());
        let config = LedgerConfig::default();
        let ledger = crate::ledger::Ledger::new(&store, &topics, &config);
        for i in 0..5 {
            ledger
                .earn(&TopicKey::server_channel("srv-1", format!("c-{i}")), 3.0, "message", None)
                .expect("earn");
        }
        let (picked, _) = select_group(&store, BudgetGroup::Spaces, 100.0, 1.0, 2, None).expect("select");
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn select_group_key_filter_restricts_candidates() {
        use std::sync::Arc;
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let topics = TopicRegistry::new(store.clone());
        let config = LedgerConfig::default();
        let ledger = crate::ledger::Ledger::new(&store, &topics, &config);
        ledger.earn(&TopicKey::server_channel("srv-1", "c-1"), 3.0, "message", None).expect("earn");
        ledger.earn(&TopicKey::server_thread("srv-1", "t-1"), 3.0, "message", None).expect("earn");

        let (picked, _) = select_group(&store, BudgetGroup::Spaces, 100.0, 1.0, 5, Some(":channel:")).expect("select");
        assert_eq!(picked, vec!["server:srv-1:channel:c-1".to_string()]);
    }
}
