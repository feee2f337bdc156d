use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use watcher_core::config::{LedgerConfig, SchedulerConfig};
use watcher_executor::{Executor, Layer};
use watcher_ledger::selection;
use watcher_store::model::RunRecord;
use watcher_store::Store;
use watcher_topics::{BudgetGroup, TopicKey};

use crate::error::{Result, SchedulerError};
use crate::schedule::next_fire_after;

/// Why an activation is happening, recorded only for logging — selection
/// and locking are identical on every path per §4.F's "manual triggering
/// bypasses the schedule but uses identical locking and selection".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationTrigger {
    Scheduled,
    Threshold,
    Manual,
}

impl ActivationTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            ActivationTrigger::Scheduled => "scheduled",
            ActivationTrigger::Threshold => "threshold",
            ActivationTrigger::Manual => "manual",
        }
    }
}

/// Owns the registered layers and the per-layer single-writer reservation
/// of §5 ("at most one in-flight activation" per layer, `max_instances=1`
/// in the job-store sense). Stateless otherwise — every activation reads
/// its budget and targets fresh from the store.
pub struct ReflectionScheduler {
    store: Arc<Store>,
    ledger_config: LedgerConfig,
    scheduler_config: SchedulerConfig,
    layers: Vec<Layer>,
    locks: DashMap<String, ()>,
}

impl ReflectionScheduler {
    pub fn new(
        store: Arc<Store>,
        ledger_config: LedgerConfig,
        scheduler_config: SchedulerConfig,
        layers: Vec<Layer>,
    ) -> Self {
        Self { store, ledger_config, scheduler_config, layers, locks: DashMap::new() }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Register every scheduled layer's first `next_fire_at`, without
    /// firing anything. Call once at process start before the tick loop.
    pub fn prime(&self) -> Result<()> {
        let now = Utc::now();
        for layer in &self.layers {
            let Some(expr) = &layer.schedule else { continue };
            if self.store.get_scheduler_state(&layer.name)?.is_some() {
                continue;
            }
            let next = next_fire_after(expr, now)?;
            self.store.set_next_fire(&layer.name, next.map(|n| n.to_rfc3339()).as_deref())?;
        }
        Ok(())
    }

    /// One pass over every registered layer: fires any layer whose cron
    /// schedule is due, or whose trigger threshold has crossed. Intended to
    /// be called on a fixed tick from the process's scheduler loop.
    pub async fn tick(&self, executor: &Executor<'_>) -> Result<Vec<RunRecord>> {
        let mut fired = Vec::new();
        let now = Utc::now();

        for layer in &self.layers {
            if self.locks.contains_key(&layer.name) {
                continue;
            }

            if let Some(trigger) = self.due_trigger(layer, now)? {
                match self.activate(layer, trigger, executor).await {
                    Ok(run) => fired.push(run),
                    Err(e) => warn!(layer = %layer.name, error = %e, "layer activation failed"),
                }
            }
        }

        Ok(fired)
    }

    /// Which activation path (if any) is due for `layer` right now. Time-
    /// driven check first (it also rolls a missed fire forward so it is
    /// only ever evaluated once per call), then threshold-driven.
    fn due_trigger(&self, layer: &Layer, now: DateTime<Utc>) -> Result<Option<ActivationTrigger>> {
        if self.time_driven_due(layer, now)? {
            return Ok(Some(ActivationTrigger::Scheduled));
        }
        if self.threshold_driven_due(layer)? {
            return Ok(Some(ActivationTrigger::Threshold));
        }
        Ok(None)
    }

    fn time_driven_due(&self, layer: &Layer, now: DateTime<Utc>) -> Result<bool> {
        let Some(expr) = &layer.schedule else { return Ok(false) };
        let state = self.store.get_scheduler_state(&layer.name)?;
        let next_fire_at = match state.as_ref().and_then(|s| s.next_fire_at.as_deref()) {
            Some(raw) => DateTime::parse_from_rfc3339(raw).map(|d| d.with_timezone(&Utc)).ok(),
            None => None,
        };

        let Some(next_fire_at) = next_fire_at else {
            // Never primed (new layer file) — register its first fire and
            // don't fire this tick.
            let next = next_fire_after(expr, now)?;
            self.store.set_next_fire(&layer.name, next.map(|n| n.to_rfc3339()).as_deref())?;
            return Ok(false);
        };

        if now < next_fire_at {
            return Ok(false);
        }

        let grace = Duration::seconds(self.scheduler_config.misfire_grace_secs);
        if now - next_fire_at > grace {
            // Missed its window entirely — coalesce to the next future
            // occurrence without firing a retroactive run.
            info!(layer = %layer.name, missed_at = %next_fire_at, "scheduled run missed its grace window");
            let next = next_fire_after(expr, now)?;
            self.store.set_next_fire(&layer.name, next.map(|n| n.to_rfc3339()).as_deref())?;
            return Ok(false);
        }

        Ok(true)
    }

    fn threshold_driven_due(&self, layer: &Layer) -> Result<bool> {
        let Some(threshold) = layer.trigger_threshold else { return Ok(false) };
        let since = self
            .store
            .get_scheduler_state(&layer.name)?
            .and_then(|s| s.last_fired_at)
            .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string());
        let count = self.store.count_insights_since(&layer.category, &since)?;
        Ok(count >= threshold)
    }

    /// Run one activation of `layer` per §4.F's five steps: lock, budget,
    /// select, execute, unlock. Used by both the tick loop and manual
    /// triggering (CLI `reflect trigger`), which share this exact path.
    pub async fn activate(&self, layer: &Layer, trigger: ActivationTrigger, executor: &Executor<'_>) -> Result<RunRecord> {
        if self.locks.insert(layer.name.clone(), ()).is_some() {
            return Err(SchedulerError::AlreadyRunning(layer.name.clone()));
        }
        let result = self.activate_locked(layer, trigger, executor).await;
        self.locks.remove(&layer.name);
        result
    }

    async fn activate_locked(&self, layer: &Layer, trigger: ActivationTrigger, executor: &Executor<'_>) -> Result<RunRecord> {
        let group = self.target_group(layer)?;
        let cost = self.ledger_config.reflection_cost_per_insight;
        let key_filter = layer.target_filter.as_deref();

        let target_keys = if group == BudgetGroup::SelfGroup {
            selection::select_self(&self.store, &self.ledger_config, cost, layer.max_targets, key_filter)?
        } else {
            let total_budget = selection::group_total_balance(&self.store, group)?;
            selection::select_for_layer(&self.store, group, total_budget, cost, layer.max_targets, key_filter)?
        };

        let targets: Vec<TopicKey> = target_keys
            .iter()
            .filter_map(|key| match TopicKey::parse(key) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(layer = %layer.name, key = %key, error = %e, "dropping unparseable selected key");
                    None
                }
            })
            .collect();

        info!(
            layer = %layer.name,
            trigger = trigger.as_str(),
            group = group.as_str(),
            targets = targets.len(),
            "reflection layer activating"
        );

        let run = executor.execute_layer(layer, &targets).await?;

        let next_fire_at = match &layer.schedule {
            Some(expr) => next_fire_after(expr, Utc::now())?.map(|n| n.to_rfc3339()),
            None => None,
        };
        self.store.record_layer_fire(&layer.name, next_fire_at.as_deref())?;

        Ok(run)
    }

    /// Resolve a layer's `target_category` to a budget group. Falls back to
    /// the layer's own `category` field (e.g. a layer categorized `social`
    /// with no explicit `target_category` targets the social group).
    fn target_group(&self, layer: &Layer) -> Result<BudgetGroup> {
        layer
            .target_category
            .as_deref()
            .and_then(BudgetGroup::parse)
            .or_else(|| BudgetGroup::parse(&layer.category))
            .ok_or_else(|| SchedulerError::NoTargetGroup(layer.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use watcher_executor::PromptEngine;
    use watcher_model::StubClient;
    use watcher_store::model::RunStatus;
    use watcher_topics::TopicRegistry;

    fn layer(name: &str, category: &str, schedule: Option<&str>, trigger_threshold: Option<u32>) -> Layer {
        Layer {
            name: name.to_string(),
            category: category.to_string(),
            description: None,
            schedule: schedule.map(str::to_string),
            trigger_threshold,
            target_category: None,
            target_filter: None,
            max_targets: 5,
            nodes: vec![watcher_executor::Node::Output { format: "text".to_string() }],
            content_hash: "test".to_string(),
        }
    }

    #[test]
    fn target_group_falls_back_to_layer_category() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let scheduler = ReflectionScheduler::new(store, LedgerConfig::default(), SchedulerConfig::default(), vec![]);
        let layer = layer("reflect_social", "social", None, None);
        assert_eq!(scheduler.target_group(&layer).expect("group"), BudgetGroup::Social);
    }

    #[test]
    fn unresolvable_target_group_is_an_error() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let scheduler = ReflectionScheduler::new(store, LedgerConfig::default(), SchedulerConfig::default(), vec![]);
        let layer = layer("reflect_mystery", "not-a-group", None, None);
        assert!(scheduler.target_group(&layer).is_err());
    }

    fn sample_insight(run_id: &str) -> watcher_store::NewInsight {
        watcher_store::NewInsight {
            topic_key: "self:core".to_string(),
            category: "self".to_string(),
            content: "noticed something".to_string(),
            sources_scope_max: watcher_store::model::VisibilityScope::Public,
            run_id: run_id.to_string(),
            salience_spent: 1.0,
            strength_adjustment: 1.0,
            strength: 1.0,
            confidence: 0.5,
            importance: 0.5,
            novelty: 0.5,
            valence: watcher_store::model::Valence { joy: None, concern: None, curiosity: Some(0.5), warmth: None, tension: None },
            supersedes: None,
            cross_links: watcher_store::model::CrossLinks::default(),
            conflicts_with: vec![],
            synthesis_sources: vec![],
        }
    }

    #[test]
    fn threshold_driven_fires_once_count_crosses_configured_threshold() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let scheduler = ReflectionScheduler::new(store.clone(), LedgerConfig::default(), SchedulerConfig::default(), vec![]);
        let layer = layer("self_review", "self", None, Some(2));

        assert!(!scheduler.threshold_driven_due(&layer).expect("check"));

        store.insert_insight(sample_insight("run-1")).expect("insert 1");
        assert!(!scheduler.threshold_driven_due(&layer).expect("check"));

        store.insert_insight(sample_insight("run-2")).expect("insert 2");
        assert!(scheduler.threshold_driven_due(&layer).expect("check"));
    }

    #[tokio::test]
    async fn activation_with_no_candidates_records_a_dry_run() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let topics = TopicRegistry::new(store.clone());
        let ledger_config = LedgerConfig::default();
        let scheduler_config = SchedulerConfig::default();
        let llm = StubClient;
        let prompts = PromptEngine::new("/nonexistent").expect("engine");
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);

        let scheduler = ReflectionScheduler::new(store.clone(), ledger_config.clone(), scheduler_config.clone(), vec![]);
        let layer = layer("reflect_social", "social", None, None);

        let run = scheduler.activate(&layer, ActivationTrigger::Manual, &executor).await.expect("activate");
        assert_eq!(run.status, RunStatus::Dry);
    }

    #[tokio::test]
    async fn double_activation_of_the_same_layer_is_rejected_while_locked() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let topics = TopicRegistry::new(store.clone());
        let ledger_config = LedgerConfig::default();
        let scheduler_config = SchedulerConfig::default();
        let llm = StubClient;
        let prompts = PromptEngine::new("/nonexistent").expect("engine");
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);

        let scheduler = ReflectionScheduler::new(store, ledger_config.clone(), scheduler_config.clone(), vec![]);
        let layer = layer("reflect_social", "social", None, None);

        scheduler.locks.insert(layer.name.clone(), ());
        let err = scheduler.activate(&layer, ActivationTrigger::Manual, &executor).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning(name) if name == layer.name));
    }
}
