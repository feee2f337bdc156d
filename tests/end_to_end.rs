//! Scenario tests S1-S6 covering the core subsystems: one test per
//! scenario, spanning store + topics + ledger + executor + insights.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use watcher_core::config::{LedgerConfig, SchedulerConfig};
use watcher_executor::layer::parse as parse_layer;
use watcher_executor::{Executor, PromptEngine};
use watcher_insights::{retrieve, Profile, RetrievalRequest};
use watcher_ledger::{run_decay, warm_on_multi_server, Ledger};
use watcher_model::{Completion, LlmClient, ModelError, Usage};
use watcher_store::model::{RunStatus, TxnKind};
use watcher_store::Store;
use watcher_topics::{TopicKey, TopicRegistry};

fn templates_dir(name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("watcher_e2e_{name}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for (stem, body) in files {
        std::fs::write(dir.join(format!("{stem}.j2")), body).unwrap();
    }
    dir
}

#[test]
fn s1_earn_propagates_and_spills_over_to_a_warm_related_topic() {
    let store = Store::open_in_memory().expect("open");
    let mut config = LedgerConfig::default();
    config.caps.insert("user".to_string(), 10.0);
    config.warm_threshold = 1.0;
    config.propagation_factor = 0.3;
    config.spillover_factor = 0.5;
    let topics = TopicRegistry::new(Arc::new(store));
    let store = topics.store().clone();
    let ledger = Ledger::new(&store, &topics, &config);

    let dyad_ab = TopicKey::server_dyad("S", "A", "B");
    let dyad_ac = TopicKey::server_dyad("S", "A", "C");
    topics.ensure(&dyad_ab).expect("ensure dyad ab");
    topics.ensure(&dyad_ac).expect("ensure dyad ac");
    store.append_ledger_entry(&dyad_ab.render(), TxnKind::Earn, 2.0, "seed", None).expect("seed ab");

    let user_a = TopicKey::server_user("S", "A");
    let (balance, overflow) = ledger.earn(&user_a, 12.0, "msg", None).expect("earn");

    assert_eq!(balance, 10.0);
    assert_eq!(overflow, 2.0);
    assert_eq!(store.topic_balance(&user_a.render()).unwrap(), 10.0);
    assert_eq!(store.topic_balance(&dyad_ab.render()).unwrap(), 6.0);
    assert_eq!(store.topic_balance(&dyad_ac.render()).unwrap(), 0.0);
}

#[test]
fn s2_spend_clamps_to_balance_and_books_a_partial_retain() {
    let store = Arc::new(Store::open_in_memory().expect("open"));
    let config = LedgerConfig::default();
    let topics = TopicRegistry::new(store.clone());
    let ledger = Ledger::new(&store, &topics, &config);

    let key = TopicKey::user("u-1");
    topics.ensure(&key).expect("ensure");
    store.append_ledger_entry(&key.render(), TxnKind::Earn, 20.0, "seed", None).expect("seed");

    let spent = ledger.spend(&key, 5.0, "r1").expect("spend");

    assert_eq!(spent, 5.0);
    assert_eq!(ledger.balance(&key).unwrap(), 16.5);
}

#[test]
fn s3_decay_after_grace_period_only_charges_days_past_the_threshold() {
    let store = Store::open_in_memory().expect("open");
    let config = LedgerConfig::default();
    let key = TopicKey::user("u-1").render();
    store.upsert_topic(&key, "user", "global", false).expect("upsert");
    store.append_ledger_entry(&key, TxnKind::Earn, 100.0, "seed", None).expect("seed");
    let ten_days_ago = Utc::now() - Duration::days(10);
    store.set_last_activity_at(&key, &ten_days_ago.to_rfc3339()).expect("backdate");

    let decayed = run_decay(&store, &config, Utc::now()).expect("decay");

    assert_eq!(decayed, vec![key.clone()]);
    let balance = store.topic_balance(&key).unwrap();
    assert!((balance - 97.03).abs() < 0.05, "balance was {balance}");
}

/// Differentiates behavior by the rendered topic key embedded in the
/// prompt — target 2 always times out, target 3 always returns an
/// unparseable response that falls back to a raw-text insight.
struct ScriptedClient;

#[async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _profile: &str, _system: &str, prompt: &str, _max_tokens: u32) -> watcher_model::error::Result<Completion> {
        if prompt.contains("user:target-2") {
            return Err(ModelError::Timeout(30));
        }
        if prompt.contains("user:target-3") {
            return Ok(Completion { text: "no useful signal here".to_string(), usage: Usage { tokens_in: 10, tokens_out: 5 } });
        }
        Ok(Completion {
            text: "{\"content\": \"target one reflection\", \"strength_adjustment\": 1.0, \
                   \"confidence\": 0.6, \"importance\": 0.6, \"novelty\": 0.6, \"valence\": {\"curiosity\": 0.6}}"
                .to_string(),
            usage: Usage { tokens_in: 20, tokens_out: 15 },
        })
    }
}

#[tokio::test]
async fn s4_partial_run_skips_the_failing_target_and_falls_back_on_the_empty_one() {
    let store = Arc::new(Store::open_in_memory().expect("open"));
    let ledger_config = LedgerConfig::default();
    let scheduler_config = SchedulerConfig::default();
    let topics = TopicRegistry::new(store.clone());

    let target1 = TopicKey::user("target-1");
    let target2 = TopicKey::user("target-2");
    let target3 = TopicKey::user("target-3");
    let ledger = Ledger::new(&store, &topics, &ledger_config);
    for target in [&target1, &target2, &target3] {
        ledger.earn(target, ledger_config.reflection_cost_per_insight, "seed", None).expect("fund target");
    }

    let dir = templates_dir("s4", &[("reflect", "Topic: {{ topic }}")]);
    let prompts = PromptEngine::new(dir.to_str().unwrap()).expect("prompts");
    let llm = ScriptedClient;
    let profiles: HashMap<String, String> = HashMap::new();
    let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);

    let layer = parse_layer(
        r#"
        name = "reflect_user"
        category = "social"
        max_targets = 5

        [[nodes]]
        type = "fetch_messages"

        [[nodes]]
        type = "llm_call"
        prompt_template = "reflect"
        model = "reflect"
        max_tokens = 200

        [[nodes]]
        type = "store_insight"
        category = "social"
        "#,
    )
    .expect("parse layer");

    let run = executor
        .execute_layer(&layer, &[target1.clone(), target2.clone(), target3.clone()])
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.targets_matched, 3);
    assert_eq!(run.targets_processed, 2);
    assert_eq!(run.targets_skipped, 1);
    assert_eq!(run.insights_created, 2);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].topic, target2.render());
    assert_eq!(run.errors[0].node, "llm_call");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn s5_activity_in_two_servers_warms_the_global_user_topic_and_becomes_propagation_eligible() {
    let store = Arc::new(Store::open_in_memory().expect("open"));
    let config = LedgerConfig::default();
    let topics = TopicRegistry::new(store.clone());
    let ledger = Ledger::new(&store, &topics, &config);

    let global_user = TopicKey::user("U");
    assert_eq!(store.topic_balance(&global_user.render()).unwrap(), 0.0);

    let server1_user = TopicKey::server_user("S1", "U");
    ledger.earn(&server1_user, 3.0, "message_added", None).expect("earn s1");
    assert_eq!(store.topic_balance(&global_user.render()).unwrap(), 0.0, "still cold after one server");

    let distinct = store.record_user_server_activity("U", "S1").expect("record s1");
    assert_eq!(distinct, 1);
    warm_on_multi_server(&store, &config, "U", distinct).expect("no warm yet");
    assert_eq!(store.topic_balance(&global_user.render()).unwrap(), 0.0);

    let server2_user = TopicKey::server_user("S2", "U");
    ledger.earn(&server2_user, 3.0, "message_added", None).expect("earn s2");
    let distinct = store.record_user_server_activity("U", "S2").expect("record s2");
    assert_eq!(distinct, 2);
    let warmed = warm_on_multi_server(&store, &config, "U", distinct).expect("warm");
    assert!(warmed);

    let balance = store.topic_balance(&global_user.render()).unwrap();
    assert_eq!(balance, config.initial_global_warmth);

    // Now that user:U is warm, a further earn on a third server propagates
    // a share of the earn up to the global topic via `related_topics`.
    let server3_user = TopicKey::server_user("S3", "U");
    ledger.earn(&server3_user, 5.0, "message_added", None).expect("earn s3");
    let balance_after = store.topic_balance(&global_user.render()).unwrap();
    assert!(balance_after > config.initial_global_warmth, "expected propagation onto the now-warm global topic");
}

#[test]
fn s6_recent_and_deep_profiles_order_insights_by_their_dominant_axis() {
    let store = Store::open_in_memory().expect("open");
    let topic = TopicKey::user("t-retrieval").render();
    store.upsert_topic(&topic, "user", "global", false).expect("upsert");

    let (metrics_weak, valence) = watcher_insights::fallback_metrics();
    let i1 = watcher_insights::store_insight(
        &store,
        "run-1",
        &topic,
        "social",
        "a fleeting observation",
        watcher_insights::InsightMetrics { strength_adjustment: 1.0, ..metrics_weak },
        valence.clone(),
        watcher_store::model::VisibilityScope::Public,
        watcher_store::model::CrossLinks::default(),
        1.0,
        None,
        Vec::new(),
        Vec::new(),
    )
    .expect("store i1");
    let (metrics_strong, _) = watcher_insights::fallback_metrics();
    let i2 = watcher_insights::store_insight(
        &store,
        "run-1",
        &topic,
        "social",
        "a strong standing pattern",
        watcher_insights::InsightMetrics { strength_adjustment: 1.0, ..metrics_strong },
        valence,
        watcher_store::model::VisibilityScope::Public,
        watcher_store::model::CrossLinks::default(),
        9.0,
        None,
        Vec::new(),
        Vec::new(),
    )
    .expect("store i2");

    let now = Utc::now();
    store.set_insight_created_at(&i1.id, &(now - Duration::hours(2)).to_rfc3339()).expect("backdate i1");
    store.set_insight_created_at(&i2.id, &(now - Duration::days(40)).to_rfc3339()).expect("backdate i2");

    let recent = retrieve(&store, &RetrievalRequest { topic_key: &topic, profile: Profile::Recent, limit: 2, include_quarantined: false }, now)
        .expect("retrieve recent");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].insight.id, i1.id);
    assert_eq!(recent[1].insight.id, i2.id);
    assert_eq!(recent[0].age, "2 hours ago");
    assert_eq!(recent[1].age, "1 month ago");
    assert_eq!(recent[1].strength_bucket.as_str(), "strong");

    let deep = retrieve(&store, &RetrievalRequest { topic_key: &topic, profile: Profile::Deep, limit: 2, include_quarantined: false }, now)
        .expect("retrieve deep");
    assert_eq!(deep.len(), 2);
    assert_eq!(deep[0].insight.id, i2.id);
    assert_eq!(deep[1].insight.id, i1.id);
}
