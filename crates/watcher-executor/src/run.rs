use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use watcher_core::config::{LedgerConfig, SchedulerConfig};
use watcher_insights::{Profile, RetrievalRequest, RetrievedInsight};
use watcher_ledger::Ledger;
use watcher_model::{estimate_cost, LlmClient};
use watcher_store::model::{CrossLinks, RunError, RunRecord, RunStatus, VisibilityScope};
use watcher_store::{NewCall, Store};
use watcher_topics::{Category, TopicKey, TopicRegistry};

use crate::error::{ExecutorError, Result};
use crate::layer::{Layer, Node};
use crate::messages::fetch_messages_for_topic;
use crate::parse::parse_llm_response;
use crate::prompt::PromptEngine;
use crate::ExecutionContext;

/// Runs one layer activation against a set of already-selected target
/// topics, per §4.E.1. Stateless beyond its collaborators — safe to build
/// fresh per activation, the way [`watcher_ledger::Ledger`] is.
pub struct Executor<'a> {
    topics: &'a TopicRegistry,
    ledger_config: &'a LedgerConfig,
    scheduler_config: &'a SchedulerConfig,
    llm: &'a dyn LlmClient,
    prompts: &'a PromptEngine,
    model_profiles: &'a HashMap<String, String>,
}

impl<'a> Executor<'a> {
    pub fn new(
        topics: &'a TopicRegistry,
        ledger_config: &'a LedgerConfig,
        scheduler_config: &'a SchedulerConfig,
        llm: &'a dyn LlmClient,
        prompts: &'a PromptEngine,
        model_profiles: &'a HashMap<String, String>,
    ) -> Self {
        Self { topics, ledger_config, scheduler_config, llm, prompts, model_profiles }
    }

    fn store(&self) -> &Store {
        self.topics.store().as_ref()
    }

    /// Execute `layer` against `targets`, producing a finished run record.
    /// An empty target list is recorded `dry` per the scheduler's
    /// dry-run-on-empty-selection rule without touching any node.
    pub async fn execute_layer(&self, layer: &Layer, targets: &[TopicKey]) -> Result<RunRecord> {
        let run = self.store().start_run(&layer.name, &layer.content_hash, targets.len() as u32)?;

        if targets.is_empty() {
            self.store().finish_run(
                &run.id, RunStatus::Dry, 0, 0, 0, None, None, None, 0, 0, 0.0, &[],
            )?;
            return Ok(self.store().get_run(&run.id)?.expect("just finished"));
        }

        let mut targets_processed = 0u32;
        let mut targets_skipped = 0u32;
        let mut insights_created = 0u32;
        let mut tokens_in_total = 0u64;
        let mut tokens_out_total = 0u64;
        let mut errors: Vec<RunError> = Vec::new();
        let mut model_profile: Option<String> = None;
        let mut model_name: Option<String> = None;

        for topic in targets {
            let max_attempts = self.scheduler_config.max_retries_per_target.max(1);
            let mut last_failure: Option<(String, String)> = None;
            let mut succeeded = false;

            // One context per target, shared across attempts: nodes that
            // already committed side effects (store_insight, synthesize_to_global)
            // must not be replayed on retry, only the node that failed. §4.E.1:
            // a retried target spends salience at most once per completed node.
            let mut ctx = ExecutionContext::new(topic.clone(), layer.name.clone(), run.id.clone());
            let mut target_insights = 0u32;
            let mut node_start = 0usize;

            'attempts: for _attempt in 0..max_attempts {
                for node in &layer.nodes[node_start..] {
                    match self.run_node(node, &mut ctx, layer, &mut target_insights, &mut model_profile, &mut model_name).await {
                        Ok(()) => node_start += 1,
                        Err(e) => {
                            last_failure = Some((node.type_name().to_string(), e.to_string()));
                            continue 'attempts;
                        }
                    }
                }
                succeeded = true;
                break;
            }

            tokens_in_total += ctx.tokens_input;
            tokens_out_total += ctx.tokens_output;
            insights_created += target_insights;

            if succeeded {
                targets_processed += 1;
            } else {
                targets_skipped += 1;
                let (node, error) = last_failure.unwrap_or_else(|| ("unknown".to_string(), "exhausted retries".to_string()));
                errors.push(RunError { topic: topic.render(), error, node });
            }
        }

        let cost_total = estimate_cost(tokens_in_total, tokens_out_total);

        let status = if targets_skipped == targets.len() as u32 {
            RunStatus::Failed
        } else if targets_skipped > 0 {
            RunStatus::Partial
        } else if insights_created == 0 && errors.is_empty() {
            RunStatus::Dry
        } else {
            RunStatus::Success
        };

        info!(
            event = "layer_run_finished",
            layer = %layer.name,
            run_id = %run.id,
            %status,
            targets_processed,
            targets_skipped,
            insights_created,
            "layer activation finished"
        );

        self.store().finish_run(
            &run.id,
            status,
            targets_processed,
            targets_skipped,
            insights_created,
            model_profile.as_deref(),
            Some(self.llm.name()),
            model_name.as_deref(),
            tokens_in_total,
            tokens_out_total,
            cost_total,
            &errors,
        )?;

        Ok(self.store().get_run(&run.id)?.expect("just finished"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_node(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        layer: &Layer,
        attempt_insights: &mut u32,
        model_profile_out: &mut Option<String>,
        model_name: &mut Option<String>,
    ) -> Result<()> {
        match node {
            Node::FetchMessages { lookback_hours, limit_per_channel } => {
                ctx.messages = fetch_messages_for_topic(self.store(), &ctx.topic, *lookback_hours, *limit_per_channel)?;
                Ok(())
            }
            Node::FetchInsights { retrieval_profile, max_per_topic, since_days, topic_pattern, categories } => {
                self.fetch_insights(ctx, retrieval_profile, *max_per_topic, *since_days, topic_pattern.as_deref(), categories.as_deref())
            }
            Node::FetchLayerRuns { since_days, include_errors } => {
                let cutoff = Utc::now() - chrono::Duration::days(*since_days as i64);
                let runs = self.store().list_runs(Some(&layer.name), 100)?;
                ctx.layer_runs = runs
                    .into_iter()
                    .filter(|r| {
                        chrono::DateTime::parse_from_rfc3339(&r.started_at)
                            .map(|dt| dt.with_timezone(&Utc) >= cutoff)
                            .unwrap_or(false)
                    })
                    .filter(|r| *include_errors || r.errors.is_empty())
                    .collect();
                Ok(())
            }
            Node::LlmCall { prompt_template, model, max_tokens, temperature: _ } => {
                self.llm_call(ctx, prompt_template, model, *max_tokens, model_profile_out, model_name).await
            }
            Node::StoreInsight { category } => {
                self.store_insight(ctx, category)?;
                *attempt_insights += 1;
                Ok(())
            }
            Node::UpdateSelfConcept { document_path, conditional } => {
                self.update_self_concept(ctx, document_path, *conditional)
            }
            Node::SynthesizeToGlobal => self.synthesize_to_global(ctx, layer, attempt_insights),
            Node::Reduce { strategy } => {
                if strategy == "concat" {
                    let joined = ctx.insights.iter().map(|i| i.insight.content.clone()).collect::<Vec<_>>().join("\n");
                    ctx.llm_response = Some(joined);
                }
                Ok(())
            }
            Node::Output { format } => {
                info!(event = "layer_output", topic = %ctx.topic.render(), %format, "layer node output");
                Ok(())
            }
        }
    }

    fn fetch_insights(
        &self,
        ctx: &mut ExecutionContext,
        retrieval_profile: &str,
        max_per_topic: u32,
        since_days: Option<u32>,
        topic_pattern: Option<&str>,
        categories: Option<&[String]>,
    ) -> Result<()> {
        let profile: Profile = retrieval_profile
            .parse()
            .map_err(|e: String| ExecutorError::Node { node: "fetch_insights".to_string(), message: e })?;

        let mut topic_keys = vec![ctx.topic.render()];
        if let Some(pattern) = topic_pattern {
            // A "pattern" is a second, explicit topic key fetched alongside
            // the target's own — not a glob. Layers that want broader
            // context (e.g. always pulling in `self:core`) name it directly.
            topic_keys.push(pattern.to_string());
        }

        let now = Utc::now();
        let mut hits: Vec<RetrievedInsight> = Vec::new();
        for key in &topic_keys {
            let request = RetrievalRequest { topic_key: key, profile, limit: max_per_topic, include_quarantined: false };
            hits.extend(watcher_insights::retrieve(self.store(), &request, now)?);
        }

        if let Some(days) = since_days {
            let cutoff = now - chrono::Duration::days(days as i64);
            hits.retain(|h| {
                chrono::DateTime::parse_from_rfc3339(&h.insight.created_at)
                    .map(|dt| dt.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(false)
            });
        }
        if let Some(cats) = categories {
            hits.retain(|h| cats.iter().any(|c| c == &h.insight.category));
        }

        ctx.insights = hits;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn llm_call(
        &self,
        ctx: &mut ExecutionContext,
        prompt_template: &str,
        model_profile: &str,
        max_tokens: u32,
        model_profile_out: &mut Option<String>,
        model_name: &mut Option<String>,
    ) -> Result<()> {
        let rendered = self.prompts.render(prompt_template, &render_context(ctx))?;
        if model_name.is_none() {
            *model_profile_out = Some(model_profile.to_string());
            *model_name = self.model_profiles.get(model_profile).cloned();
        }

        let started = Instant::now();
        let mut outcome = self.llm.complete(model_profile, &rendered.system, &rendered.user, max_tokens).await;

        if let Err(watcher_model::ModelError::RateLimited { retry_after_ms }) = &outcome {
            let delay = *retry_after_ms;
            warn!(event = "llm_call_rate_limited", retry_after_ms = delay, "retrying llm_call once after suggested delay");
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            outcome = self.llm.complete(model_profile, &rendered.system, &rendered.user, max_tokens).await;
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let call_profile = Some(model_profile);
        let call_model = model_name.as_deref();

        match outcome {
            Ok(completion) => {
                ctx.tokens_input += completion.usage.tokens_in;
                ctx.tokens_output += completion.usage.tokens_out;
                let cost = estimate_cost(completion.usage.tokens_in, completion.usage.tokens_out);
                self.store().insert_call(NewCall {
                    run_id: Some(&ctx.run_id),
                    call_kind: "llm_call",
                    profile: call_profile,
                    provider: Some(self.llm.name()),
                    model: call_model,
                    prompt: &rendered.user,
                    response: Some(&completion.text),
                    tokens_in: completion.usage.tokens_in,
                    tokens_out: completion.usage.tokens_out,
                    estimated_cost: cost,
                    latency_ms,
                    success: true,
                    error_message: None,
                })?;
                ctx.last_decision = serde_json::from_str(&completion.text).ok();
                ctx.llm_response = Some(completion.text);
                Ok(())
            }
            Err(e) => {
                self.store().insert_call(NewCall {
                    run_id: Some(&ctx.run_id),
                    call_kind: "llm_call",
                    profile: call_profile,
                    provider: Some(self.llm.name()),
                    model: call_model,
                    prompt: &rendered.user,
                    response: None,
                    tokens_in: 0,
                    tokens_out: 0,
                    estimated_cost: 0.0,
                    latency_ms,
                    success: false,
                    error_message: Some(&e.to_string()),
                })?;
                Err(ExecutorError::Node { node: "llm_call".to_string(), message: e.to_string() })
            }
        }
    }

    fn store_insight(&self, ctx: &mut ExecutionContext, category: &str) -> Result<()> {
        let response = ctx
            .llm_response
            .as_deref()
            .ok_or_else(|| ExecutorError::Node { node: "store_insight".to_string(), message: "no llm response to store".to_string() })?;
        let parsed = parse_llm_response(response);
        if parsed.fell_back {
            warn!(event = "llm_response_fallback", topic = %ctx.topic.render(), "falling back to raw-text insight");
        }

        let scope_max = if ctx.messages.iter().any(|m| m.visibility_scope == VisibilityScope::Dm) {
            VisibilityScope::Dm
        } else {
            VisibilityScope::Public
        };
        let cross_links = cross_links_for(&ctx.topic, &ctx.messages);

        let outcome = watcher_insights::store_insight(
            self.store(),
            &ctx.run_id,
            &ctx.topic.render(),
            category,
            &parsed.content,
            parsed.metrics,
            parsed.valence,
            scope_max,
            cross_links,
            self.ledger_config.reflection_cost_per_insight,
            self.ledger_config.retention_rate,
            &format!("reflection:{}", ctx.run_id),
            parsed.supersedes,
            parsed.conflicts_with,
            Vec::new(),
        )?;

        let (spent, inserted) = match outcome {
            watcher_insights::StoreInsightOutcome::Stored { spent, insight } => (spent, insight),
            watcher_insights::StoreInsightOutcome::InsufficientSalience => {
                return Err(ExecutorError::Node {
                    node: "store_insight".to_string(),
                    message: "insufficient salience balance to fund this insight".to_string(),
                })
            }
        };

        info!(event = "insight_stored", topic = %ctx.topic.render(), insight_id = %inserted.id, salience_spent = spent, "insight stored");

        ctx.insights.push(RetrievedInsight {
            strength_bucket: watcher_insights::StrengthBucket::of(inserted.strength),
            age: "just now".to_string(),
            insight: inserted,
        });
        Ok(())
    }

    fn update_self_concept(&self, ctx: &mut ExecutionContext, document_path: &str, conditional: bool) -> Result<()> {
        if conditional {
            let should_update = ctx
                .last_decision
                .as_ref()
                .and_then(|v| v.get("update_self_concept").or_else(|| v.get("should_update")))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !should_update {
                return Ok(());
            }
        }
        let content = ctx
            .llm_response
            .as_deref()
            .ok_or_else(|| ExecutorError::Node { node: "update_self_concept".to_string(), message: "no llm response to persist".to_string() })?;
        std::fs::write(document_path, content)
            .map_err(|e| ExecutorError::Node { node: "update_self_concept".to_string(), message: e.to_string() })?;
        info!(event = "self_concept_updated", path = %document_path, "self-concept document updated");
        Ok(())
    }

    fn synthesize_to_global(&self, ctx: &mut ExecutionContext, layer: &Layer, attempt_insights: &mut u32) -> Result<()> {
        let global = match ctx.topic.category {
            Category::User => TopicKey::user(ctx.topic.parts[0].clone()),
            Category::Dyad => TopicKey::dyad(ctx.topic.parts[0].clone(), ctx.topic.parts[1].clone()),
            _ => {
                return Err(ExecutorError::Node {
                    node: "synthesize_to_global".to_string(),
                    message: format!("topic category {:?} has no global synthesis target", ctx.topic.category),
                })
            }
        };
        self.topics.ensure(&global)?;

        let content = ctx
            .llm_response
            .as_deref()
            .ok_or_else(|| ExecutorError::Node { node: "synthesize_to_global".to_string(), message: "no llm response to synthesize".to_string() })?;

        let (metrics, valence) = watcher_insights::fallback_metrics();
        let outcome = watcher_insights::store_insight(
            self.store(),
            &ctx.run_id,
            &global.render(),
            &layer.category,
            content,
            metrics,
            valence,
            VisibilityScope::Public,
            CrossLinks::default(),
            self.ledger_config.reflection_cost_per_insight / 2.0,
            self.ledger_config.retention_rate,
            &format!("reflection:{}", ctx.run_id),
            None,
            Vec::new(),
            vec![ctx.topic.render()],
        )?;

        let inserted = match outcome {
            watcher_insights::StoreInsightOutcome::Stored { insight, .. } => insight,
            watcher_insights::StoreInsightOutcome::InsufficientSalience => {
                return Err(ExecutorError::Node {
                    node: "synthesize_to_global".to_string(),
                    message: "insufficient global salience balance to fund synthesis".to_string(),
                })
            }
        };

        info!(event = "insight_synthesized", global = %global.render(), insight_id = %inserted.id, "synthesized insight to global topic");
        *attempt_insights += 1;
        Ok(())
    }
}

fn cross_links_for(topic: &TopicKey, messages: &[watcher_store::model::Message]) -> CrossLinks {
    let mut participants: Vec<String> = messages.iter().filter_map(|m| m.author_id.clone()).collect();
    participants.sort();
    participants.dedup();

    CrossLinks {
        context_channel: matches!(topic.category, Category::Channel).then(|| topic.parts[0].clone()),
        context_thread: matches!(topic.category, Category::Thread).then(|| topic.parts[0].clone()),
        context_subject: matches!(topic.category, Category::Subject).then(|| topic.parts[0].clone()),
        participants,
    }
}

fn render_context(ctx: &ExecutionContext) -> serde_json::Value {
    serde_json::json!({
        "topic": ctx.topic.render(),
        "layer_name": ctx.layer_name,
        "messages": ctx.messages.iter().map(|m| serde_json::json!({
            "author_id": m.author_id,
            "content": m.content,
            "created_at": m.created_at,
        })).collect::<Vec<_>>(),
        "insights": ctx.insights.iter().map(|r| serde_json::json!({
            "content": r.insight.content,
            "strength": r.insight.strength,
            "age": r.age,
            "bucket": r.strength_bucket.as_str(),
        })).collect::<Vec<_>>(),
        "layer_runs": ctx.layer_runs.iter().map(|r| serde_json::json!({
            "id": r.id,
            "status": r.status.to_string(),
            "insights_created": r.insights_created,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use watcher_model::StubClient;

    fn harness() -> (Arc<Store>, TopicRegistry, LedgerConfig, SchedulerConfig, PromptEngine) {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let topics = TopicRegistry::new(store.clone());
        let ledger_config = LedgerConfig::default();
        let scheduler_config = SchedulerConfig::default();
        let dir = std::env::temp_dir().join(format!("watcher_run_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("reflect.j2"), "Reflect on: {{ messages }}").unwrap();
        let prompts = PromptEngine::new(dir.to_str().unwrap()).expect("prompts");
        (store, topics, ledger_config, scheduler_config, prompts)
    }

    #[tokio::test]
    async fn empty_target_list_produces_a_dry_run() {
        let (_store, topics, ledger_config, scheduler_config, prompts) = harness();
        let llm = StubClient;
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);
        let layer = crate::layer::parse(
            r#"
            name = "reflect_user"
            category = "social"
            max_targets = 5
            [[nodes]]
            type = "fetch_messages"
            "#,
        )
        .expect("parse");

        let run = executor.execute_layer(&layer, &[]).await.expect("execute");
        assert_eq!(run.status, RunStatus::Dry);
        assert_eq!(run.targets_matched, 0);
    }

    #[tokio::test]
    async fn successful_reflection_creates_an_insight_and_spends_salience() {
        let (store, topics, ledger_config, scheduler_config, prompts) = harness();
        let key = TopicKey::user("u-1");
        {
            let ledger = Ledger::new(&store, &topics, &ledger_config);
            ledger.earn(&key, 5.0, "message", None).expect("earn");
        }

        let llm = StubClient;
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);
        let layer = crate::layer::parse(
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
        .expect("parse");

        let run = executor.execute_layer(&layer, &[key.clone()]).await.expect("execute");
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.targets_processed, 1);
        assert_eq!(run.insights_created, 1);

        let remaining = store.topic_balance(&key.render()).expect("balance");
        assert!(remaining < 5.0);
    }

    #[tokio::test]
    async fn retrying_a_target_does_not_replay_a_succeeded_store_insight_node() {
        let (store, topics, ledger_config, mut scheduler_config, prompts) = harness();
        scheduler_config.max_retries_per_target = 3;

        // The target topic is funded, so store_insight can succeed. The
        // global user topic synthesize_to_global writes to is never earned,
        // so it fails on every attempt — this exercises a retry where an
        // earlier node in the layer has already committed.
        let key = TopicKey::server_user("srv-1", "u-1");
        {
            let ledger = Ledger::new(&store, &topics, &ledger_config);
            ledger.earn(&key, 5.0, "message", None).expect("earn");
        }

        let llm = StubClient;
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);
        let layer = crate::layer::parse(
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

            [[nodes]]
            type = "synthesize_to_global"
            "#,
        )
        .expect("parse");

        let run = executor.execute_layer(&layer, &[key.clone()]).await.expect("execute");

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.targets_skipped, 1);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].node, "synthesize_to_global");

        // store_insight completed once; a replayed retry would double- or
        // triple-spend and leave duplicate insight rows.
        assert_eq!(run.insights_created, 1);
        let remaining = store.topic_balance(&key.render()).expect("balance");
        assert_eq!(remaining, 5.0 - ledger_config.reflection_cost_per_insight + ledger_config.reflection_cost_per_insight * ledger_config.retention_rate);

        let stored = store.list_insights_by_topic_recency(&key.render(), 10, true).expect("list");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn missing_node_dependency_is_recorded_as_a_run_error() {
        let (_store, topics, ledger_config, scheduler_config, prompts) = harness();
        let llm = StubClient;
        let profiles = HashMap::new();
        let executor = Executor::new(&topics, &ledger_config, &scheduler_config, &llm, &prompts, &profiles);
        let layer = crate::layer::parse(
            r#"
            name = "reflect_user"
            category = "social"
            max_targets = 5
            [[nodes]]
            type = "store_insight"
            category = "social"
            "#,
        )
        .expect("parse");

        let key = TopicKey::user("u-missing");
        let run = executor.execute_layer(&layer, &[key.clone()]).await.expect("execute");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].node, "store_insight");
    }
}
