use watcher_insights::RetrievedInsight;
use watcher_store::model::{Message, RunRecord};
use watcher_topics::TopicKey;

/// Per-target execution state, rebuilt fresh for every topic in a layer
/// activation (§4.E.1). Nodes mutate it in place as they run in order.
pub struct ExecutionContext {
    pub topic: TopicKey,
    pub layer_name: String,
    pub run_id: String,
    pub messages: Vec<Message>,
    pub insights: Vec<RetrievedInsight>,
    pub layer_runs: Vec<RunRecord>,
    pub llm_response: Option<String>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    /// Set by `llm_call` when the model response came back and was parsed
    /// cleanly; consulted by `update_self_concept`'s optional gate.
    pub last_decision: Option<serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(topic: TopicKey, layer_name: String, run_id: String) -> Self {
        Self {
            topic,
            layer_name,
            run_id,
            messages: Vec::new(),
            insights: Vec::new(),
            layer_runs: Vec::new(),
            llm_response: None,
            tokens_input: 0,
            tokens_output: 0,
            last_decision: None,
        }
    }
}
