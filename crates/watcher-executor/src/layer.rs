use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use tracing::warn;

use crate::error::{ExecutorError, Result};

/// One node in a layer's pipeline. Tagged variants per §4.E rather than a
/// duck-typed parameter map — unrecognized keys in the source TOML table
/// are logged and dropped when a layer is loaded, never silently carried
/// into execution.
#[derive(Debug, Clone)]
pub enum Node {
    FetchMessages {
        lookback_hours: u32,
        limit_per_channel: u32,
    },
    FetchInsights {
        retrieval_profile: String,
        max_per_topic: u32,
        since_days: Option<u32>,
        topic_pattern: Option<String>,
        categories: Option<Vec<String>>,
    },
    FetchLayerRuns {
        since_days: u32,
        include_errors: bool,
    },
    LlmCall {
        prompt_template: String,
        model: String,
        max_tokens: u32,
        temperature: Option<f64>,
    },
    StoreInsight {
        category: String,
    },
    UpdateSelfConcept {
        document_path: String,
        conditional: bool,
    },
    SynthesizeToGlobal,
    Reduce {
        strategy: String,
    },
    Output {
        format: String,
    },
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::FetchMessages { .. } => "fetch_messages",
            Node::FetchInsights { .. } => "fetch_insights",
            Node::FetchLayerRuns { .. } => "fetch_layer_runs",
            Node::LlmCall { .. } => "llm_call",
            Node::StoreInsight { .. } => "store_insight",
            Node::UpdateSelfConcept { .. } => "update_self_concept",
            Node::SynthesizeToGlobal => "synthesize_to_global",
            Node::Reduce { .. } => "reduce",
            Node::Output { .. } => "output",
        }
    }
}

/// A declarative reflection pipeline loaded from a TOML file, per §4.E.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub trigger_threshold: Option<u32>,
    pub target_category: Option<String>,
    pub target_filter: Option<String>,
    pub max_targets: u32,
    pub nodes: Vec<Node>,
    /// Hash of the file's raw contents, stable across reloads of an
    /// unchanged file — stamped onto every run record it produces.
    pub content_hash: String,
}

/// Load every `*.toml` file directly under `dir` as a layer, skipping (with
/// a logged warning) any file that fails to parse.
pub fn load_dir(dir: &Path) -> Result<Vec<Layer>> {
    let mut layers = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ExecutorError::LayerFile(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| ExecutorError::LayerFile(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match load_file(&path) {
            Ok(layer) => layers.push(layer),
            Err(e) => warn!(file = %path.display(), error = %e, "failed to load layer file"),
        }
    }
    layers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(layers)
}

pub fn load_file(path: &Path) -> Result<Layer> {
    let raw = std::fs::read_to_string(path).map_err(|e| ExecutorError::LayerFile(e.to_string()))?;
    parse(&raw)
}

pub fn parse(raw: &str) -> Result<Layer> {
    let value: toml::Value = raw.parse().map_err(|e| ExecutorError::LayerFile(e.to_string()))?;
    let table = value.as_table().ok_or_else(|| ExecutorError::LayerFile("layer file is not a TOML table".to_string()))?;

    let name = str_field(table, "name")?.to_string();
    let category = str_field(table, "category")?.to_string();
    let description = opt_str_field(table, "description");
    let schedule = opt_str_field(table, "schedule");
    let trigger_threshold = table.get("trigger_threshold").and_then(|v| v.as_integer()).map(|v| v as u32);
    let target_category = opt_str_field(table, "target_category");
    let target_filter = opt_str_field(table, "target_filter");
    let max_targets = table.get("max_targets").and_then(|v| v.as_integer()).unwrap_or(10) as u32;

    let node_tables = table
        .get("nodes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ExecutorError::LayerFile(format!("layer {name} has no [[nodes]] entries")))?;

    let mut nodes = Vec::with_capacity(node_tables.len());
    for entry in node_tables {
        let node_table = entry
            .as_table()
            .ok_or_else(|| ExecutorError::LayerFile(format!("layer {name} has a non-table node entry")))?;
        nodes.push(parse_node(&name, node_table)?);
    }

    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    let content_hash = format!("{:016x}", hasher.finish());

    Ok(Layer {
        name,
        category,
        description,
        schedule,
        trigger_threshold,
        target_category,
        target_filter,
        max_targets,
        nodes,
        content_hash,
    })
}

fn str_field<'a>(table: &'a toml::map::Map<String, toml::Value>, key: &str) -> Result<&'a str> {
    table
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::LayerFile(format!("missing required field `{key}`")))
}

fn opt_str_field(table: &toml::map::Map<String, toml::Value>, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn parse_node(layer_name: &str, node_table: &toml::map::Map<String, toml::Value>) -> Result<Node> {
    let node_type = str_field(node_table, "type")?;
    let known_keys: &[&str] = match node_type {
        "fetch_messages" => &["type", "lookback_hours", "limit_per_channel", "limit"],
        "fetch_insights" => &["type", "retrieval_profile", "max_per_topic", "since_days", "topic_pattern", "categories"],
        "fetch_layer_runs" => &["type", "since_days", "include_errors"],
        "llm_call" => &["type", "prompt_template", "model", "max_tokens", "temperature"],
        "store_insight" => &["type", "category"],
        "update_self_concept" => &["type", "document_path", "conditional"],
        "synthesize_to_global" => &["type"],
        "reduce" => &["type", "strategy"],
        "output" => &["type", "format"],
        other => return Err(ExecutorError::LayerFile(format!("layer {layer_name} has unknown node type `{other}`"))),
    };
    for key in node_table.keys() {
        if !known_keys.contains(&key.as_str()) {
            warn!(layer = layer_name, node = node_type, key = %key, "ignoring unrecognized node parameter");
        }
    }

    let node = match node_type {
        "fetch_messages" => Node::FetchMessages {
            lookback_hours: node_table.get("lookback_hours").and_then(|v| v.as_integer()).unwrap_or(24) as u32,
            limit_per_channel: node_table
                .get("limit_per_channel")
                .or_else(|| node_table.get("limit"))
                .and_then(|v| v.as_integer())
                .unwrap_or(50) as u32,
        },
        "fetch_insights" => Node::FetchInsights {
            retrieval_profile: node_table
                .get("retrieval_profile")
                .and_then(|v| v.as_str())
                .unwrap_or("balanced")
                .to_string(),
            max_per_topic: node_table.get("max_per_topic").and_then(|v| v.as_integer()).unwrap_or(10) as u32,
            since_days: node_table.get("since_days").and_then(|v| v.as_integer()).map(|v| v as u32),
            topic_pattern: node_table.get("topic_pattern").and_then(|v| v.as_str()).map(|s| s.to_string()),
            categories: node_table.get("categories").and_then(|v| v.as_array()).map(|arr| {
                arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect()
            }),
        },
        "fetch_layer_runs" => Node::FetchLayerRuns {
            since_days: node_table.get("since_days").and_then(|v| v.as_integer()).unwrap_or(7) as u32,
            include_errors: node_table.get("include_errors").and_then(|v| v.as_bool()).unwrap_or(false),
        },
        "llm_call" => Node::LlmCall {
            prompt_template: str_field(node_table, "prompt_template")?.to_string(),
            model: str_field(node_table, "model")?.to_string(),
            max_tokens: node_table.get("max_tokens").and_then(|v| v.as_integer()).unwrap_or(1024) as u32,
            temperature: node_table.get("temperature").and_then(|v| v.as_float()),
        },
        "store_insight" => Node::StoreInsight { category: str_field(node_table, "category")?.to_string() },
        "update_self_concept" => Node::UpdateSelfConcept {
            document_path: str_field(node_table, "document_path")?.to_string(),
            conditional: node_table.get("conditional").and_then(|v| v.as_bool()).unwrap_or(false),
        },
        "synthesize_to_global" => Node::SynthesizeToGlobal,
        "reduce" => Node::Reduce { strategy: node_table.get("strategy").and_then(|v| v.as_str()).unwrap_or("concat").to_string() },
        "output" => Node::Output { format: node_table.get("format").and_then(|v| v.as_str()).unwrap_or("text").to_string() },
        _ => unreachable!("validated above"),
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        name = "reflect_user"
        category = "social"
        schedule = "0 0 * * * *"
        max_targets = 5

        [[nodes]]
        type = "fetch_messages"
        lookback_hours = 48
        limit = 30

        [[nodes]]
        type = "llm_call"
        prompt_template = "reflect_user"
        model = "reflect"
        max_tokens = 800

        [[nodes]]
        type = "store_insight"
        category = "social"
    "#;

    #[test]
    fn parses_a_well_formed_layer() {
        let layer = parse(SAMPLE).expect("parse");
        assert_eq!(layer.name, "reflect_user");
        assert_eq!(layer.nodes.len(), 3);
        assert!(matches!(layer.nodes[0], Node::FetchMessages { lookback_hours: 48, limit_per_channel: 30 }));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let bad = SAMPLE.replace("fetch_messages", "fetch_nonsense");
        assert!(parse(&bad).is_err());
    }

    #[test]
    fn content_hash_is_stable_for_identical_input() {
        let a = parse(SAMPLE).expect("parse");
        let b = parse(SAMPLE).expect("parse");
        assert_eq!(a.content_hash, b.content_hash);
    }
}
