use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_HTTP_PORT: u16 = 8089;
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1";

/// Top-level config (`watcher.toml` + `WATCHER_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub layers: LayersConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            ledger: LedgerConfig::default(),
            scheduler: SchedulerConfig::default(),
            model: ModelConfig::default(),
            layers: LayersConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Load config from a TOML file with `WATCHER_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.watcher/watcher.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: WatcherConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WATCHER_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.watcher/watcher.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.watcher/watcher.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            bind: DEFAULT_HTTP_BIND.to_string(),
        }
    }
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_http_bind() -> String {
    DEFAULT_HTTP_BIND.to_string()
}

/// Per-category caps and the five numeric policies of the salience ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Cap per topic category. Categories not listed fall back to `default_cap`.
    #[serde(default = "default_caps")]
    pub caps: HashMap<String, f64>,
    #[serde(default = "default_cap_value")]
    pub default_cap: f64,

    #[serde(default = "default_warm_threshold")]
    pub warm_threshold: f64,
    #[serde(default = "default_propagation_factor")]
    pub propagation_factor: f64,
    #[serde(default = "default_global_propagation_factor")]
    pub global_propagation_factor: f64,
    #[serde(default = "default_spillover_factor")]
    pub spillover_factor: f64,
    #[serde(default = "default_retention_rate")]
    pub retention_rate: f64,
    #[serde(default = "default_initial_global_warmth")]
    pub initial_global_warmth: f64,

    #[serde(default = "default_decay_threshold_days")]
    pub decay_threshold_days: i64,
    #[serde(default = "default_decay_rate_per_day")]
    pub decay_rate_per_day: f64,
    #[serde(default = "default_decay_min_step")]
    pub decay_min_step: f64,

    /// Per-budget-group allocation of the total reflection budget. Must sum
    /// to 1.0 across every group except `self`, which has an independent pool.
    #[serde(default = "default_group_allocations")]
    pub group_allocations: HashMap<String, f64>,
    #[serde(default = "default_self_pool")]
    pub self_pool: f64,

    #[serde(default = "default_earn_weights")]
    pub earn_weights: EarnWeights,

    /// Flat salience cost charged to a topic's balance by a successful
    /// `store_insight` node — the "estimated reflection cost" selection
    /// (§4.C) budgets against. `synthesize_to_global` charges half this to
    /// the global topic it writes to.
    #[serde(default = "default_reflection_cost")]
    pub reflection_cost_per_insight: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            caps: default_caps(),
            default_cap: default_cap_value(),
            warm_threshold: default_warm_threshold(),
            propagation_factor: default_propagation_factor(),
            global_propagation_factor: default_global_propagation_factor(),
            spillover_factor: default_spillover_factor(),
            retention_rate: default_retention_rate(),
            initial_global_warmth: default_initial_global_warmth(),
            decay_threshold_days: default_decay_threshold_days(),
            decay_rate_per_day: default_decay_rate_per_day(),
            decay_min_step: default_decay_min_step(),
            group_allocations: default_group_allocations(),
            self_pool: default_self_pool(),
            earn_weights: default_earn_weights(),
            reflection_cost_per_insight: default_reflection_cost(),
        }
    }
}

/// Weights applied by the deterministic event -> earn mapping (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarnWeights {
    pub message: f64,
    pub reply: f64,
    pub mention: f64,
    pub dm_message: f64,
    pub media_boost_factor: f64,
    pub reaction: f64,
    pub thread_create: f64,
}

fn default_earn_weights() -> EarnWeights {
    EarnWeights {
        message: 1.0,
        reply: 0.5,
        mention: 0.3,
        dm_message: 1.5,
        media_boost_factor: 1.5,
        reaction: 0.2,
        thread_create: 0.75,
    }
}

fn default_caps() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("user".to_string(), 20.0);
    m.insert("dyad".to_string(), 15.0);
    m.insert("channel".to_string(), 25.0);
    m.insert("thread".to_string(), 10.0);
    m.insert("role".to_string(), 10.0);
    m.insert("user_in_channel".to_string(), 10.0);
    m.insert("dyad_in_channel".to_string(), 10.0);
    m.insert("subject".to_string(), 15.0);
    m.insert("emoji".to_string(), 8.0);
    m.insert("self".to_string(), 30.0);
    m
}
fn default_cap_value() -> f64 {
    10.0
}
fn default_warm_threshold() -> f64 {
    1.0
}
fn default_propagation_factor() -> f64 {
    0.3
}
fn default_global_propagation_factor() -> f64 {
    0.15
}
fn default_spillover_factor() -> f64 {
    0.5
}
fn default_retention_rate() -> f64 {
    0.3
}
fn default_initial_global_warmth() -> f64 {
    1.5
}
fn default_decay_threshold_days() -> i64 {
    7
}
fn default_decay_rate_per_day() -> f64 {
    0.01
}
fn default_decay_min_step() -> f64 {
    0.01
}
fn default_group_allocations() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("social".to_string(), 0.40);
    m.insert("global".to_string(), 0.15);
    m.insert("spaces".to_string(), 0.20);
    m.insert("semantic".to_string(), 0.15);
    m.insert("culture".to_string(), 0.10);
    m
}
fn default_self_pool() -> f64 {
    5.0
}
fn default_reflection_cost() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Misfire grace window in seconds before a missed cron fire is dropped.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: i64,
    /// Directory containing layer definition TOML files.
    #[serde(default = "default_layers_dir")]
    pub layers_dir: String,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_target: u32,
    /// How often the persistent `observe` process ticks the reflection
    /// scheduler (checks every layer's cron/threshold due-ness).
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// How often the persistent `observe` process runs the salience decay
    /// job. Decay itself catches up on however many days were missed, so
    /// this only needs to be frequent enough that no topic goes too long
    /// without its activity being reflected in its balance.
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace_secs: default_misfire_grace_secs(),
            layers_dir: default_layers_dir(),
            max_retries_per_target: default_max_retries(),
            tick_interval_secs: default_tick_interval_secs(),
            decay_interval_secs: default_decay_interval_secs(),
        }
    }
}

fn default_misfire_grace_secs() -> i64 {
    3600
}
fn default_layers_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.watcher/layers")
}
fn default_max_retries() -> u32 {
    3
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_decay_interval_secs() -> u64 {
    6 * 3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayersConfig {
    /// Self-concept document path, read fresh on every render that needs it.
    pub self_concept_path: Option<String>,
    /// Directory of `*.j2` prompt templates, one per `prompt_template` name
    /// a layer's `llm_call` node can reference.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self { self_concept_path: None, templates_dir: default_templates_dir() }
    }
}

fn default_templates_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.watcher/templates")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Named model profiles: profile name -> concrete model identifier.
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, String>,
    pub anthropic: Option<AnthropicConfig>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
            anthropic: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_profiles() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("reflect".to_string(), "claude-3-5-sonnet-20241022".to_string());
    m.insert("deep".to_string(), "claude-3-opus-20240229".to_string());
    m
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
