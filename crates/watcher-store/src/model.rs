use serde::{Deserialize, Serialize};

/// The seven ledger transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    Earn,
    Spend,
    Retain,
    Decay,
    Propagate,
    Spillover,
    Warm,
    Reset,
}

impl std::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxnKind::Earn => "earn",
            TxnKind::Spend => "spend",
            TxnKind::Retain => "retain",
            TxnKind::Decay => "decay",
            TxnKind::Propagate => "propagate",
            TxnKind::Spillover => "spillover",
            TxnKind::Warm => "warm",
            TxnKind::Reset => "reset",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TxnKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(Self::Earn),
            "spend" => Ok(Self::Spend),
            "retain" => Ok(Self::Retain),
            "decay" => Ok(Self::Decay),
            "propagate" => Ok(Self::Propagate),
            "spillover" => Ok(Self::Spillover),
            "warm" => Ok(Self::Warm),
            "reset" => Ok(Self::Reset),
            other => Err(format!("unknown ledger transaction kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub topic_key: String,
    pub kind: TxnKind,
    pub amount: f64,
    pub reason: String,
    pub source_topic_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub key: String,
    pub category: String,
    pub scope: String,
    pub provisional: bool,
    pub created_at: String,
    pub last_activity_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    Public,
    Dm,
}

impl std::fmt::Display for VisibilityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if *self == VisibilityScope::Public { "public" } else { "dm" })
    }
}

impl std::str::FromStr for VisibilityScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "dm" => Ok(Self::Dm),
            other => Err(format!("unknown visibility scope: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub server_id: Option<String>,
    pub author_id: Option<String>,
    pub content: String,
    pub created_at: String,
    pub visibility_scope: VisibilityScope,
    pub reply_target_id: Option<String>,
    pub thread_id: Option<String>,
    pub has_media: bool,
    pub has_link: bool,
    pub ingested_at: String,
    pub deleted_at: Option<String>,
}

/// Quantitative and valence metrics captured at insight-creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightMetrics {
    pub strength_adjustment: f64,
    pub confidence: f64,
    pub importance: f64,
    pub novelty: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Valence {
    pub joy: Option<f64>,
    pub concern: Option<f64>,
    pub curiosity: Option<f64>,
    pub warmth: Option<f64>,
    pub tension: Option<f64>,
}

impl Valence {
    pub fn has_any(&self) -> bool {
        self.joy.is_some()
            || self.concern.is_some()
            || self.curiosity.is_some()
            || self.warmth.is_some()
            || self.tension.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossLinks {
    pub context_channel: Option<String>,
    pub context_thread: Option<String>,
    pub context_subject: Option<String>,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub topic_key: String,
    pub category: String,
    pub content: String,
    pub sources_scope_max: VisibilityScope,
    pub created_at: String,
    pub run_id: String,
    pub salience_spent: f64,
    pub strength_adjustment: f64,
    pub strength: f64,
    pub confidence: f64,
    pub importance: f64,
    pub novelty: f64,
    pub valence: Valence,
    pub supersedes: Option<String>,
    pub quarantined: bool,
    pub cross_links: CrossLinks,
    pub conflicts_with: Vec<String>,
    pub conflict_resolved: bool,
    pub synthesis_sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Dry,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Dry => "dry",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "dry" => Ok(Self::Dry),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub topic: String,
    pub error: String,
    pub node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub layer_name: String,
    pub layer_content_hash: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub targets_matched: u32,
    pub targets_processed: u32,
    pub targets_skipped: u32,
    pub insights_created: u32,
    pub model_profile: Option<String>,
    pub model_provider: Option<String>,
    pub model_name: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_total: u64,
    pub estimated_cost: f64,
    pub errors: Vec<RunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub run_id: Option<String>,
    pub call_kind: String,
    pub profile: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt: String,
    pub response: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub estimated_cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Per-layer scheduler bookkeeping — the job-store table, keyed by layer
/// name rather than an arbitrary job id since layers and scheduled jobs
/// are 1:1 in this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerState {
    pub layer_name: String,
    pub last_fired_at: Option<String>,
    pub next_fire_at: Option<String>,
    pub updated_at: String,
}
