use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-sortable identifier: `ORDER BY id` matches `ORDER BY created_at`.
///
/// Backed by UUIDv7, which embeds a millisecond timestamp in its high bits,
/// giving log-correlatable ids without a separate sequence column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tsid(pub String);

impl Tsid {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Tsid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Tsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Tsid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Tsid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
