use async_trait::async_trait;

use crate::client::{Completion, LlmClient, Usage};
use crate::error::Result;

/// Deterministic client used by tests and by default configuration when no
/// `anthropic` section is present. Echoes a fixed-shape JSON response so
/// callers exercising the executor's response-parsing path get something
/// parseable without a network dependency.
pub struct StubClient;

#[async_trait]
impl LlmClient for StubClient {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _profile: &str, _system: &str, prompt: &str, _max_tokens: u32) -> Result<Completion> {
        let text = format!(
            "{{\"content\": \"stub reflection on: {}\", \"strength_adjustment\": 1.0, \
             \"confidence\": 0.5, \"importance\": 0.5, \"novelty\": 0.5, \"valence\": {{\"curiosity\": 0.5}}}}",
            truncate(prompt, 80)
        );
        Ok(Completion { text, usage: Usage { tokens_in: prompt.len() as u64 / 4, tokens_out: 40 } })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_complete_returns_parseable_json() {
        let client = StubClient;
        let completion = client.complete("reflect", "sys", "hello", 100).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&completion.text).unwrap();
        assert!(parsed.get("content").is_some());
    }
}
