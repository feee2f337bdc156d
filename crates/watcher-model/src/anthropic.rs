use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{Completion, LlmClient, Usage};
use crate::error::{ModelError, Result};
use watcher_core::config::ModelConfig;

const API_VERSION: &str = "2023-06-01";

/// Talks to the real Anthropic Messages API. Model names are resolved per
/// profile from configuration rather than passed by the caller, so a layer
/// file only ever names a profile ("reflect", "deep") and never a concrete
/// model string.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    profiles: std::collections::HashMap<String, String>,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let anthropic = config
            .anthropic
            .as_ref()
            .ok_or_else(|| ModelError::UnknownProfile("no anthropic config section present".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ModelError::Http)?;
        Ok(Self {
            client,
            api_key: anthropic.api_key.clone(),
            base_url: anthropic.base_url.clone(),
            profiles: config.profiles.clone(),
        })
    }

    fn model_for(&self, profile: &str) -> Result<&str> {
        self.profiles
            .get(profile)
            .map(String::as_str)
            .ok_or_else(|| ModelError::UnknownProfile(profile.to_string()))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, profile: &str, system: &str, prompt: &str, max_tokens: u32) -> Result<Completion> {
        let model = self.model_for(profile)?;
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });
        send(&self.client, &self.base_url, &self.api_key, &body).await
    }

    async fn analyze_image(&self, profile: &str, image_bytes: &[u8], media_type: &str, prompt: &str) -> Result<Completion> {
        let model = self.model_for(profile)?;
        let encoded = STANDARD.encode(image_bytes);
        let body = serde_json::json!({
            "model": model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": media_type, "data": encoded}},
                    {"type": "text", "text": prompt},
                ],
            }],
            "stream": false,
        });
        send(&self.client, &self.base_url, &self.api_key, &body).await
    }
}

async fn send(client: &reqwest::Client, base_url: &str, api_key: &str, body: &serde_json::Value) -> Result<Completion> {
    let url = format!("{base_url}/v1/messages");
    debug!(%url, "sending request to Anthropic");

    let resp = client
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await?;

    let status = resp.status().as_u16();
    if status == 429 {
        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5000);
        return Err(ModelError::RateLimited { retry_after_ms });
    }

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "Anthropic API error");
        return Err(ModelError::Api { status, message: text });
    }

    let parsed: ApiResponse = resp.json().await.map_err(|e| ModelError::Parse(e.to_string()))?;
    let text = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("");

    Ok(Completion {
        text,
        usage: Usage { tokens_in: parsed.usage.input_tokens, tokens_out: parsed.usage.output_tokens },
    })
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: UsageResponse,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct UsageResponse {
    input_tokens: u64,
    output_tokens: u64,
}
