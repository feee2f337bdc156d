use async_trait::async_trait;

use crate::error::Result;

/// Token usage reported back by a completion call, used for run cost
/// accounting in `run_records`/`call_records`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// A single model response: the raw text plus the usage it cost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// The two model operations a layer node can invoke. A narrow provider
/// contract: callers pass a named profile (e.g. "reflect", "deep") rather
/// than a raw model string, and the client resolves it against configuration.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        profile: &str,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Completion>;

    /// Vision-capable completion; `media_type` is the image's MIME type
    /// (e.g. "image/png"). Default implementation rejects with
    /// `ModelError::Unavailable`-shaped error for clients without vision
    /// support.
    async fn analyze_image(
        &self,
        _profile: &str,
        _image_bytes: &[u8],
        _media_type: &str,
        _prompt: &str,
    ) -> Result<Completion> {
        Err(crate::error::ModelError::Parse("image analysis not supported by this client".to_string()))
    }
}
