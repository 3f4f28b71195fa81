use async_trait::async_trait;

use super::Screenshot;

/// Reasoning/vision capability — sends a prompt (optionally with a screen
/// image) to a multimodal model, gets back free-form text.
///
/// Callers are responsible for locating structured content inside the reply;
/// the provider makes no formatting guarantees. Implementations should carry
/// their own request timeout so a hung call cannot stall the executor loop
/// indefinitely.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, prompt: &str, image: Option<&Screenshot>) -> anyhow::Result<String>;
}
