//! Provider-agnostic LLM capability: completion, embedding, transcription,
//! tokenisation, and context-window discovery, with bounded retry. Model
//! strings are always `provider/model`; no provider identity leaks past
//! this module into retrieval or assembly code.

pub mod openai;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CredentialStatus {
    Ok,
    Missing { env_var: String },
}

/// The narrow capability every provider implements.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> CoreResult<String>;

    async fn embed(&self, model: &str, text: &str) -> CoreResult<Vec<f32>>;

    async fn transcribe(&self, model: &str, audio: &[u8]) -> CoreResult<String>;

    /// Provider-aware token count; unknown models fall back to
    /// `ceil(len/4)`.
    fn count_tokens(&self, model: &str, text: &str) -> CoreResult<usize>;

    /// Best-effort context window; unknown models yield a conservative
    /// default.
    fn context_window(&self, model: &str) -> usize;

    fn validate_credentials(&self, model: &str) -> CredentialStatus;
}

/// Splits `provider/model` into its two halves; a model string without a
/// slash is a configuration error.
pub fn split_model(model: &str) -> CoreResult<(&str, &str)> {
    model
        .split_once('/')
        .ok_or_else(|| CoreError::Configuration(format!("model '{model}' must be named provider/model")))
}

/// Provider-aware token estimate used when no tokenizer table matches the
/// model: `ceil(len/4)`, the spec's mandated fallback.
pub fn fallback_token_estimate(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Conservative context-window defaults for unrecognised models, keyed by
/// provider.
pub fn default_context_window(provider: &str) -> usize {
    match provider {
        "openai" => 128_000,
        "anthropic" => 200_000,
        _ => 8_192,
    }
}

/// Retries `operation` up to 3 times with exponential backoff (1s, 2s, 4s
/// ...), capped so the total wall-clock spent sleeping never exceeds 60s.
/// `is_transient` decides whether a given error is worth retrying; a
/// non-transient error returns immediately.
pub async fn retry_with_backoff<T, F, Fut, IsTransient>(
    mut operation: F,
    is_transient: IsTransient,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, String>>,
    IsTransient: Fn(&str) -> bool,
{
    const MAX_ATTEMPTS: u32 = 3;
    const MAX_TOTAL_BACKOFF: Duration = Duration::from_secs(60);

    let mut total_slept = Duration::ZERO;
    let mut last_err = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(message) => {
                last_err = message.clone();
                if !is_transient(&message) {
                    return Err(CoreError::FatalProviderFailure(message));
                }
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                let remaining = MAX_TOTAL_BACKOFF.saturating_sub(total_slept);
                let sleep_for = backoff.min(remaining);
                if sleep_for.is_zero() {
                    break;
                }
                tokio::time::sleep(sleep_for).await;
                total_slept += sleep_for;
            }
        }
    }

    Err(CoreError::TransientProviderFailure {
        attempts: MAX_ATTEMPTS,
        message: last_err,
    })
}
