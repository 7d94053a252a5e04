//! The OpenAI provider. Credentials come from `OPENAI_API_KEY` only; the
//! gateway never persists them and never logs request headers.

use async_trait::async_trait;
use serde_json::json;
use tiktoken_rs::{get_bpe_from_model, CoreBPE};

use crate::error::{CoreError, CoreResult};

use super::{
    default_context_window, fallback_token_estimate, retry_with_backoff, ChatMessage,
    CompletionOptions, CredentialStatus, LlmGateway,
};

const CREDENTIAL_ENV_VAR: &str = "OPENAI_API_KEY";

pub struct OpenAiGateway {
    client: reqwest::Client,
}

impl Default for OpenAiGateway {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl OpenAiGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn api_key(&self) -> CoreResult<String> {
        std::env::var(CREDENTIAL_ENV_VAR).map_err(|_| CoreError::Credential {
            env_var: CREDENTIAL_ENV_VAR.to_string(),
        })
    }

    fn is_transient_status(status: reqwest::StatusCode) -> bool {
        status.as_u16() == 429 || status.is_server_error()
    }

    fn bpe(model: &str) -> Option<CoreBPE> {
        get_bpe_from_model(model).ok()
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> CoreResult<String> {
        let (_, bare_model) = super::split_model(model)?;
        let api_key = self.api_key()?;

        let body = json!({
            "model": bare_model,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let client = &self.client;
        let result = retry_with_backoff(
            || {
                let client = client.clone();
                let body = body.clone();
                let api_key = api_key.clone();
                async move {
                    let response = client
                        .post("https://api.openai.com/v1/chat/completions")
                        .bearer_auth(&api_key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| e.to_string())?;

                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        if OpenAiGateway::is_transient_status(status) {
                            return Err(format!("transient: {status}: {text}"));
                        }
                        return Err(format!("fatal: {status}: {text}"));
                    }

                    let value: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
                    value["choices"][0]["message"]["content"]
                        .as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| "malformed completion response".to_string())
                }
            },
            |message| message.starts_with("transient"),
        )
        .await?;

        Ok(result)
    }

    async fn embed(&self, model: &str, text: &str) -> CoreResult<Vec<f32>> {
        let (_, bare_model) = super::split_model(model)?;
        let api_key = self.api_key()?;

        let body = json!({ "model": bare_model, "input": text });
        let client = &self.client;

        retry_with_backoff(
            || {
                let client = client.clone();
                let body = body.clone();
                let api_key = api_key.clone();
                async move {
                    let response = client
                        .post("https://api.openai.com/v1/embeddings")
                        .bearer_auth(&api_key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| e.to_string())?;

                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        if OpenAiGateway::is_transient_status(status) {
                            return Err(format!("transient: {status}: {text}"));
                        }
                        return Err(format!("fatal: {status}: {text}"));
                    }

                    let value: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
                    let embedding = value["data"][0]["embedding"]
                        .as_array()
                        .ok_or_else(|| "malformed embedding response".to_string())?;
                    Ok(embedding
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .map(|v| v as f32)
                        .collect::<Vec<f32>>())
                }
            },
            |message| message.starts_with("transient"),
        )
        .await
    }

    async fn transcribe(&self, model: &str, audio: &[u8]) -> CoreResult<String> {
        let (_, bare_model) = super::split_model(model)?;
        let api_key = self.api_key()?;

        let form = reqwest::multipart::Form::new()
            .text("model", bare_model.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name("audio.wav"),
            );

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::TransientProviderFailure {
                attempts: 1,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::FatalProviderFailure(format!("{status}: {text}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::FatalProviderFailure(e.to_string()))?;
        value["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::FatalProviderFailure("malformed transcription response".to_string()))
    }

    fn count_tokens(&self, model: &str, text: &str) -> CoreResult<usize> {
        let (_, bare_model) = super::split_model(model)?;
        match Self::bpe(bare_model) {
            Some(bpe) => Ok(bpe.encode_with_special_tokens(text).len()),
            None => Ok(fallback_token_estimate(text)),
        }
    }

    fn context_window(&self, model: &str) -> usize {
        let bare_model = model.split_once('/').map(|(_, m)| m).unwrap_or(model);
        match bare_model {
            m if m.starts_with("gpt-4o") => 128_000,
            m if m.starts_with("gpt-4-turbo") => 128_000,
            m if m.starts_with("gpt-3.5") => 16_385,
            _ => default_context_window("openai"),
        }
    }

    fn validate_credentials(&self, _model: &str) -> CredentialStatus {
        match std::env::var(CREDENTIAL_ENV_VAR) {
            Ok(_) => CredentialStatus::Ok,
            Err(_) => CredentialStatus::Missing {
                env_var: CREDENTIAL_ENV_VAR.to_string(),
            },
        }
    }
}
