// src/provider/openai_compat.rs — Generic OpenAI-compatible provider
//
// Works against OpenAI itself and any endpoint speaking the same
// `/chat/completions` protocol (vLLM, Ollama, OpenRouter, ...).

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelProvider, Role, TokenUsage};
use crate::infra::config::ModelConfig;
use crate::infra::errors::SizerError;

/// Fallback wait when a 429 carries no usable Retry-After header.
const DEFAULT_RATE_LIMIT_MS: u64 = 5_000;

/// Longest Retry-After honored; larger values are clamped.
const MAX_RATE_LIMIT_MS: u64 = 300_000;

pub struct OpenAICompatProvider {
    id_str: String,
    name_str: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        api_key: String,
        base_url: String,
    ) -> Self {
        Self {
            id_str: id.into(),
            name_str: name.into(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the `[model]` config section, reading the key from its env var.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, SizerError> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| SizerError::NoApiKey {
            env: cfg.api_key_env.clone(),
        })?;
        Ok(Self::new(
            "openai-compat",
            "OpenAI-compatible",
            api_key,
            cfg.base_url.clone(),
        ))
    }

    fn provider_error(&self, message: String, retriable: bool) -> SizerError {
        SizerError::Provider {
            provider: self.id_str.clone(),
            message,
            retriable,
        }
    }
}

/// Request body for `/chat/completions`.
pub(crate) fn build_body(request: &ChatRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    for m in &request.messages {
        messages.push(serde_json::json!({
            "role": match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            "content": m.content,
        }));
    }

    let mut body = serde_json::json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    body
}

/// Pull content and usage out of a completion response.
pub(crate) fn parse_completion(resp: &serde_json::Value) -> ChatResponse {
    let content = resp["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    let usage = TokenUsage {
        input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    ChatResponse { content, usage }
}

/// `Retry-After` in whole seconds, converted to milliseconds.
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000).min(MAX_RATE_LIMIT_MS))
        .unwrap_or(DEFAULT_RATE_LIMIT_MS)
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id_str
    }

    fn name(&self) -> &str {
        &self.name_str
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, SizerError> {
        let body = build_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                format!("ampsizer/{}", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SizerError::RateLimited {
                provider: self.id_str.clone(),
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.provider_error(
                format!("HTTP {}: {}", status, error_body),
                status.is_server_error(),
            ));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.provider_error(format!("Failed to parse response: {}", e), false))?;

        let parsed = parse_completion(&resp);
        tracing::debug!(
            provider = %self.id_str,
            tokens = parsed.usage.total(),
            "Completion received"
        );
        Ok(parsed)
    }
}
