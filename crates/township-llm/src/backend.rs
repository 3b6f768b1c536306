//! Chat completion backends.
//!
//! Enum dispatch over the two HTTP API flavors. Both take the full message
//! list of a session (the system prompt is passed separately because the
//! Anthropic API wants it as a top-level field) and return the raw reply
//! text. History and reply cleaning live in [`crate::reasoner`].

use serde::{Deserialize, Serialize};
use township_types::SamplingParams;

use crate::config::{BackendType, LlmBackendConfig};
use crate::error::LlmError;

/// Token cap sent when the caller does not set one. Anthropic requires it.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The simulation's prompt.
    User,
    /// The model's reply.
    Assistant,
}

/// One message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// A prompt message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A reply message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unified backend enum
// ---------------------------------------------------------------------------

/// A chat completion backend.
#[derive(Debug)]
pub enum LlmBackend {
    /// OpenAI-compatible chat completions API.
    OpenAi(OpenAiBackend),
    /// Anthropic Messages API.
    Anthropic(AnthropicBackend),
}

impl LlmBackend {
    /// Send `messages` after `system` and return the reply text.
    pub async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: SamplingParams,
    ) -> Result<String, LlmError> {
        match self {
            Self::OpenAi(backend) => backend.complete(system, messages, params).await,
            Self::Anthropic(backend) => backend.complete(system, messages, params).await,
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => OpenAiBackend::NAME,
            Self::Anthropic(_) => AnthropicBackend::NAME,
        }
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(backend) => &backend.model,
            Self::Anthropic(backend) => &backend.model,
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Works with `OpenAI`, `DeepSeek`, vLLM, and Ollama endpoints.
/// Sends requests to `{api_url}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    const NAME: &'static str = "openai-compatible";

    /// Create a new `OpenAI`-compatible backend.
    pub fn new(client: reqwest::Client, config: &LlmBackendConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: SamplingParams,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.api_url);

        let mut wire = Vec::with_capacity(messages.len().saturating_add(1));
        if !system.is_empty() {
            wire.push(serde_json::json!({"role": "system", "content": system}));
        }
        wire.extend(
            messages
                .iter()
                .map(|m| serde_json::json!({"role": m.role, "content": m.content})),
        );
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire,
            "temperature": params.temperature,
            "stream": false,
        });
        if let (Some(max_tokens), Some(fields)) = (params.max_tokens, body.as_object_mut()) {
            fields.insert("max_tokens".to_owned(), max_tokens.into());
        }

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let json = send(Self::NAME, request).await?;
        extract_openai_content(&json)
    }
}

/// Extract the text content from an `OpenAI` chat completions response.
fn extract_openai_content(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| LlmError::Response {
            backend: OpenAiBackend::NAME,
            message: "missing choices[0].message.content".to_owned(),
        })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API backend
// ---------------------------------------------------------------------------

/// Backend for the Anthropic Messages API.
///
/// Anthropic uses a different request format from `OpenAI`:
/// - Uses `x-api-key` header instead of `Authorization: Bearer`
/// - Messages array does not include system (system is a top-level field)
/// - Response structure differs: `content[0].text`
#[derive(Debug)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    const NAME: &'static str = "anthropic";

    /// Create a new Anthropic Messages API backend.
    pub fn new(client: reqwest::Client, config: &LlmBackendConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: SamplingParams,
    ) -> Result<String, LlmError> {
        let url = format!("{}/messages", self.api_url);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": params.temperature,
            "system": system,
            "messages": messages,
        });

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send(Self::NAME, request).await?;
        extract_anthropic_content(&json)
    }
}

/// Extract the text content from an Anthropic Messages API response.
fn extract_anthropic_content(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| LlmError::Response {
            backend: AnthropicBackend::NAME,
            message: "missing content[0].text".to_owned(),
        })
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Send `request`, check the status, and decode the JSON body.
pub(crate) async fn send(
    backend: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|source| LlmError::Request { backend, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        return Err(LlmError::Status {
            backend,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|source| LlmError::Request { backend, source })
}

/// Create a backend from configuration, sharing `client`.
pub fn create_backend(client: reqwest::Client, config: &LlmBackendConfig) -> LlmBackend {
    match config.backend_type {
        BackendType::OpenAi => LlmBackend::OpenAi(OpenAiBackend::new(client, config)),
        BackendType::Anthropic => LlmBackend::Anthropic(AnthropicBackend::new(client, config)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extract_openai_content_valid() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Yes. Ada is friendly."}}]
        });
        assert_eq!(extract_openai_content(&json).unwrap(), "Yes. Ada is friendly.");
    }

    #[test]
    fn extract_openai_content_missing_choices() {
        let json = serde_json::json!({"error": "rate_limit"});
        assert!(matches!(
            extract_openai_content(&json),
            Err(LlmError::Response { .. })
        ));
    }

    #[test]
    fn extract_anthropic_content_valid() {
        let json = serde_json::json!({
            "content": [{"type": "text", "text": "(Ada, coffee)"}]
        });
        assert_eq!(extract_anthropic_content(&json).unwrap(), "(Ada, coffee)");
    }

    #[test]
    fn extract_anthropic_content_missing() {
        let json = serde_json::json!({"content": []});
        assert!(extract_anthropic_content(&json).is_err());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn create_backend_dispatches_correctly() {
        let mut config = LlmBackendConfig {
            backend_type: BackendType::OpenAi,
            api_url: "http://localhost:11434/v1".to_owned(),
            api_key: String::new(),
            model: "llama3.1:8b".to_owned(),
        };
        let backend = create_backend(reqwest::Client::new(), &config);
        assert_eq!(backend.name(), "openai-compatible");
        assert_eq!(backend.model(), "llama3.1:8b");

        config.backend_type = BackendType::Anthropic;
        let backend = create_backend(reqwest::Client::new(), &config);
        assert_eq!(backend.name(), "anthropic");
    }
}
