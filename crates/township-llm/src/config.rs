//! Backend connection settings loaded from the environment.
//!
//! The simulation's YAML file carries tuning knobs; where the services live
//! and how to authenticate against them comes from environment variables so
//! keys never end up in a checked-in file.

use crate::error::LlmError;

/// Default OpenAI-compatible endpoint (a local Ollama server).
pub const DEFAULT_API_URL: &str = "http://localhost:11434/v1";

/// Default completion model.
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default vector size of the hashing embedder.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Supported completion API flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible API (works with `OpenAI`, `DeepSeek`, Ollama, vLLM).
    OpenAi,
    /// Anthropic Messages API (different request format).
    Anthropic,
}

impl BackendType {
    /// Parse a backend name as written in `LLM_BACKEND`.
    pub fn parse(name: &str) -> Result<Self, LlmError> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "deepseek" | "ollama" | "vllm" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(LlmError::config(format!("unknown backend type: {other}"))),
        }
    }
}

/// Connection settings of the completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmBackendConfig {
    /// The API flavor.
    pub backend_type: BackendType,
    /// Base API URL (e.g. `http://localhost:11434/v1`).
    pub api_url: String,
    /// API key; empty for unauthenticated local servers.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
}

impl LlmBackendConfig {
    /// Load from the process environment.
    ///
    /// - `LLM_BACKEND` -- `openai` (default) or `anthropic`
    /// - `LLM_API_URL` -- base URL (default [`DEFAULT_API_URL`])
    /// - `LLM_API_KEY` -- API key (default empty)
    /// - `LLM_MODEL` -- model name (default [`DEFAULT_MODEL`])
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(env_var)
    }

    /// Load through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LlmError> {
        let backend_type = lookup("LLM_BACKEND")
            .map_or(Ok(BackendType::OpenAi), |name| BackendType::parse(&name))?;
        Ok(Self {
            backend_type,
            api_url: trim_url(&lookup("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_owned())),
            api_key: lookup("LLM_API_KEY").unwrap_or_default(),
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
        })
    }
}

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackendType {
    /// An OpenAI-compatible `/embeddings` endpoint.
    Http,
    /// The offline feature-hashing embedder.
    Hashing,
}

/// Connection settings of the embedding backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Which embedder to build.
    pub backend_type: EmbeddingBackendType,
    /// Base API URL.
    pub api_url: String,
    /// API key; empty for unauthenticated local servers.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Expected vector size. Required for hashing, checked for HTTP.
    pub dimensions: Option<usize>,
}

impl EmbeddingConfig {
    /// Load from the process environment.
    ///
    /// - `EMBEDDING_BACKEND` -- `hashing` (default) or `http`
    /// - `EMBEDDING_API_URL` -- base URL (default: `LLM_API_URL`)
    /// - `EMBEDDING_API_KEY` -- API key (default: `LLM_API_KEY`)
    /// - `EMBEDDING_MODEL` -- model name (default [`DEFAULT_EMBEDDING_MODEL`])
    /// - `EMBEDDING_DIMENSIONS` -- vector size
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(env_var)
    }

    /// Load through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LlmError> {
        let backend_type = match lookup("EMBEDDING_BACKEND")
            .map(|name| name.trim().to_lowercase())
            .as_deref()
        {
            None | Some("hashing") => EmbeddingBackendType::Hashing,
            Some("http" | "openai" | "ollama") => EmbeddingBackendType::Http,
            Some(other) => {
                return Err(LlmError::config(format!(
                    "unknown embedding backend: {other}"
                )));
            }
        };
        let dimensions = lookup("EMBEDDING_DIMENSIONS")
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|&d| d > 0)
                    .ok_or_else(|| LlmError::config(format!("invalid EMBEDDING_DIMENSIONS: {raw}")))
            })
            .transpose()?;
        let api_url = lookup("EMBEDDING_API_URL")
            .or_else(|| lookup("LLM_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        Ok(Self {
            backend_type,
            api_url: trim_url(&api_url),
            api_key: lookup("EMBEDDING_API_KEY")
                .or_else(|| lookup("LLM_API_KEY"))
                .unwrap_or_default(),
            model: lookup("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned()),
            dimensions,
        })
    }

    /// Vector size for the hashing embedder.
    pub fn hashing_dimensions(&self) -> usize {
        self.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

/// Read an optional environment variable, treating empty as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}
