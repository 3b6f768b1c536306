//! Contracts for the external services the kernel consults.
//!
//! The reasoning service completes prompts within a named session whose
//! history the service retains; the embedding service turns text into a
//! dense vector. Both are consumed through trait objects so the kernel can
//! run against real HTTP backends, offline fallbacks, or scripted doubles.

use async_trait::async_trait;

/// Errors surfaced by a reasoning or embedding service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service could not be reached or returned a failure status.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Which service failed (backend name).
        service: String,
        /// Description of the failure.
        message: String,
    },

    /// The call did not complete within its deadline.
    #[error("{service} timed out after {after_ms}ms")]
    Timeout {
        /// Which service timed out.
        service: String,
        /// The deadline that was exceeded, in milliseconds.
        after_ms: u64,
    },

    /// Too many consecutive failures; calls are short-circuited until the
    /// cooldown elapses.
    #[error("{service} circuit open")]
    CircuitOpen {
        /// Which service is short-circuited.
        service: String,
    },

    /// The service answered, but the payload was not usable.
    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        /// Which service answered.
        service: String,
        /// What was wrong with the payload.
        message: String,
    },
}

impl ServiceError {
    /// Whether retrying the same call may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Identifies a reasoning session whose turn history is retained across
/// calls (a system-role / participant pair).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// The role the service plays in this session.
    pub role: String,
    /// Who the service is talking to.
    pub participant: String,
}

impl SessionKey {
    /// Role used for every kernel session.
    pub const ASSISTANT: &'static str = "assistant";

    /// Create a session key from its parts.
    pub fn new(role: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            participant: participant.into(),
        }
    }

    /// The session an agent's own prompts run in.
    pub fn for_agent(name: &str) -> Self {
        Self::new(Self::ASSISTANT, name)
    }

    /// The session shared by agent-independent prompts (importance
    /// scoring, summaries, planning).
    pub fn shared() -> Self {
        Self::new(Self::ASSISTANT, "user")
    }
}

impl core::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}_{}", self.role, self.participant)
    }
}

/// Sampling parameters sent with every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_tokens: Option<u32>,
}

impl SamplingParams {
    /// Temperature used uniformly by the kernel.
    pub const DEFAULT_TEMPERATURE: f32 = 0.5;
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }
}

/// A text-completion service.
///
/// Implementations must return post-processed text: private reasoning spans
/// removed and whitespace collapsed.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Complete `prompt` within `session`.
    async fn complete(
        &self,
        session: &SessionKey,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// A text-embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a dense vector. The vector need not be normalized.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// Dimensionality of the produced vectors.
    fn dimensions(&self) -> usize;
}
