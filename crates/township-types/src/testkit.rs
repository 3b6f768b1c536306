//! Scripted service doubles for tests.
//!
//! [`ScriptedReasoner`] answers by substring rules and records every call;
//! [`FailingReasoner`] always fails; [`FixedEmbedder`] returns
//! caller-provided vectors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::services::{Embedder, Reasoner, SamplingParams, ServiceError, SessionKey};

/// A prompt the scripted reasoner received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Session the prompt was sent in.
    pub session: SessionKey,
    /// The prompt text.
    pub prompt: String,
}

/// Reasoner that replies according to "prompt contains X" rules.
///
/// Rules are checked in insertion order; the first match wins. Prompts no
/// rule matches get the default reply.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    rules: Vec<(String, String)>,
    default_reply: String,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedReasoner {
    /// Create a reasoner that answers `default_reply` to everything.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply `reply` to any prompt containing `needle`.
    #[must_use]
    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of received prompts containing `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.prompt.contains(needle))
            .count()
    }

    fn reply_for(&self, prompt: &str) -> String {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or_else(|| self.default_reply.clone(), |(_, reply)| reply.clone())
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(
        &self,
        session: &SessionKey,
        prompt: &str,
        _params: SamplingParams,
    ) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                session: session.clone(),
                prompt: prompt.to_owned(),
            });
        Ok(self.reply_for(prompt))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Reasoner whose every call fails with the configured error.
#[derive(Debug)]
pub struct FailingReasoner {
    error: ServiceError,
    attempts: AtomicU32,
}

impl FailingReasoner {
    /// Fail every call with `error`.
    pub const fn new(error: ServiceError) -> Self {
        Self {
            error,
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail every call with [`ServiceError::Unavailable`].
    pub fn unavailable() -> Self {
        Self::new(ServiceError::Unavailable {
            service: "failing".to_owned(),
            message: "scripted outage".to_owned(),
        })
    }

    /// Number of calls attempted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Reasoner for FailingReasoner {
    async fn complete(
        &self,
        _session: &SessionKey,
        _prompt: &str,
        _params: SamplingParams,
    ) -> Result<String, ServiceError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        Err(self.error.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Embedder returning fixed vectors per exact text.
///
/// Unknown texts embed to the zero vector, which is never similar to
/// anything and so never deduplicated.
#[derive(Debug, Default)]
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl FixedEmbedder {
    /// Create an embedder producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimensions,
        }
    }

    /// Embed `text` as `vector`.
    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dimensions]))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
