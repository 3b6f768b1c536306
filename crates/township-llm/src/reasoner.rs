//! A [`Reasoner`] that keeps one chat history per session.
//!
//! Every [`SessionKey`] gets its own transcript. A call appends the prompt,
//! sends the system prompt plus the whole transcript, cleans the reply, and
//! records both turns. Calls on the same session are serialized so the
//! transcript always alternates prompt and reply; calls on different
//! sessions run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use township_types::{Reasoner, SamplingParams, ServiceError, SessionKey};
use tracing::{debug, trace, warn};

use crate::backend::{ChatMessage, LlmBackend};

/// Messages kept per session when no cap is configured.
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 40;

/// System prompt sent when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the inner voice of a resident of a small \
town. Answer every question briefly and in exactly the format it asks for.";

/// The prompt/reply exchanges of one session, capped in length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    max_messages: usize,
}

impl Transcript {
    /// An empty transcript keeping at most `max_messages` messages.
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(2),
        }
    }

    /// The messages to send for `prompt`: the history followed by it.
    pub fn request(&self, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len().saturating_add(1));
        messages.extend(self.messages.iter().cloned());
        messages.push(ChatMessage::user(prompt));
        messages
    }

    /// Record a completed exchange, dropping the oldest exchanges beyond
    /// the cap.
    pub fn record(&mut self, prompt: &str, reply: &str) {
        self.messages.push(ChatMessage::user(prompt));
        self.messages.push(ChatMessage::assistant(reply));
        if let Some(excess) = self.messages.len().checked_sub(self.max_messages) {
            // Whole exchanges only, so the transcript still opens with a prompt.
            let drop = excess.next_multiple_of(2).min(self.messages.len());
            self.messages.drain(..drop);
        }
    }

    /// Recorded messages, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

type SessionSlot = Arc<tokio::sync::Mutex<Transcript>>;

/// Session-aware reasoner over an HTTP backend.
pub struct SessionReasoner {
    backend: LlmBackend,
    system_prompt: String,
    max_history_messages: usize,
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
}

impl core::fmt::Debug for SessionReasoner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionReasoner")
            .field("backend", &self.backend.name())
            .field("model", &self.backend.model())
            .field("max_history_messages", &self.max_history_messages)
            .finish_non_exhaustive()
    }
}

impl SessionReasoner {
    /// Wrap `backend`.
    pub fn new(
        backend: LlmBackend,
        system_prompt: impl Into<String>,
        max_history_messages: usize,
    ) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
            max_history_messages,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sessions seen so far.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn slot(&self, session: &SessionKey) -> SessionSlot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let max = self.max_history_messages;
        Arc::clone(
            sessions
                .entry(session.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Transcript::new(max)))),
        )
    }
}

#[async_trait]
impl Reasoner for SessionReasoner {
    async fn complete(
        &self,
        session: &SessionKey,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError> {
        let slot = self.slot(session);
        let mut transcript = slot.lock().await;
        let messages = transcript.request(prompt);
        trace!(%session, history = messages.len(), "sending completion");

        let raw = match self
            .backend
            .complete(&self.system_prompt, &messages, params)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%session, backend = self.backend.name(), error = %e, "completion failed");
                return Err(e.into());
            }
        };
        let reply = clean_completion(&raw);
        debug!(%session, reply = %reply, "completion received");
        transcript.record(prompt, &reply);
        Ok(reply)
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

/// Remove `<think>...</think>` spans and collapse whitespace runs into one
/// space.
pub fn clean_completion(raw: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut kept = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find(OPEN) {
        let (before, tail) = rest.split_at(start);
        let Some(end) = tail.find(CLOSE) else {
            break;
        };
        kept.push_str(before);
        rest = tail.get(end.saturating_add(CLOSE.len())..).unwrap_or_default();
    }
    kept.push_str(rest);
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::Role;

    #[test]
    fn strips_reasoning_spans() {
        assert_eq!(
            clean_completion("<think>\nthe user wants yes or no\n</think>\n\nYes.  Ada  likes coffee."),
            "Yes. Ada likes coffee."
        );
        assert_eq!(
            clean_completion("a <think>x</think> b <think>y</think> c"),
            "a b c"
        );
    }

    #[test]
    fn unclosed_span_is_kept() {
        assert_eq!(clean_completion("<think> still going"), "<think> still going");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_completion("  one\n\ttwo   three \n"), "one two three");
        assert_eq!(clean_completion(""), "");
    }

    #[test]
    fn request_appends_prompt_to_history() {
        let mut transcript = Transcript::new(10);
        transcript.record("first?", "one");
        let request = transcript.request("second?");
        assert_eq!(request.len(), 3);
        assert_eq!(request.last().unwrap(), &ChatMessage::user("second?"));
        // The pending prompt is not recorded until a reply arrives.
        assert_eq!(transcript.messages().len(), 2);
    }

    #[test]
    fn history_is_capped_by_whole_exchanges() {
        let mut transcript = Transcript::new(5);
        for i in 0..4 {
            transcript.record(&format!("q{i}"), &format!("a{i}"));
        }
        let messages = transcript.messages();
        assert!(messages.len() <= 5);
        assert_eq!(messages.first().unwrap(), &ChatMessage::user("q2"));
        assert_eq!(messages.last().unwrap(), &ChatMessage::assistant("a3"));
        assert!(messages.chunks(2).all(|pair| matches!(
            pair,
            [prompt, reply] if prompt.role == Role::User && reply.role == Role::Assistant
        )));
    }

    #[test]
    fn tiny_cap_keeps_last_exchange() {
        let mut transcript = Transcript::new(0);
        transcript.record("q0", "a0");
        transcript.record("q1", "a1");
        assert_eq!(
            transcript.messages(),
            &[ChatMessage::user("q1"), ChatMessage::assistant("a1")]
        );
    }
}
