//! Conversations as single owned entities.
//!
//! A [`Conversation`] between two agents lives in the
//! [`ConversationManager`], never on the agents themselves. Both
//! participants refer to it by [`ConversationId`], the single turn holder
//! replaces per-agent turn flags, and [`ConversationManager::conclude`]
//! hands the closed conversation to exactly one caller.
//!
//! All state sits behind one `std::sync::Mutex`. Critical sections are a
//! few map operations long and never span an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use township_types::ConversationId;

/// Errors from conversation operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// A participant is already in another conversation.
    #[error("{agent} is already in a conversation")]
    Busy {
        /// The busy participant.
        agent: String,
    },

    /// An agent tried to talk to itself.
    #[error("{agent} cannot open a conversation with itself")]
    SelfConversation {
        /// The agent.
        agent: String,
    },

    /// The conversation has been concluded or never existed.
    #[error("conversation {id} is not active")]
    NotFound {
        /// The conversation.
        id: ConversationId,
    },

    /// The agent does not take part in the conversation.
    #[error("{agent} is not a participant of conversation {id}")]
    NotParticipant {
        /// The outsider.
        agent: String,
        /// The conversation.
        id: ConversationId,
    },
}

/// One line of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utterance {
    /// Who spoke.
    pub speaker: String,
    /// What they said.
    pub text: String,
}

/// An active conversation between two agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Identifier both participants hold.
    pub id: ConversationId,
    /// The agent that opened the conversation.
    pub initiator: String,
    /// The agent that was addressed.
    pub target: String,
    /// What the conversation is about.
    pub topic: String,
    /// Everything said so far, oldest first.
    pub transcript: Vec<Utterance>,
    /// The participant allowed to speak next.
    pub turn_holder: String,
}

impl Conversation {
    /// The other participant, if `agent` is one of the two.
    pub fn partner_of(&self, agent: &str) -> Option<&str> {
        if agent == self.initiator {
            Some(&self.target)
        } else if agent == self.target {
            Some(&self.initiator)
        } else {
            None
        }
    }

    /// Whether `agent` takes part.
    pub fn involves(&self, agent: &str) -> bool {
        self.partner_of(agent).is_some()
    }

    /// The last `n` utterances.
    pub fn recent(&self, n: usize) -> &[Utterance] {
        let skip = self.transcript.len().saturating_sub(n);
        self.transcript.get(skip..).unwrap_or_default()
    }
}

/// What one agent sees of the conversation system.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationView {
    /// The active conversation, if the agent is in one.
    pub conversation: Option<Conversation>,
    /// Whether the agent already finished a conversation today.
    pub chatted_today: bool,
}

impl ConversationView {
    /// Whether the agent is in a conversation.
    pub const fn in_conversation(&self) -> bool {
        self.conversation.is_some()
    }

    /// Whether the agent holds the turn in its conversation.
    pub fn has_turn(&self, agent: &str) -> bool {
        self.conversation
            .as_ref()
            .is_some_and(|c| c.turn_holder == agent)
    }
}

#[derive(Debug, Default)]
struct Inner {
    active: BTreeMap<ConversationId, Conversation>,
    membership: BTreeMap<String, ConversationId>,
    chatted_today: BTreeSet<String>,
}

/// Owner of every active conversation.
#[derive(Debug, Default)]
pub struct ConversationManager {
    inner: Mutex<Inner>,
}

impl ConversationManager {
    /// Create a manager with no conversations.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of `agent`'s conversation state.
    pub fn view(&self, agent: &str) -> ConversationView {
        let inner = self.lock();
        ConversationView {
            conversation: inner
                .membership
                .get(agent)
                .and_then(|id| inner.active.get(id))
                .cloned(),
            chatted_today: inner.chatted_today.contains(agent),
        }
    }

    /// Open a conversation: both participants join it, `utterance` from
    /// `initiator` starts the transcript, and `target` gets the turn.
    pub fn open(
        &self,
        initiator: &str,
        target: &str,
        topic: &str,
        utterance: &str,
    ) -> Result<ConversationId, ConversationError> {
        if initiator == target {
            return Err(ConversationError::SelfConversation {
                agent: initiator.to_owned(),
            });
        }
        let mut inner = self.lock();
        for agent in [initiator, target] {
            if inner.membership.contains_key(agent) {
                return Err(ConversationError::Busy {
                    agent: agent.to_owned(),
                });
            }
        }

        let id = ConversationId::new();
        inner.membership.insert(initiator.to_owned(), id);
        inner.membership.insert(target.to_owned(), id);
        inner.active.insert(
            id,
            Conversation {
                id,
                initiator: initiator.to_owned(),
                target: target.to_owned(),
                topic: topic.to_owned(),
                transcript: vec![Utterance {
                    speaker: initiator.to_owned(),
                    text: utterance.to_owned(),
                }],
                turn_holder: target.to_owned(),
            },
        );
        Ok(id)
    }

    /// Append `text` by `speaker` and pass the turn to the partner.
    /// Returns the new transcript length.
    pub fn record_utterance(
        &self,
        id: ConversationId,
        speaker: &str,
        text: &str,
    ) -> Result<usize, ConversationError> {
        let mut inner = self.lock();
        let conversation = inner
            .active
            .get_mut(&id)
            .ok_or(ConversationError::NotFound { id })?;
        let partner = conversation
            .partner_of(speaker)
            .ok_or_else(|| ConversationError::NotParticipant {
                agent: speaker.to_owned(),
                id,
            })?
            .to_owned();
        conversation.transcript.push(Utterance {
            speaker: speaker.to_owned(),
            text: text.to_owned(),
        });
        conversation.turn_holder = partner;
        Ok(conversation.transcript.len())
    }

    /// Give the turn to `agent`.
    pub fn claim_turn(&self, id: ConversationId, agent: &str) -> Result<(), ConversationError> {
        let mut inner = self.lock();
        let conversation = inner
            .active
            .get_mut(&id)
            .ok_or(ConversationError::NotFound { id })?;
        if !conversation.involves(agent) {
            return Err(ConversationError::NotParticipant {
                agent: agent.to_owned(),
                id,
            });
        }
        agent.clone_into(&mut conversation.turn_holder);
        Ok(())
    }

    /// Close the conversation and return it. Exactly one caller receives
    /// it; later callers get `None`. Both participants are marked as
    /// having chatted today.
    pub fn conclude(&self, id: ConversationId) -> Option<Conversation> {
        let mut inner = self.lock();
        let conversation = inner.active.remove(&id)?;
        for agent in [&conversation.initiator, &conversation.target] {
            inner.membership.remove(agent.as_str());
            inner.chatted_today.insert(agent.clone());
        }
        Some(conversation)
    }

    /// Forget who chatted today. Called when the day wraps.
    pub fn reset_day(&self) {
        self.lock().chatted_today.clear();
    }

    /// Number of active conversations.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}
