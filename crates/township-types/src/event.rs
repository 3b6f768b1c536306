//! Events published by agents onto the shared event bus.

use serde::{Deserialize, Serialize};

/// A (subject, object, description) fact produced by one agent during a
/// tick and visible to every agent from the following tick on.
///
/// Events are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Who performed the action. For agent-produced events this is usually
    /// the agent's name.
    pub subject: String,
    /// What the action was directed at.
    pub object: String,
    /// Free-text description, e.g. `"brewing coffee"`.
    pub description: String,
}

impl Event {
    /// Create a new event.
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            description: description.into(),
        }
    }

    /// Whether this event says its subject is asleep.
    ///
    /// Sleeping agents are not worth reacting to.
    pub fn signals_sleep(&self) -> bool {
        self.object == "sleep" || self.description == "sleeping"
    }
}

impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}) {}", self.subject, self.object, self.description)
    }
}
