//! Contract for the controller that acts out agents in the external world.
//!
//! The kernel decides; an [`Embodiment`] executes: it walks bodies to
//! coordinates, makes them speak, and keeps the world's time of day in step
//! with the simulated clock. Commands are fire-and-forget from the kernel's
//! point of view. A failed command is logged and the tick carries on.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::world::Coordinates;

/// A command the embodiment controller could not carry out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("embodiment command failed for {agent}: {message}")]
pub struct EmbodimentError {
    /// Agent the command was for (empty for world-wide commands).
    pub agent: String,
    /// What went wrong.
    pub message: String,
}

/// Lifecycle notifications from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The agent's body appeared in the world.
    Spawned,
    /// The agent's body left the world.
    Disconnected,
}

/// Executes movement and speech in the external world.
#[async_trait]
pub trait Embodiment: Send + Sync {
    /// Set the world's time of day, in the world's own 24 000-tick day.
    async fn sync_clock(&self, world_time: u32) -> Result<(), EmbodimentError>;

    /// Walk `agent` to `target`, stopping within `tolerance`.
    async fn navigate(
        &self,
        agent: &str,
        target: Coordinates,
        tolerance: f64,
    ) -> Result<(), EmbodimentError>;

    /// Make `agent` follow `target`.
    async fn follow(&self, agent: &str, target: &str) -> Result<(), EmbodimentError>;

    /// Make `agent` look at `target`.
    async fn stare(&self, agent: &str, target: &str) -> Result<(), EmbodimentError>;

    /// Make `agent` say `text` out loud.
    async fn say(&self, agent: &str, text: &str) -> Result<(), EmbodimentError>;

    /// Report a lifecycle change. Only logged.
    fn on_lifecycle(&self, agent: &str, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Spawned => info!(agent, "agent spawned"),
            LifecycleSignal::Disconnected => warn!(agent, "agent disconnected"),
        }
    }
}

/// Embodiment that only logs each command. Used when no external world is
/// attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmbodiment;

#[async_trait]
impl Embodiment for TracingEmbodiment {
    async fn sync_clock(&self, world_time: u32) -> Result<(), EmbodimentError> {
        tracing::debug!(world_time, "sync clock");
        Ok(())
    }

    async fn navigate(
        &self,
        agent: &str,
        target: Coordinates,
        tolerance: f64,
    ) -> Result<(), EmbodimentError> {
        info!(agent, %target, tolerance, "navigate");
        Ok(())
    }

    async fn follow(&self, agent: &str, target: &str) -> Result<(), EmbodimentError> {
        info!(agent, target, "follow");
        Ok(())
    }

    async fn stare(&self, agent: &str, target: &str) -> Result<(), EmbodimentError> {
        info!(agent, target, "stare");
        Ok(())
    }

    async fn say(&self, agent: &str, text: &str) -> Result<(), EmbodimentError> {
        info!(agent, text, "say");
        Ok(())
    }
}

/// A command received by a [`RecordingEmbodiment`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `sync_clock`
    SyncClock(u32),
    /// `navigate`
    Navigate {
        /// Agent moved.
        agent: String,
        /// Where to.
        target: Coordinates,
    },
    /// `follow`
    Follow {
        /// Follower.
        agent: String,
        /// Followed agent.
        target: String,
    },
    /// `stare`
    Stare {
        /// Watcher.
        agent: String,
        /// Watched agent.
        target: String,
    },
    /// `say`
    Say {
        /// Speaker.
        agent: String,
        /// Spoken text.
        text: String,
    },
}

/// Embodiment that records every command in memory, for tests and dry
/// runs.
#[derive(Debug, Default)]
pub struct RecordingEmbodiment {
    commands: Mutex<Vec<Command>>,
}

impl RecordingEmbodiment {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, command: Command) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

#[async_trait]
impl Embodiment for RecordingEmbodiment {
    async fn sync_clock(&self, world_time: u32) -> Result<(), EmbodimentError> {
        self.record(Command::SyncClock(world_time));
        Ok(())
    }

    async fn navigate(
        &self,
        agent: &str,
        target: Coordinates,
        _tolerance: f64,
    ) -> Result<(), EmbodimentError> {
        self.record(Command::Navigate {
            agent: agent.to_owned(),
            target,
        });
        Ok(())
    }

    async fn follow(&self, agent: &str, target: &str) -> Result<(), EmbodimentError> {
        self.record(Command::Follow {
            agent: agent.to_owned(),
            target: target.to_owned(),
        });
        Ok(())
    }

    async fn stare(&self, agent: &str, target: &str) -> Result<(), EmbodimentError> {
        self.record(Command::Stare {
            agent: agent.to_owned(),
            target: target.to_owned(),
        });
        Ok(())
    }

    async fn say(&self, agent: &str, text: &str) -> Result<(), EmbodimentError> {
        self.record(Command::Say {
            agent: agent.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_keeps_order() {
        let recorder = RecordingEmbodiment::new();
        let target = Coordinates::from([1.0, 64.0, 2.0]);
        assert!(recorder.sync_clock(18_000).await.is_ok());
        assert!(recorder.navigate("Ada", target, 1.0).await.is_ok());
        assert!(recorder.follow("Ada", "Bob").await.is_ok());
        assert!(recorder.say("Ada", "hello").await.is_ok());
        recorder.on_lifecycle("Ada", LifecycleSignal::Spawned);

        let commands = recorder.commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands.first(), Some(&Command::SyncClock(18_000)));
        assert_eq!(
            commands.last(),
            Some(&Command::Say {
                agent: "Ada".to_owned(),
                text: "hello".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn tracing_embodiment_accepts_everything() {
        let embodiment = TracingEmbodiment;
        assert!(embodiment.sync_clock(0).await.is_ok());
        assert!(embodiment.stare("Ada", "Bob").await.is_ok());
        embodiment.on_lifecycle("Ada", LifecycleSignal::Disconnected);
    }
}
