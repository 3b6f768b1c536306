//! Shared type definitions for the Township simulation kernel.
//!
//! Everything that crosses a crate boundary lives here: the events agents
//! publish to each other, memory nodes, persisted schedule entries, and the
//! two service contracts (reasoning and embedding) the kernel consumes.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`event`] -- The (subject, object, description) fact agents publish
//! - [`memory`] -- Memory nodes owned by a single agent
//! - [`schedule`] -- Persisted (activity, minutes) schedule entries
//! - [`services`] -- Reasoner and embedder contracts plus their error type
//! - `testkit` -- Scripted service doubles (behind the `testkit` feature)

pub mod event;
pub mod ids;
pub mod memory;
pub mod schedule;
pub mod services;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use event::Event;
pub use ids::ConversationId;
pub use memory::MemoryNode;
pub use schedule::{DAY_MINUTES, ScheduleEntry};
pub use services::{Embedder, Reasoner, SamplingParams, ServiceError, SessionKey};
