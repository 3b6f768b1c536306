//! The Township simulation kernel.
//!
//! A population of agents shares one simulated day that advances in fixed
//! steps. Every tick the [`scheduler`] runs each agent's behavior unit in
//! parallel, waits for all of them, publishes what they produced onto the
//! [`event_bus`], and advances the [`clock`]. Agents decide what to do by
//! consulting a reasoning service, talk to each other through
//! conversations owned by the [`conversation`] manager, and remember what
//! they observe in their memory store.
//!
//! # Modules
//!
//! - [`agent`] -- Agent state and the per-tick behavior state machine
//! - [`clock`] -- Simulated minute-of-day with wraparound
//! - [`config`] -- YAML configuration
//! - [`conversation`] -- Conversations as single owned entities
//! - [`embodiment`] -- Contract for the controller acting in the external world
//! - [`event_bus`] -- Double-buffered, tick-scoped event publication
//! - [`parse`] -- Extraction of structured answers from free text
//! - [`persona`] -- Helpers over persona documents
//! - [`planner`] -- Daily schedule regeneration
//! - [`prompt`] -- Prompt templates
//! - [`registry`] -- Explicit agent directory
//! - [`resilience`] -- Timeouts, retries, and a circuit breaker around the reasoner
//! - [`schedule`] -- Validated daily schedules and their files
//! - [`scheduler`] -- The tick loop
//! - [`shutdown`] -- Cooperative stop signal
//! - [`world`] -- Points of interest agents can walk to

pub mod agent;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod embodiment;
pub mod event_bus;
pub mod parse;
pub mod persona;
pub mod planner;
pub mod prompt;
pub mod registry;
pub mod resilience;
pub mod schedule;
pub mod scheduler;
pub mod shutdown;
pub mod world;
