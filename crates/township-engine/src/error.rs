//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! that can stop the town from starting.

use std::path::PathBuf;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: township_core::config::ConfigError,
    },

    /// Backend settings from the environment are invalid.
    #[error("backend error: {source}")]
    Backend {
        /// The underlying backend error.
        #[from]
        source: township_llm::LlmError,
    },

    /// A file the town needs could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Prompt templates failed to load.
    #[error("prompt error: {source}")]
    Prompt {
        /// The underlying template error.
        #[from]
        source: township_core::prompt::PromptError,
    },

    /// A schedule file is missing, unreadable, or not a full day.
    #[error("schedule error: {source}")]
    Schedule {
        /// The underlying schedule error.
        #[from]
        source: township_core::schedule::ScheduleError,
    },

    /// No schedule file existed and planning a fresh day failed.
    #[error("planning error: {source}")]
    Planning {
        /// The underlying planning error.
        #[from]
        source: township_core::planner::PlanningError,
    },

    /// A memory file could not be opened.
    #[error("memory error: {source}")]
    Memory {
        /// The underlying memory error.
        #[from]
        source: township_memory::MemoryError,
    },

    /// Two agents share a name.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: township_core::registry::RegistryError,
    },

    /// The simulated clock could not be created.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: township_core::clock::ClockError,
    },

    /// The scheduler refused to start.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: township_core::scheduler::SchedulerError,
    },
}
