//! Configuration loading and typed config structures for the Township
//! kernel.
//!
//! The configuration lives in `township-config.yaml` (or the file named by
//! `TOWNSHIP_CONFIG`). Every section and field has a default, so an empty
//! file is a valid configuration for a run without agents. Connection
//! details for the reasoning and embedding backends come from the
//! environment instead; see `township-llm`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use township_memory::MemoryConfig;

use crate::clock::{DEFAULT_STEP_MINUTES, WAKE_OFFSET_MINUTES};
use crate::resilience::RetryPolicy;
use crate::world::WorldMap;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "township-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Seed, pacing, and simulated time.
    #[serde(default)]
    pub world: WorldConfig,

    /// The agents to simulate.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Where schedules, memories, and template overrides live.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Conversation length bounds.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Memory store tuning.
    #[serde(default)]
    pub memory: MemorySection,

    /// Reasoner call policy.
    #[serde(default)]
    pub llm: LlmSection,

    /// Points of interest.
    #[serde(default)]
    pub world_map: WorldMap,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `TOWNSHIP_SCHEDULE_DIR` and `TOWNSHIP_MEMORY_DIR` override the
    /// corresponding `paths` entries. The result is validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.paths.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Path of the configuration file: `TOWNSHIP_CONFIG` or the default.
    pub fn default_path() -> PathBuf {
        std::env::var("TOWNSHIP_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let step = self.world.step_minutes;
        if step == 0 || step >= township_types::DAY_MINUTES {
            return Err(ConfigError::Invalid {
                field: "world.step_minutes",
                reason: format!("{step} is not between 1 and 1439"),
            });
        }
        if let Some(start) = self.world.start_minute
            && start >= township_types::DAY_MINUTES
        {
            return Err(ConfigError::Invalid {
                field: "world.start_minute",
                reason: format!("{start} is outside the day"),
            });
        }
        if self.conversation.speak_bound == 0 {
            return Err(ConfigError::Invalid {
                field: "conversation.speak_bound",
                reason: "must be positive".to_owned(),
            });
        }
        if !(0.0..=1.0).contains(&self.memory.similarity_threshold) {
            return Err(ConfigError::Invalid {
                field: "memory.similarity_threshold",
                reason: format!("{} is outside [0, 1]", self.memory.similarity_threshold),
            });
        }
        let mut names = std::collections::BTreeSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "agents.name",
                    reason: "agent names must not be empty".to_owned(),
                });
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "agents.name",
                    reason: format!("duplicate agent {}", agent.name),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Seed for every agent's random number generator.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time milliseconds to wait between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated minutes per tick.
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,

    /// Fixed start minute. When absent the run starts a little after the
    /// earliest wake-up.
    #[serde(default)]
    pub start_minute: Option<u32>,

    /// Minutes between the earliest wake-up and the start of a run.
    #[serde(default = "default_wake_offset_minutes")]
    pub wake_offset_minutes: u32,
}

impl WorldConfig {
    /// Wall-clock pause between ticks.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            tick_interval_ms: default_tick_interval_ms(),
            step_minutes: default_step_minutes(),
            start_minute: None,
            wake_offset_minutes: default_wake_offset_minutes(),
        }
    }
}

/// One simulated agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Unique display name.
    pub name: String,

    /// Persona text file.
    pub persona_path: PathBuf,
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `{name}.json` schedule files.
    #[serde(default = "default_schedule_dir")]
    pub schedule_dir: PathBuf,

    /// Directory holding `{name}.json` memory files.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: PathBuf,

    /// Optional directory of prompt template overrides.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,

    /// Optional file holding the system prompt of every reasoning session.
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
}

impl PathsConfig {
    /// Override directories with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TOWNSHIP_SCHEDULE_DIR") {
            self.schedule_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TOWNSHIP_MEMORY_DIR") {
            self.memory_dir = PathBuf::from(val);
        }
    }

    /// Schedule file of `agent`.
    pub fn schedule_file(&self, agent: &str) -> PathBuf {
        self.schedule_dir.join(format!("{agent}.json"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            schedule_dir: default_schedule_dir(),
            memory_dir: default_memory_dir(),
            templates_dir: None,
            system_prompt: None,
        }
    }
}

/// Conversation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConversationConfig {
    /// The turn holder keeps speaking while the transcript is shorter than
    /// this.
    #[serde(default = "default_speak_bound")]
    pub speak_bound: usize,

    /// The other participant keeps listening while the transcript is
    /// shorter than this.
    #[serde(default = "default_listen_bound")]
    pub listen_bound: usize,

    /// Transcript lines shown to the speaker.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            speak_bound: default_speak_bound(),
            listen_bound: default_listen_bound(),
            history_window: default_history_window(),
        }
    }
}

/// Memory store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MemorySection {
    /// Duplicate threshold on cosine similarity.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Search hits per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl MemorySection {
    /// As the memory crate's config.
    pub const fn store_config(&self) -> MemoryConfig {
        MemoryConfig {
            similarity_threshold: self.similarity_threshold,
            top_k: self.top_k,
        }
    }
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
        }
    }
}

/// Reasoner call policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LlmSection {
    /// Deadline per attempt, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Consecutive failed calls that open the circuit breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// How long the breaker stays open, in milliseconds.
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Messages kept per session history, excluding the system prompt.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

impl LlmSection {
    /// The retry policy these settings describe.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.request_timeout_ms),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            breaker_threshold: self.breaker_threshold,
            breaker_cooldown: Duration::from_millis(self.breaker_cooldown_ms),
        }
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
            temperature: default_temperature(),
            max_history_messages: default_max_history_messages(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_seed() -> u64 {
    42
}

const fn default_tick_interval_ms() -> u64 {
    5000
}

const fn default_step_minutes() -> u32 {
    DEFAULT_STEP_MINUTES
}

const fn default_wake_offset_minutes() -> u32 {
    WAKE_OFFSET_MINUTES
}

fn default_schedule_dir() -> PathBuf {
    PathBuf::from("schedule")
}

fn default_memory_dir() -> PathBuf {
    PathBuf::from("memory")
}

const fn default_speak_bound() -> usize {
    10
}

const fn default_listen_bound() -> usize {
    5
}

const fn default_history_window() -> usize {
    4
}

const fn default_similarity_threshold() -> f32 {
    MemoryConfig::DEFAULT_SIMILARITY_THRESHOLD
}

const fn default_top_k() -> usize {
    MemoryConfig::DEFAULT_TOP_K
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_retry_backoff_ms() -> u64 {
    500
}

const fn default_breaker_threshold() -> u32 {
    5
}

const fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

const fn default_temperature() -> f32 {
    township_types::SamplingParams::DEFAULT_TEMPERATURE
}

const fn default_max_history_messages() -> usize {
    40
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.world.step_minutes, 5);
        assert_eq!(config.conversation.speak_bound, 10);
        assert_eq!(config.conversation.listen_bound, 5);
        assert_eq!(config.memory.top_k, 10);
        assert_eq!(config.llm.max_retries, 2);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
world:
  seed: 7
  tick_interval_ms: 250
  start_minute: 480
agents:
  - name: Ada
    persona_path: persona/Ada.txt
  - name: Bob
    persona_path: persona/Bob.txt
paths:
  schedule_dir: data/schedule
  templates_dir: prompts
conversation:
  speak_bound: 6
  listen_bound: 3
memory:
  similarity_threshold: 0.9
llm:
  request_timeout_ms: 1000
  breaker_threshold: 3
world_map:
  arrival_tolerance: 2.0
  points:
    cafe: [1, 64, 2]
logging:
  level: debug
";
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.seed, 7);
        assert_eq!(config.world.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.world.start_minute, Some(480));
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.conversation.speak_bound, 6);
        assert_eq!(config.conversation.history_window, 4);
        assert!((config.memory.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.memory.store_config().top_k, 10);
        let policy = config.llm.retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(1));
        assert_eq!(policy.breaker_threshold, 3);
        assert!(config.world_map.position("cafe").is_some());
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.paths.templates_dir, Some(PathBuf::from("prompts")));
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SimulationConfig::parse("").is_ok());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            SimulationConfig::parse("world:\n  step_minutes: 0\n"),
            Err(ConfigError::Invalid { field: "world.step_minutes", .. })
        ));
        assert!(matches!(
            SimulationConfig::parse("world:\n  start_minute: 1440\n"),
            Err(ConfigError::Invalid { field: "world.start_minute", .. })
        ));
        assert!(matches!(
            SimulationConfig::parse("memory:\n  similarity_threshold: 1.5\n"),
            Err(ConfigError::Invalid { .. })
        ));
        let duplicate = "agents:\n  - {name: Ada, persona_path: a.txt}\n  - {name: Ada, persona_path: b.txt}\n";
        assert!(matches!(
            SimulationConfig::parse(duplicate),
            Err(ConfigError::Invalid { field: "agents.name", .. })
        ));
    }

    #[test]
    fn schedule_file_path() {
        let paths = PathsConfig::default();
        assert_eq!(paths.schedule_file("Ada"), PathBuf::from("schedule/Ada.json"));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(DEFAULT_CONFIG_PATH);
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
