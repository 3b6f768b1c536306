//! Building the town from configuration.
//!
//! Services come from the environment (see [`township_llm::config`]);
//! agents come from the `agents` section of the YAML file. Each agent needs
//! a persona file and a schedule file. A missing schedule file is planned
//! from the persona and written out; an invalid one stops startup.

use std::path::Path;
use std::sync::Arc;

use township_core::agent::{Agent, BehaviorContext, BehaviorSettings};
use township_core::clock;
use township_core::config::{AgentConfig, SimulationConfig};
use township_core::conversation::ConversationManager;
use township_core::embodiment::{Embodiment, LifecycleSignal};
use township_core::planner::Planner;
use township_core::prompt::PromptEngine;
use township_core::registry::AgentRegistry;
use township_core::resilience::ResilientReasoner;
use township_core::schedule::{self, DailySchedule};
use township_llm::reasoner::DEFAULT_SYSTEM_PROMPT;
use township_llm::{
    EmbeddingBackendType, EmbeddingConfig, HttpEmbedder, LlmBackendConfig, SessionReasoner,
    create_backend,
};
use township_memory::{HashingEmbedder, MemoryStore};
use township_types::{Embedder, Reasoner};
use tracing::info;

use crate::error::EngineError;

/// The reasoning and embedding services shared by every agent.
#[derive(Clone)]
pub struct Services {
    /// Completions, already wrapped with retries and a breaker.
    pub reasoner: Arc<dyn Reasoner>,
    /// Text embeddings for memory.
    pub embedder: Arc<dyn Embedder>,
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services")
            .field("reasoner", &self.reasoner.name())
            .field("embedding_dimensions", &self.embedder.dimensions())
            .finish()
    }
}

/// A town ready to be scheduled.
#[derive(Debug)]
pub struct Town {
    /// Registry, conversations, and services.
    pub context: BehaviorContext,
    /// Minute of the day the first tick runs at.
    pub start_minute: u32,
}

/// Build the services named by the environment.
pub async fn build_services(config: &SimulationConfig) -> Result<Services, EngineError> {
    let client = reqwest::Client::new();

    let llm = LlmBackendConfig::from_env()?;
    let backend = create_backend(client.clone(), &llm);
    info!(
        backend = backend.name(),
        model = %llm.model,
        api_url = %llm.api_url,
        "reasoning backend configured"
    );

    let system_prompt = match &config.paths.system_prompt {
        Some(path) => read(path).await?,
        None => DEFAULT_SYSTEM_PROMPT.to_owned(),
    };
    let session = SessionReasoner::new(backend, system_prompt, config.llm.max_history_messages);
    let reasoner: Arc<dyn Reasoner> = Arc::new(ResilientReasoner::new(
        Arc::new(session),
        config.llm.retry_policy(),
    ));

    let embedding = EmbeddingConfig::from_env()?;
    let embedder: Arc<dyn Embedder> = match embedding.backend_type {
        EmbeddingBackendType::Http => {
            info!(model = %embedding.model, api_url = %embedding.api_url, "embedding backend configured");
            Arc::new(HttpEmbedder::new(client, &embedding))
        }
        EmbeddingBackendType::Hashing => {
            let dimensions = embedding.hashing_dimensions();
            info!(dimensions, "using offline hashing embedder");
            Arc::new(HashingEmbedder::new(dimensions))
        }
    };

    Ok(Services { reasoner, embedder })
}

/// Load every configured agent and assemble the shared context.
pub async fn assemble(
    config: &SimulationConfig,
    services: &Services,
    embodiment: Arc<dyn Embodiment>,
) -> Result<Town, EngineError> {
    let prompts = Arc::new(PromptEngine::new(config.paths.templates_dir.as_deref())?);
    let settings = BehaviorSettings::from_config(config);
    let planner = Planner::new(
        Arc::clone(&services.reasoner),
        Arc::clone(&prompts),
        settings.sampling,
    );

    let mut registry = AgentRegistry::new();
    let mut schedules: Vec<DailySchedule> = Vec::with_capacity(config.agents.len());
    for (index, agent_config) in (0_u64..).zip(&config.agents) {
        let seed = config.world.seed.wrapping_add(index);
        let agent = load_agent(config, agent_config, seed, services, &planner).await?;
        schedules.push(agent.schedule().clone());
        registry.register(agent)?;
        embodiment.on_lifecycle(&agent_config.name, LifecycleSignal::Spawned);
    }

    let start_minute = config.world.start_minute.unwrap_or_else(|| {
        clock::start_minute(&schedules, config.world.wake_offset_minutes)
    });
    info!(
        agents = registry.len(),
        start = %clock::label(start_minute),
        "town assembled"
    );

    Ok(Town {
        context: BehaviorContext {
            registry,
            conversations: ConversationManager::new(),
            reasoner: Arc::clone(&services.reasoner),
            embodiment,
            prompts,
            planner,
            world: config.world_map.clone(),
            settings,
        },
        start_minute,
    })
}

async fn load_agent(
    config: &SimulationConfig,
    agent: &AgentConfig,
    seed: u64,
    services: &Services,
    planner: &Planner,
) -> Result<Agent, EngineError> {
    let persona = read(&agent.persona_path).await?;

    let schedule_path = config.paths.schedule_file(&agent.name);
    let schedule = if tokio::fs::try_exists(&schedule_path).await.unwrap_or(false) {
        schedule::load_schedule(&schedule_path).await?
    } else {
        info!(agent = %agent.name, path = %schedule_path.display(), "no schedule file, planning a day");
        let planned = planner.regenerate(&agent.name, &persona).await?;
        schedule::save_schedule(&schedule_path, &planned).await?;
        planned
    };

    let memory = MemoryStore::open(
        agent.name.clone(),
        &config.paths.memory_dir,
        Arc::clone(&services.reasoner),
        Arc::clone(&services.embedder),
        config.memory.store_config(),
    )
    .await?;
    info!(
        agent = %agent.name,
        memories = memory.len(),
        wake_up = %clock::label(schedule.wake_up_minute()),
        "agent loaded"
    );

    Ok(Agent::new(agent.name.clone(), persona, schedule, memory, seed).with_schedule_path(schedule_path))
}

async fn read(path: &Path) -> Result<String, EngineError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        })
}
