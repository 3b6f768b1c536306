//! Explicit directory of the agents taking part in a run.
//!
//! The registry is built once, before the scheduler starts, and never
//! changes afterwards. Iteration follows registration order, which is also
//! the order events are published in.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::Agent;

/// Shared, exclusively lockable agent.
pub type AgentHandle = Arc<Mutex<Agent>>;

/// Errors from building a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two agents share a name.
    #[error("agent {name} is already registered")]
    Duplicate {
        /// The repeated name.
        name: String,
    },
}

/// Every agent of a run, addressable by name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<(String, AgentHandle)>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `agent` under its own name.
    pub fn register(&mut self, agent: Agent) -> Result<AgentHandle, RegistryError> {
        let name = agent.name().to_owned();
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        let handle = Arc::new(Mutex::new(agent));
        self.index.insert(name.clone(), self.agents.len());
        self.agents.push((name, Arc::clone(&handle)));
        Ok(handle)
    }

    /// The agent called `name`.
    pub fn get(&self, name: &str) -> Option<&AgentHandle> {
        self.index
            .get(name)
            .and_then(|&i| self.agents.get(i))
            .map(|(_, handle)| handle)
    }

    /// Whether an agent called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Agent names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|(name, _)| name.as_str())
    }

    /// `(name, handle)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentHandle)> {
        self.agents.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
