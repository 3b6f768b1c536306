//! Memory nodes: deduplicated, importance-scored facts owned by one agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single long-term memory of one agent.
///
/// Created by the memory store on insert and never mutated afterwards.
/// Deduplication prevents creation; it never merges nodes after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    /// Monotonic per-agent identifier, starting at 1.
    pub id: u64,
    /// Subject of the remembered fact.
    pub subject: String,
    /// Predicate of the remembered fact.
    pub predicate: String,
    /// Object of the remembered fact.
    pub object: String,
    /// Importance on a 1-10 scale (0 when the rating could not be parsed).
    pub importance: f32,
    /// Retrieval keywords: the trimmed subject and object.
    pub keywords: Vec<String>,
    /// The remembered content in natural language.
    pub description: String,
    /// Unit-length embedding of [`description`](Self::description).
    pub embedding: Vec<f32>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
}

impl MemoryNode {
    /// Derive the keyword list for a (subject, object) pair.
    pub fn keywords_for(subject: &str, object: &str) -> Vec<String> {
        vec![subject.trim().to_owned(), object.trim().to_owned()]
    }
}
