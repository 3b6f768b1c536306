//! The per-agent memory store: scoring, embedding, dedup, persistence.
//!
//! Every successful insert rewrites the agent's whole memory document
//! before returning, so the file on disk always mirrors the repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use township_types::{Embedder, MemoryNode, Reasoner, SamplingParams, SessionKey};
use tracing::{debug, info, warn};

use crate::error::MemoryError;
use crate::persist::{self, MemoryDocument};
use crate::repository::MemoryRepository;
use crate::vector;

/// Tuning knobs for a memory store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryConfig {
    /// Cosine similarity at or above which a new memory counts as a
    /// duplicate of an existing one.
    pub similarity_threshold: f32,
    /// Number of hits [`MemoryStore::search`] returns.
    pub top_k: usize,
}

impl MemoryConfig {
    /// Default duplicate threshold.
    pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;
    /// Default number of search hits.
    pub const DEFAULT_TOP_K: usize = 10;
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Self::DEFAULT_SIMILARITY_THRESHOLD,
            top_k: Self::DEFAULT_TOP_K,
        }
    }
}

/// Result of [`MemoryStore::store`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreOutcome {
    /// A new node was created and persisted.
    Inserted {
        /// The new node's id.
        id: u64,
        /// Its importance rating.
        importance: f32,
    },
    /// An existing node was similar enough; nothing was stored.
    Duplicate {
        /// The most similar existing node.
        existing: u64,
        /// Its similarity to the rejected content.
        similarity: f32,
    },
}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    /// The matching node.
    pub node: MemoryNode,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

impl MemoryHit {
    /// One prompt line: `- January 01, 2026, 08:00 AM: description`.
    pub fn render(&self) -> String {
        format!(
            "- {}: {}",
            self.node.created_at.format("%B %d, %Y, %I:%M %p"),
            self.node.description.trim()
        )
    }
}

/// Render hits for a prompt, one per line, skipping repeated descriptions.
pub fn render_hits(hits: &[MemoryHit]) -> String {
    let mut seen = std::collections::HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.node.description.trim()))
        .map(MemoryHit::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Long-term memory of a single agent.
pub struct MemoryStore {
    owner: String,
    path: PathBuf,
    repository: MemoryRepository,
    reasoner: Arc<dyn Reasoner>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl core::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("owner", &self.owner)
            .field("path", &self.path)
            .field("nodes", &self.repository.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open the store of `owner`, backed by `{dir}/{owner}.json`.
    ///
    /// A missing file yields an empty store. Nodes lacking an embedding, or
    /// whose embedding does not match the embedder's dimensionality, are
    /// re-embedded from their description and the file is rewritten. The
    /// id counter resumes after the largest stored id.
    pub async fn open(
        owner: impl Into<String>,
        dir: &Path,
        reasoner: Arc<dyn Reasoner>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        let owner = owner.into();
        let path = dir.join(format!("{owner}.json"));
        let mut store = Self {
            owner,
            path,
            repository: MemoryRepository::new(),
            reasoner,
            embedder,
            config,
        };

        let Some(document) = persist::read(&store.path).await? else {
            info!(agent = %store.owner, path = %store.path.display(), "no memory file yet, starting empty");
            return Ok(store);
        };

        let expected_dims = store.embedder.dimensions();
        let mut migrated: usize = 0;
        for (id, stored) in document.into_ordered(&store.path)? {
            let embedding = match stored.embedding {
                Some(mut embedding)
                    if !embedding.is_empty()
                        && (expected_dims == 0 || embedding.len() == expected_dims) =>
                {
                    vector::normalize(&mut embedding);
                    embedding
                }
                _ => {
                    migrated = migrated.saturating_add(1);
                    store.embed(&stored.description).await?
                }
            };
            let node = MemoryNode {
                id,
                keywords: if stored.keywords.is_empty() {
                    MemoryNode::keywords_for(&stored.subject, &stored.object)
                } else {
                    stored.keywords
                },
                subject: stored.subject,
                predicate: stored.predicate,
                object: stored.object,
                importance: stored.poignancy,
                description: stored.description,
                embedding,
                created_at: stored.created_at.unwrap_or_else(Utc::now),
            };
            store.repository.restore(node)?;
        }

        if migrated > 0 {
            store.persist().await?;
        }
        info!(
            agent = %store.owner,
            nodes = store.repository.len(),
            migrated,
            next_id = store.repository.next_id(),
            "memory loaded"
        );
        Ok(store)
    }

    /// The agent this store belongs to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.repository.len()
    }

    /// Whether no node is stored.
    pub fn is_empty(&self) -> bool {
        self.repository.is_empty()
    }

    /// Stored nodes in insertion order.
    pub fn nodes(&self) -> &[MemoryNode] {
        self.repository.nodes()
    }

    /// Remember `content` as the fact `(subject, predicate, object)`.
    ///
    /// The reasoning service first rates the content's importance (0 when
    /// no integer can be read from the reply). The content is then
    /// embedded; when an existing node is at least `similarity_threshold`
    /// similar the insert is rejected as a duplicate without error.
    /// Otherwise the node is appended and the document is rewritten.
    pub async fn store(
        &mut self,
        content: &str,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<StoreOutcome, MemoryError> {
        let importance = self.score_importance(content).await;
        let embedding = self.embed(content).await?;

        if let Some(nearest) = self.repository.nearest(&embedding)?
            && nearest.similarity >= self.config.similarity_threshold
        {
            debug!(
                agent = %self.owner,
                existing = nearest.id,
                similarity = nearest.similarity,
                content,
                "similar memory exists, skipping"
            );
            return Ok(StoreOutcome::Duplicate {
                existing: nearest.id,
                similarity: nearest.similarity,
            });
        }

        let node = MemoryNode {
            id: 0,
            subject: subject.to_owned(),
            predicate: predicate.to_owned(),
            object: object.to_owned(),
            importance,
            keywords: MemoryNode::keywords_for(subject, object),
            description: content.to_owned(),
            embedding,
            created_at: Utc::now(),
        };
        let id = self.repository.insert(node)?;
        self.persist().await?;
        debug!(agent = %self.owner, id, importance, content, "memory stored");
        Ok(StoreOutcome::Inserted { id, importance })
    }

    /// The `top_k` (from config) nodes most similar to `query`.
    pub async fn search(&self, query: &str) -> Result<Vec<MemoryHit>, MemoryError> {
        self.search_top(query, self.config.top_k).await
    }

    /// The `top_k` nodes most similar to `query`, most similar first.
    ///
    /// Ties keep insertion order. No similarity floor is applied.
    pub async fn search_top(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        if self.repository.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query).await?;
        let ranked = self.repository.rank(&embedding, top_k)?;
        let nodes = self.repository.nodes();
        Ok(ranked
            .into_iter()
            .filter_map(|(index, similarity)| {
                nodes.get(index).map(|node| MemoryHit {
                    node: node.clone(),
                    similarity,
                })
            })
            .collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut embedding = self.embedder.embed(text).await?;
        vector::normalize(&mut embedding);
        Ok(embedding)
    }

    async fn score_importance(&self, content: &str) -> f32 {
        let prompt = format!(
            "On the scale of 1 to 10, where 1 is not important at all (e.g., brushing teeth) \
             and 10 is extremely important (e.g., a break up), rate the importance of the \
             following memory. Reply with a single integer.\nMemory: {content}\nRating: "
        );
        match self
            .reasoner
            .complete(&SessionKey::shared(), &prompt, SamplingParams::default())
            .await
        {
            Ok(reply) => parse_rating(&reply),
            Err(e) => {
                warn!(agent = %self.owner, error = %e, "importance rating failed, using 0");
                0.0
            }
        }
    }

    async fn persist(&self) -> Result<(), MemoryError> {
        let document = MemoryDocument::from_nodes(self.repository.nodes());
        persist::write(&self.path, &document).await
    }
}

/// The first integer in `reply`, or 0 when there is none.
fn parse_rating(reply: &str) -> f32 {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<u16>().map_or(0.0, f32::from)
}
