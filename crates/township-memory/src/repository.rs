//! In-memory node storage with a dense embedding matrix.
//!
//! The repository is purely synchronous: it knows nothing about scoring,
//! embedding services, or files. [`MemoryStore`](crate::MemoryStore) wraps
//! it with those concerns.

use township_types::MemoryNode;

use crate::error::MemoryError;
use crate::vector;

/// All memory nodes of one agent plus their embeddings, row by row in
/// insertion order.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    nodes: Vec<MemoryNode>,
    /// Row-major matrix; row `i` is the embedding of `nodes[i]`.
    matrix: Vec<f32>,
    dimensions: usize,
    next_id: u64,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// The most similar existing node for a candidate embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestMatch {
    /// Id of the most similar node.
    pub id: u64,
    /// Cosine similarity to it.
    pub similarity: f32,
}

impl MemoryRepository {
    /// Create an empty repository whose first id will be 1.
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            matrix: Vec::new(),
            dimensions: 0,
            next_id: 1,
        }
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stored nodes in insertion order.
    pub fn nodes(&self) -> &[MemoryNode] {
        &self.nodes
    }

    /// The id the next inserted node will receive.
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Embedding dimensionality, or 0 while empty.
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Find the stored node most similar to `embedding`.
    ///
    /// Returns `None` when the repository is empty.
    pub fn nearest(&self, embedding: &[f32]) -> Result<Option<NearestMatch>, MemoryError> {
        self.check_dimensions(embedding)?;
        let best = self
            .similarities(embedding)
            .zip(&self.nodes)
            .map(|(similarity, node)| NearestMatch {
                id: node.id,
                similarity,
            })
            .reduce(|best, candidate| {
                if candidate.similarity > best.similarity {
                    candidate
                } else {
                    best
                }
            });
        Ok(best)
    }

    /// Append a node, assigning it the next id.
    ///
    /// The node's `id` field is overwritten. The embedding must already be
    /// unit length.
    pub fn insert(&mut self, mut node: MemoryNode) -> Result<u64, MemoryError> {
        self.check_dimensions(&node.embedding)?;
        let id = self.next_id;
        node.id = id;
        self.push_row(node);
        self.next_id = id.saturating_add(1);
        Ok(id)
    }

    /// Append a node loaded from storage, keeping its id.
    ///
    /// The id counter is advanced past it so later inserts never reuse an
    /// id, whatever order nodes are restored in.
    pub fn restore(&mut self, node: MemoryNode) -> Result<(), MemoryError> {
        self.check_dimensions(&node.embedding)?;
        self.next_id = self.next_id.max(node.id.saturating_add(1));
        self.push_row(node);
        Ok(())
    }

    /// Rank every node by similarity to `query`, most similar first.
    ///
    /// Equal similarities keep insertion order. At most `top_k` entries
    /// are returned as `(index into nodes(), similarity)`.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>, MemoryError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimensions(query)?;
        let mut scored: Vec<(usize, f32)> = self.similarities(query).enumerate().collect();
        // `sort_by` is stable, which keeps ties in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn similarities<'a>(&'a self, query: &'a [f32]) -> impl Iterator<Item = f32> + 'a {
        self.matrix
            .chunks_exact(self.dimensions.max(1))
            .map(move |row| vector::dot(row, query))
    }

    fn push_row(&mut self, node: MemoryNode) {
        if self.nodes.is_empty() {
            self.dimensions = node.embedding.len();
        }
        self.matrix.extend_from_slice(&node.embedding);
        self.nodes.push(node);
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<(), MemoryError> {
        if !self.nodes.is_empty() && embedding.len() != self.dimensions {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimensions,
                found: embedding.len(),
            });
        }
        Ok(())
    }
}
