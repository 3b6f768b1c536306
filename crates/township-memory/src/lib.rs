//! Per-agent long-term memory for the Township simulation kernel.
//!
//! Each agent owns one [`MemoryStore`]. Storing a memory asks the reasoning
//! service for an importance rating, embeds the content, and rejects it when
//! an existing memory is already similar enough. Retrieval ranks every node
//! by cosine similarity to the embedded query.
//!
//! # Modules
//!
//! - [`repository`] -- In-memory nodes plus the dense embedding matrix
//! - [`store`] -- Scoring, embedding, persistence, and legacy migration
//! - [`persist`] -- The on-disk JSON document and atomic rewrites
//! - [`vector`] -- Normalization and cosine similarity
//! - [`hashing`] -- Offline feature-hashing embedder
//! - [`error`] -- Error type
//!
//! Search is a linear scan over the matrix. That is fine for the few
//! thousand nodes an agent accumulates in a run; an approximate
//! nearest-neighbor index can replace [`repository::MemoryRepository::rank`]
//! without touching callers if stores grow much larger.

pub mod error;
pub mod hashing;
pub mod persist;
pub mod repository;
pub mod store;
pub mod vector;

pub use error::MemoryError;
pub use hashing::HashingEmbedder;
pub use repository::MemoryRepository;
pub use store::{MemoryConfig, MemoryHit, MemoryStore, StoreOutcome, render_hits};
