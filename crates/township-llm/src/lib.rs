//! HTTP reasoning and embedding backends for the Township simulation kernel.
//!
//! The kernel talks to language models only through the
//! [`township_types::Reasoner`] and [`township_types::Embedder`] traits.
//! This crate provides the production implementations: a
//! [`SessionReasoner`] that keeps per-session chat history over an
//! OpenAI-compatible or Anthropic backend, and an [`HttpEmbedder`].
//!
//! # Modules
//!
//! - [`config`] -- Connection settings from environment variables
//! - [`backend`] -- Chat completion backends (enum dispatch)
//! - [`reasoner`] -- Session history and reply cleaning
//! - [`embedder`] -- `/embeddings` client
//! - [`error`] -- Error type, convertible into [`township_types::ServiceError`]

pub mod backend;
pub mod config;
pub mod embedder;
pub mod error;
pub mod reasoner;

pub use backend::{ChatMessage, LlmBackend, create_backend};
pub use config::{BackendType, EmbeddingBackendType, EmbeddingConfig, LlmBackendConfig};
pub use embedder::HttpEmbedder;
pub use error::LlmError;
pub use reasoner::{SessionReasoner, clean_completion};
