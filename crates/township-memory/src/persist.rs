//! The per-agent memory document and its atomic rewrite.
//!
//! Layout:
//!
//! ```json
//! {"nodes": {"node_1": {"node_id": "node_1", "subject": "Ada", "predicate": "brew",
//!   "object": "coffee", "poignancy": 3.0, "keywords": ["Ada", "coffee"],
//!   "description": "brewing coffee", "embedding": [0.1, ...],
//!   "created_at": "2026-01-01T08:00:00Z"}}}
//! ```
//!
//! `embedding` and `created_at` may be absent in files written by older
//! versions; the store migrates such nodes on load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use township_types::MemoryNode;

use crate::error::MemoryError;

/// Prefix of every node key in the document.
const NODE_PREFIX: &str = "node_";

/// The whole persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Nodes keyed by `node_{id}`.
    #[serde(default)]
    pub nodes: BTreeMap<String, StoredNode>,
}

/// One node as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNode {
    /// `node_{id}`, duplicated from the map key.
    #[serde(default)]
    pub node_id: String,
    /// Subject of the fact.
    pub subject: String,
    /// Predicate of the fact.
    pub predicate: String,
    /// Object of the fact.
    pub object: String,
    /// Importance rating.
    #[serde(default)]
    pub poignancy: f32,
    /// Retrieval keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// The remembered content.
    pub description: String,
    /// Unit-length embedding; missing in legacy files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Creation time; missing in legacy files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Format the document key of a node id.
pub fn node_key(id: u64) -> String {
    format!("{NODE_PREFIX}{id}")
}

/// Parse the numeric id out of a `node_{id}` key.
pub fn parse_node_key(key: &str) -> Option<u64> {
    key.strip_prefix(NODE_PREFIX)?.parse().ok()
}

impl MemoryDocument {
    /// Build a document from nodes in memory.
    pub fn from_nodes(nodes: &[MemoryNode]) -> Self {
        let nodes = nodes
            .iter()
            .map(|node| {
                let key = node_key(node.id);
                let stored = StoredNode {
                    node_id: key.clone(),
                    subject: node.subject.clone(),
                    predicate: node.predicate.clone(),
                    object: node.object.clone(),
                    poignancy: node.importance,
                    keywords: node.keywords.clone(),
                    description: node.description.clone(),
                    embedding: Some(node.embedding.clone()),
                    created_at: Some(node.created_at),
                };
                (key, stored)
            })
            .collect();
        Self { nodes }
    }

    /// Nodes sorted by numeric id, i.e. in original insertion order.
    pub fn into_ordered(self, path: &Path) -> Result<Vec<(u64, StoredNode)>, MemoryError> {
        let mut ordered = self
            .nodes
            .into_iter()
            .map(|(key, node)| {
                parse_node_key(&key)
                    .map(|id| (id, node))
                    .ok_or_else(|| MemoryError::Corrupt {
                        path: path.to_path_buf(),
                        reason: format!("node key `{key}` is not of the form node_<id>"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ordered.sort_by_key(|(id, _)| *id);
        Ok(ordered)
    }
}

/// Read the document at `path`, or `None` when the file does not exist.
pub async fn read(path: &Path) -> Result<Option<MemoryDocument>, MemoryError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MemoryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| MemoryError::Serde {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace the document at `path` with `document`.
///
/// Writes a sibling temporary file and renames it over the target so a
/// crash mid-write never leaves a truncated document behind.
pub async fn write(path: &Path, document: &MemoryDocument) -> Result<(), MemoryError> {
    let json = serde_json::to_vec_pretty(document).map_err(|source| MemoryError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| MemoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|source| MemoryError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| MemoryError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
