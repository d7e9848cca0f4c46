//! Memory trait: per-user long-term semantic memory.
//!
//! Memory records live in a store of their own, keyed by user id but with no
//! referential link to threads or accounts. Retrieval is similarity-ranked;
//! records have no inherent order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;
use crate::message::Message;

/// A single stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Backend-assigned ID
    pub id: String,

    /// Owner of the memory
    pub user_id: String,

    /// The remembered text
    pub content: String,

    /// Free-form metadata (source, category, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

/// A similarity search over one user's memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text
    pub text: String,

    /// Whose memories to search
    pub user_id: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Metadata equality filters
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub filters: serde_json::Map<String, serde_json::Value>,
}

pub fn default_limit() -> usize {
    5
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            limit: default_limit(),
            filters: serde_json::Map::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filters(mut self, filters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.filters = filters;
        self
    }
}

/// The backend contract shared by the in-memory index and the networked store.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "in_memory", "remote", "none").
    fn name(&self) -> &str;

    /// Ranked search within one user's memories.
    async fn search(&self, query: MemoryQuery) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Ingest conversation messages (or a single explicit fact) for a user.
    /// Returns the IDs of the records created.
    async fn add(
        &self,
        messages: &[Message],
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<Vec<String>, MemoryError>;

    /// All memories of a user, newest first.
    async fn get_all(&self, user_id: &str, limit: usize) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Replace a memory's content.
    async fn update(&self, memory_id: &str, content: &str) -> std::result::Result<(), MemoryError>;

    /// Delete a memory.
    async fn delete(&self, memory_id: &str) -> std::result::Result<(), MemoryError>;
}
