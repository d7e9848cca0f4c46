//! No-op memory backend: memory disabled.

use async_trait::async_trait;
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
use concierge_core::message::Message;

/// Stores nothing, finds nothing.
pub struct NoopMemory;

#[async_trait]
impl MemoryBackend for NoopMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(Vec::new())
    }

    async fn add(
        &self,
        _messages: &[Message],
        _user_id: &str,
        _metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }

    async fn get_all(&self, _user_id: &str, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(Vec::new())
    }

    async fn update(&self, memory_id: &str, _content: &str) -> Result<(), MemoryError> {
        Err(MemoryError::NotFound(memory_id.to_string()))
    }

    async fn delete(&self, memory_id: &str) -> Result<(), MemoryError> {
        Err(MemoryError::NotFound(memory_id.to_string()))
    }
}
