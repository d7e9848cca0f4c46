//! In-memory backend: for development and tests.
//!
//! Ranking is plain keyword overlap: the share of query terms that appear in
//! a record. Good enough to exercise the retrieval path without a vector store.

use async_trait::async_trait;
use chrono::Utc;
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
use concierge_core::message::{Message, Role};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "do", "for", "i", "in", "is", "it", "me", "my", "of", "on",
    "or", "the", "to", "was", "what", "with", "you",
];

/// Process-local memory store, scoped per user.
pub struct InMemoryBackend {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn matches_filters(record: &MemoryRecord, filters: &serde_json::Map<String, serde_json::Value>) -> bool {
    filters
        .iter()
        .all(|(key, expected)| record.metadata.get(key) == Some(expected))
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let wanted = terms(&query.text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut hits: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| r.user_id == query.user_id && matches_filters(r, &query.filters))
            .filter_map(|r| {
                let have = terms(&r.content);
                let overlap = wanted.intersection(&have).count();
                (overlap > 0).then(|| {
                    let mut hit = r.clone();
                    hit.score = overlap as f32 / wanted.len() as f32;
                    hit
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn add(
        &self,
        messages: &[Message],
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, MemoryError> {
        if user_id.is_empty() {
            return Err(MemoryError::InvalidRequest("user_id is required".into()));
        }

        let mut records = self.records.write().await;
        let mut ids = Vec::new();
        for msg in messages {
            if !matches!(msg.role, Role::User | Role::Assistant) || msg.content.trim().is_empty() {
                continue;
            }
            let mut meta = metadata.clone();
            meta.insert("role".into(), serde_json::json!(msg.role.as_str()));
            let record = MemoryRecord {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                content: msg.content.trim().to_string(),
                metadata: meta,
                created_at: Utc::now(),
                score: 0.0,
            };
            ids.push(record.id.clone());
            records.push(record);
        }
        Ok(ids)
    }

    async fn get_all(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, memory_id: &str, content: &str) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == memory_id)
            .ok_or_else(|| MemoryError::NotFound(memory_id.to_string()))?;
        record.content = content.to_string();
        Ok(())
    }

    async fn delete(&self, memory_id: &str) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != memory_id);
        if records.len() == before {
            return Err(MemoryError::NotFound(memory_id.to_string()));
        }
        Ok(())
    }
}
