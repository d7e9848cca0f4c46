//! The memory service used by the context assembler and the memory tools.
//!
//! Every call goes through [`resilient_call`]. The `safe_*` variants turn any
//! failure into `None` so a turn can continue without memory.

use std::sync::Arc;
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
use concierge_core::message::Message;
use tracing::{debug, warn};

use crate::resilient::{Disposition, Outcome, RetryPolicy, resilient_call};

/// How each backend error is treated.
pub fn classify(error: &MemoryError) -> Disposition {
    match error {
        MemoryError::Unreachable(_) => Disposition::Skip,
        MemoryError::Transient(_) | MemoryError::Storage(_) => Disposition::Retry,
        MemoryError::NotFound(_) | MemoryError::InvalidRequest(_) => Disposition::Fatal,
    }
}

/// A failed memory operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryServiceError {
    /// The backend was unreachable or kept failing; memory is degraded.
    #[error("memory unavailable during {operation} after {attempts} attempt(s): {source}")]
    Unavailable {
        operation: &'static str,
        attempts: u32,
        source: MemoryError,
    },

    /// The request itself was rejected.
    #[error("memory {operation} failed: {source}")]
    Rejected {
        operation: &'static str,
        source: MemoryError,
    },
}

impl MemoryServiceError {
    fn from_outcome(operation: &'static str, outcome: Outcome<MemoryError>) -> Self {
        let attempts = outcome.attempts();
        if outcome.is_degraded() {
            MemoryServiceError::Unavailable {
                operation,
                attempts,
                source: outcome.into_error(),
            }
        } else {
            MemoryServiceError::Rejected {
                operation,
                source: outcome.into_error(),
            }
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, MemoryServiceError::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MemoryServiceError::Rejected {
                source: MemoryError::NotFound(_),
                ..
            }
        )
    }
}

/// Backend-agnostic, failure-tolerant access to long-term memory.
#[derive(Clone)]
pub struct MemoryService {
    backend: Arc<dyn MemoryBackend>,
    policy: RetryPolicy,
}

impl MemoryService {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryServiceError> {
        let backend = &self.backend;
        resilient_call(&self.policy, "memory.search", classify, move || backend.search(query.clone()))
            .await
            .map_err(|o| MemoryServiceError::from_outcome("search", o))
    }

    pub async fn add(
        &self,
        messages: &[Message],
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, MemoryServiceError> {
        let backend = &self.backend;
        resilient_call(&self.policy, "memory.add", classify, move || {
            backend.add(messages, user_id, metadata.clone())
        })
        .await
        .map_err(|o| MemoryServiceError::from_outcome("add", o))
    }

    pub async fn get_all(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryServiceError> {
        let backend = &self.backend;
        resilient_call(&self.policy, "memory.get_all", classify, move || backend.get_all(user_id, limit))
            .await
            .map_err(|o| MemoryServiceError::from_outcome("get_all", o))
    }

    pub async fn update(&self, memory_id: &str, content: &str) -> Result<(), MemoryServiceError> {
        let backend = &self.backend;
        resilient_call(&self.policy, "memory.update", classify, move || backend.update(memory_id, content))
            .await
            .map_err(|o| MemoryServiceError::from_outcome("update", o))
    }

    pub async fn delete(&self, memory_id: &str) -> Result<(), MemoryServiceError> {
        let backend = &self.backend;
        resilient_call(&self.policy, "memory.delete", classify, move || backend.delete(memory_id))
            .await
            .map_err(|o| MemoryServiceError::from_outcome("delete", o))
    }

    /// Search that never fails: `None` means "no memory available".
    pub async fn safe_search(&self, text: &str, user_id: &str, limit: usize) -> Option<Vec<MemoryRecord>> {
        let query = MemoryQuery::new(text, user_id).with_limit(limit);
        match self.search(query).await {
            Ok(records) => {
                debug!(user_id, hits = records.len(), "Memory search complete");
                Some(records)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Memory search failed, continuing without memory");
                None
            }
        }
    }

    /// Ingest that never fails: `None` means nothing was stored.
    pub async fn safe_add(
        &self,
        messages: &[Message],
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Option<Vec<String>> {
        match self.add(messages, user_id, metadata).await {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!(user_id, error = %e, "Memory ingestion failed");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted search results; counts every backend call.
    pub(crate) struct ScriptedBackend {
        pub script: Mutex<VecDeque<Result<Vec<MemoryRecord>, MemoryError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Result<Vec<MemoryRecord>, MemoryError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn next(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl MemoryBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn search(&self, _query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
            self.next()
        }
        async fn add(
            &self,
            _messages: &[Message],
            _user_id: &str,
            _metadata: serde_json::Map<String, serde_json::Value>,
        ) -> Result<Vec<String>, MemoryError> {
            self.next().map(|r| r.into_iter().map(|m| m.id).collect())
        }
        async fn get_all(&self, _user_id: &str, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
            self.next()
        }
        async fn update(&self, _memory_id: &str, _content: &str) -> Result<(), MemoryError> {
            self.next().map(|_| ())
        }
        async fn delete(&self, _memory_id: &str) -> Result<(), MemoryError> {
            self.next().map(|_| ())
        }
    }

    fn record(content: &str) -> MemoryRecord {
        MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "alice".into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            created_at: chrono::Utc::now(),
            score: 1.0,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connection_refused_degrades_to_none() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(MemoryError::Unreachable("connection refused".into())),
            Err(MemoryError::Unreachable("connection refused".into())),
            Err(MemoryError::Unreachable("connection refused".into())),
        ]));
        let service = MemoryService::new(backend.clone()).with_policy(fast_policy());

        assert!(service.safe_search("dentist", "alice", 5).await.is_none());
        let calls = backend.calls.load(Ordering::SeqCst);
        assert!((1..=3).contains(&calls));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_the_cap() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(MemoryError::Transient("503".into())),
            Err(MemoryError::Transient("503".into())),
            Err(MemoryError::Transient("503".into())),
            Ok(vec![record("never reached")]),
        ]));
        let service = MemoryService::new(backend.clone()).with_policy(fast_policy());

        let err = service.search(MemoryQuery::new("x", "alice")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(MemoryError::Transient("timeout".into())),
            Ok(vec![record("Prefers window seats")]),
        ]));
        let service = MemoryService::new(backend.clone()).with_policy(fast_policy());

        let hits = service.safe_search("flight", "alice", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_rejected_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(MemoryError::NotFound("mem_9".into()))]));
        let service = MemoryService::new(backend.clone());

        let err = service.delete("mem_9").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_unavailable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn safe_add_swallows_failures() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(MemoryError::Unreachable("dns".into()))]));
        let service = MemoryService::new(backend);
        assert!(service.safe_add(&[Message::user("hi")], "alice", Default::default()).await.is_none());
    }
}
