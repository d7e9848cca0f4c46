//! Long-term memory for Concierge.
//!
//! [`MemoryService`] wraps any [`MemoryBackend`](concierge_core::MemoryBackend)
//! with bounded retry and graceful degradation. Backends: an in-process index
//! for development, a networked vector store for production, and a no-op.

pub mod in_memory;
pub mod noop;
pub mod remote;
pub mod resilient;
pub mod service;

pub use in_memory::InMemoryBackend;
pub use noop::NoopMemory;
pub use remote::RemoteMemoryBackend;
pub use resilient::{Disposition, Outcome, RetryPolicy, resilient_call};
pub use service::{MemoryService, MemoryServiceError};

use concierge_config::{MemoryBackendKind, MemoryConfig};
use concierge_core::MemoryBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the memory service described by configuration.
///
/// A remote backend that cannot be constructed falls back to no memory.
pub fn build_from_config(config: &MemoryConfig) -> MemoryService {
    let backend: Arc<dyn MemoryBackend> = match config.backend {
        MemoryBackendKind::InMemory => Arc::new(InMemoryBackend::new()),
        MemoryBackendKind::None => Arc::new(NoopMemory),
        MemoryBackendKind::Remote => {
            let url = config.url.as_deref().unwrap_or_default();
            match RemoteMemoryBackend::new(
                url,
                config.api_key.clone(),
                Duration::from_secs(config.request_timeout_secs),
            ) {
                Ok(remote) => Arc::new(remote),
                Err(e) => {
                    warn!(error = %e, "Remote memory misconfigured, memory disabled");
                    Arc::new(NoopMemory)
                }
            }
        }
    };
    info!(backend = backend.name(), max_attempts = config.max_attempts, "Memory service ready");
    MemoryService::new(backend).with_policy(RetryPolicy::from_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_backend_kind() {
        let mut config = MemoryConfig::default();
        assert_eq!(build_from_config(&config).backend_name(), "in_memory");

        config.backend = MemoryBackendKind::None;
        assert_eq!(build_from_config(&config).backend_name(), "none");

        config.backend = MemoryBackendKind::Remote;
        config.url = Some("http://localhost:8888".into());
        config.max_attempts = 2;
        let service = build_from_config(&config);
        assert_eq!(service.backend_name(), "remote");
        assert_eq!(service.policy().max_attempts, 2);

        config.url = Some("not a url".into());
        assert_eq!(build_from_config(&config).backend_name(), "none");
    }
}
