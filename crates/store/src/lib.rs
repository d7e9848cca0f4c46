//! Persistence for Concierge: users, linked provider accounts, conversation
//! threads and agent checkpoints.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use concierge_config::DatabaseConfig;
use concierge_core::credential::AccountStore;
use concierge_core::error::StoreError;
use concierge_core::thread::{Checkpointer, ThreadStore};
use concierge_core::user::UserDirectory;
use std::sync::Arc;

/// Trait-object handles onto one backing store.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub accounts: Arc<dyn AccountStore>,
    pub threads: Arc<dyn ThreadStore>,
    pub checkpoints: Arc<dyn Checkpointer>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: UserDirectory + AccountStore + ThreadStore + Checkpointer + 'static,
    {
        Self {
            users: backend.clone(),
            accounts: backend.clone(),
            threads: backend.clone(),
            checkpoints: backend,
        }
    }

    /// Volatile stores, for tests and `--ephemeral` runs.
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryStore::new()))
    }
}

/// Open the configured SQLite database.
pub async fn open(config: &DatabaseConfig) -> Result<Stores, StoreError> {
    let store = SqliteStore::new(&config.url, config.max_connections).await?;
    Ok(Stores::from_backend(Arc::new(store)))
}
