//! Process-local store with the same contract as [`SqliteStore`](crate::SqliteStore).

use async_trait::async_trait;
use concierge_core::credential::{AccountStore, ProviderAccount, ProviderKind};
use concierge_core::error::StoreError;
use concierge_core::thread::{Checkpoint, Checkpointer, ThreadStore};
use concierge_core::user::{User, UserDirectory};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    accounts: RwLock<HashMap<(String, ProviderKind), ProviderAccount>>,
    threads: RwLock<HashMap<String, String>>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_by_phone(&self, phone_number: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.verified_phone() == Some(phone_number))
            .cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.users.write().await.insert(user.id.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn get_account(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<ProviderAccount>, StoreError> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&(user_id.to_string(), provider))
            .cloned())
    }

    async fn save_account(&self, account: &ProviderAccount) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let key = (account.user_id.clone(), account.provider);
        let mut next = account.clone();
        if next.refresh_token.is_none() {
            next.refresh_token = accounts.get(&key).and_then(|a| a.refresh_token.clone());
        }
        accounts.insert(key, next);
        Ok(())
    }

    async fn delete_account(&self, user_id: &str, provider: ProviderKind) -> Result<bool, StoreError> {
        Ok(self
            .accounts
            .write()
            .await
            .remove(&(user_id.to_string(), provider))
            .is_some())
    }
}

#[async_trait]
impl ThreadStore for InMemoryStore {
    async fn get_or_create_thread_id(&self, user_id: &str) -> Result<String, StoreError> {
        let mut threads = self.threads.write().await;
        Ok(threads
            .entry(user_id.to_string())
            .or_insert_with(|| format!("thread_{}", Uuid::new_v4().simple()))
            .clone())
    }
}

#[async_trait]
impl Checkpointer for InMemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }
}
