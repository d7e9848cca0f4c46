//! Credential resolution backed by the account store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use concierge_core::credential::{AccessToken, AccountStore, CredentialResolver, ProviderAccount, ProviderKind};
use concierge_core::error::CredentialError;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::refresher::TokenRefresher;

/// Tokens expiring within this window are refreshed before use.
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 60;

/// Looks up the stored account and refreshes expired tokens.
///
/// Concurrent turns for one user may both refresh; the last write wins.
pub struct StoredCredentialResolver {
    accounts: Arc<dyn AccountStore>,
    refresher: Arc<dyn TokenRefresher>,
    skew: Duration,
}

impl StoredCredentialResolver {
    pub fn new(accounts: Arc<dyn AccountStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            accounts,
            refresher,
            skew: Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS),
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    fn needs_refresh(&self, account: &ProviderAccount) -> bool {
        account.access_token.is_empty()
            || account
                .expires_at
                .is_some_and(|at| at <= Utc::now() + self.skew)
    }
}

#[async_trait]
impl CredentialResolver for StoredCredentialResolver {
    async fn resolve(&self, user_id: &str, provider: ProviderKind) -> Result<AccessToken, CredentialError> {
        let account = self
            .accounts
            .get_account(user_id, provider)
            .await?
            .ok_or(CredentialError::NoAccount { provider })?;

        if !self.needs_refresh(&account) {
            return Ok(AccessToken {
                token: account.access_token,
                expires_at: account.expires_at,
            });
        }

        if account.refresh_token.is_none() {
            return Err(CredentialError::InvalidToken {
                provider,
                reason: "access token expired and no refresh token is stored".into(),
            });
        }

        debug!(user_id = %user_id, provider = %provider, "Refreshing expired access token");
        let refreshed = self.refresher.refresh(&account).await?;

        let updated = ProviderAccount {
            access_token: refreshed.access_token.clone(),
            refresh_token: refreshed.refresh_token.or(account.refresh_token.clone()),
            expires_at: refreshed.expires_at,
            scopes: refreshed.scopes.unwrap_or(account.scopes.clone()),
            ..account
        };
        if let Err(e) = self.accounts.save_account(&updated).await {
            warn!(user_id = %user_id, provider = %provider, error = %e, "Failed to persist refreshed token");
        }

        Ok(AccessToken {
            token: refreshed.access_token,
            expires_at: refreshed.expires_at,
        })
    }
}

/// Resolves every request to the same token. Used by local tooling.
pub struct StaticCredentialResolver {
    token: Option<String>,
}

impl StaticCredentialResolver {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A resolver for which no account is ever linked.
    pub fn unlinked() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, _user_id: &str, provider: ProviderKind) -> Result<AccessToken, CredentialError> {
        self.token
            .clone()
            .map(|token| AccessToken { token, expires_at: None })
            .ok_or(CredentialError::NoAccount { provider })
    }
}
