//! Linked provider accounts and the credential resolution contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{CredentialError, StoreError};

/// External identity providers a user can link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Github,
    Linkedin,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Google, ProviderKind::Github, ProviderKind::Linkedin];

    /// Storage key ("google", "github", "linkedin").
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Github => "github",
            ProviderKind::Linkedin => "linkedin",
        }
    }

    /// Prefix used in failure codes (`NO_GITHUB_ACCOUNT`, `GITHUB_API_ERROR`).
    pub fn code_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Google => "GOOGLE",
            ProviderKind::Github => "GITHUB",
            ProviderKind::Linkedin => "LINKEDIN",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Google => "Google",
            ProviderKind::Github => "GitHub",
            ProviderKind::Linkedin => "LinkedIn",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "github" => Ok(ProviderKind::Github),
            "linkedin" => Ok(ProviderKind::Linkedin),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// One linked account. At most one exists per (user_id, provider).
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub user_id: String,
    pub provider: ProviderKind,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ProviderAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAccount")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// A usable bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persistence of linked accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<ProviderAccount>, StoreError>;

    /// Insert or replace the account for (user_id, provider).
    async fn save_account(&self, account: &ProviderAccount) -> Result<(), StoreError>;

    /// Returns whether an account was removed.
    async fn delete_account(&self, user_id: &str, provider: ProviderKind) -> Result<bool, StoreError>;
}

/// Turns a (user, provider) pair into a currently valid access token.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, user_id: &str, provider: ProviderKind) -> Result<AccessToken, CredentialError>;
}
