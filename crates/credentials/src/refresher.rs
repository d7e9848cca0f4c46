//! OAuth2 `refresh_token` grant.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use concierge_config::OAuthConfig;
use concierge_core::credential::{ProviderAccount, ProviderKind};
use concierge_core::error::CredentialError;
use serde::Deserialize;
use tracing::debug;

/// Tokens returned by a successful refresh.
#[derive(Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotates refresh tokens.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges a stored refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &ProviderAccount) -> Result<RefreshedToken, CredentialError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Standard refresh-token grant against each provider's token URL.
pub struct OAuthTokenRefresher {
    http: reqwest::Client,
    clients: OAuthConfig,
}

impl OAuthTokenRefresher {
    pub fn new(http: reqwest::Client, clients: OAuthConfig) -> Self {
        Self { http, clients }
    }

    fn invalid(provider: ProviderKind, reason: impl Into<String>) -> CredentialError {
        CredentialError::InvalidToken {
            provider,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    async fn refresh(&self, account: &ProviderAccount) -> Result<RefreshedToken, CredentialError> {
        let provider = account.provider;
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| Self::invalid(provider, "no refresh token stored"))?;

        let client = self.clients.client(provider);
        let (Some(client_id), Some(client_secret)) =
            (client.client_id.as_deref(), client.client_secret.as_deref())
        else {
            return Err(Self::invalid(provider, "OAuth client is not configured"));
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = self
            .http
            .post(&client.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Self::invalid(provider, format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Self::invalid(provider, format!("unreadable token response ({status}): {e}")))?;

        // GitHub reports grant errors with a 200 status.
        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(Self::invalid(provider, format!("{error} {detail}").trim().to_string()));
        }
        if !status.is_success() {
            return Err(Self::invalid(provider, format!("token endpoint returned {status}")));
        }
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Self::invalid(provider, "token response has no access_token"))?;

        debug!(provider = %provider, user_id = %account.user_id, "Access token refreshed");

        Ok(RefreshedToken {
            access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_in.and_then(expiry_after),
            scopes: body
                .scope
                .map(|s| s.split([' ', ',']).filter(|p| !p.is_empty()).map(String::from).collect()),
        })
    }
}

/// `None` when `secs` does not fit a timestamp.
fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d))
}
