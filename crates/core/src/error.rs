//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.
//!
//! Recoverable failures (a tool that could not reach its API, a memory
//! backend that is down) are reported as values by the layers that own them.
//! Anything that reaches the top-level [`Error`] aborts the current turn.

use thiserror::Error;

use crate::credential::ProviderKind;

/// The top-level error type for all Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Credential errors ---
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Errors raised by a long-term memory backend.
///
/// The variant decides how the resilient wrapper treats the failure:
/// `Unreachable` is skipped at once, `Transient` and `Storage` are retried,
/// the rest are returned to the caller.
#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Memory backend unreachable: {0}")]
    Unreachable(String),

    #[error("Transient memory failure: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Invalid memory request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The infrastructure behind a tool is down (credential store, database).
    /// The agent loop treats this as fatal for the turn.
    #[error("Infrastructure failure in {tool_name}: {reason}")]
    Infrastructure { tool_name: String, reason: String },
}

/// Failures while turning a (user, provider) pair into a usable token.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("No {provider} account linked")]
    NoAccount { provider: ProviderKind },

    #[error("{provider} token is invalid: {reason}")]
    InvalidToken {
        provider: ProviderKind,
        reason: String,
    },

    #[error("Account store unavailable: {0}")]
    Store(String),
}

/// Errors from the relational store (users, accounts, threads, checkpoints).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CredentialError {
    fn from(err: StoreError) -> Self {
        CredentialError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn credential_error_names_provider() {
        let err = CredentialError::NoAccount {
            provider: ProviderKind::Github,
        };
        assert_eq!(err.to_string(), "No GitHub account linked");
    }

    #[test]
    fn store_error_converts_into_credential_store_failure() {
        let err: CredentialError = StoreError::Unavailable("db down".into()).into();
        assert!(matches!(err, CredentialError::Store(ref m) if m.contains("db down")));
    }
}
