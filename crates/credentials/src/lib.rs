//! Credential resolution for tool adapters.
//!
//! A [`StoredCredentialResolver`] reads the user's linked account and, when the
//! access token is expired, exchanges the refresh token through a
//! [`TokenRefresher`].

pub mod refresher;
pub mod resolver;

pub use refresher::{OAuthTokenRefresher, RefreshedToken, TokenRefresher};
pub use resolver::{DEFAULT_EXPIRY_SKEW_SECS, StaticCredentialResolver, StoredCredentialResolver};
