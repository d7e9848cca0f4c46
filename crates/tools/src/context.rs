//! Request-scoped state shared by every adapter in one turn.

use concierge_config::EndpointsConfig;
use concierge_core::credential::{AccessToken, CredentialResolver, ProviderKind};
use concierge_core::error::{CredentialError, ToolError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

use crate::envelope::{AdapterFailure, Attempt, FailureCode, ToolEnvelope};

const USER_AGENT: &str = concat!("concierge/", env!("CARGO_PKG_VERSION"));

/// The user a registry acts for, plus the clients it acts with.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub credentials: Arc<dyn CredentialResolver>,
    pub http: reqwest::Client,
    pub endpoints: Arc<EndpointsConfig>,
}

impl ToolContext {
    pub fn new(
        user_id: impl Into<String>,
        credentials: Arc<dyn CredentialResolver>,
        http: reqwest::Client,
        endpoints: Arc<EndpointsConfig>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            credentials,
            http,
            endpoints,
        }
    }

    /// Resolve the user's token for `provider`.
    ///
    /// Missing and invalid accounts become guidance envelopes; an account
    /// store outage is fatal.
    pub async fn token(&self, provider: ProviderKind, operation: &str) -> Attempt<AccessToken> {
        match self.credentials.resolve(&self.user_id, provider).await {
            Ok(token) => Ok(token),
            Err(CredentialError::NoAccount { .. }) => Err(ToolEnvelope::no_account(provider).into()),
            Err(CredentialError::InvalidToken { reason, .. }) => {
                warn!(user_id = %self.user_id, provider = %provider, reason = %reason, "Credential rejected");
                Err(ToolEnvelope::invalid_token(provider).into())
            }
            Err(CredentialError::Store(reason)) => Err(AdapterFailure::Fatal(ToolError::Infrastructure {
                tool_name: operation.to_string(),
                reason,
            })),
        }
    }
}

/// Shared builder defaults for upstream calls.
pub(crate) fn with_defaults(request: reqwest::RequestBuilder, token: &AccessToken) -> reqwest::RequestBuilder {
    request
        .bearer_auth(token.secret())
        .header(reqwest::header::USER_AGENT, USER_AGENT)
}

/// An upstream call that did not produce a usable response.
#[derive(Debug)]
pub(crate) enum HttpFailure {
    Transport(String),
    Status { status: u16, message: String },
}

impl HttpFailure {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            HttpFailure::Status { status, .. } => Some(*status),
            HttpFailure::Transport(_) => None,
        }
    }

    /// Default mapping: 401 asks for a reconnect, other statuses are API
    /// errors, transport problems are provider errors.
    pub(crate) fn into_failure(self, provider: ProviderKind) -> AdapterFailure {
        let name = provider.display_name();
        match self {
            HttpFailure::Status { status: 401, .. } => ToolEnvelope::invalid_token(provider).into(),
            HttpFailure::Status { status, message } => ToolEnvelope::failure(
                FailureCode::ApiError(provider),
                format!("{name} API error ({status}): {message}"),
            )
            .into(),
            HttpFailure::Transport(reason) => ToolEnvelope::failure(
                FailureCode::ProviderError(provider),
                format!("Could not reach {name}: {reason}"),
            )
            .into(),
        }
    }
}

/// Send a request and keep only successful responses.
///
/// `extract_error` pulls the provider's message out of an error body.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    extract_error: fn(&str) -> Option<String>,
) -> Result<reqwest::Response, HttpFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| HttpFailure::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_error(&body)
        .or_else(|| status.canonical_reason().map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect());
    Err(HttpFailure::Status {
        status: status.as_u16(),
        message,
    })
}

/// Decode a JSON body, mapping decode failures to `<PROVIDER>_ERROR`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: ProviderKind,
    response: reqwest::Response,
) -> Attempt<T> {
    response.json::<T>().await.map_err(|e| {
        ToolEnvelope::failure(
            FailureCode::ProviderError(provider),
            format!("Unexpected response from {}: {e}", provider.display_name()),
        )
        .into()
    })
}

/// Parse tool arguments into a typed struct. `null` counts as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, arguments: serde_json::Value) -> Result<T, ToolEnvelope> {
    let arguments = if arguments.is_null() {
        serde_json::json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolEnvelope::invalid_arguments(tool, e))
}

/// Build `{base}/{segments...}` without double slashes or unescaped ids.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Attempt<url::Url> {
    let mut url = url::Url::parse(base).map_err(|e| {
        AdapterFailure::Fatal(ToolError::ExecutionFailed {
            tool_name: "endpoint".into(),
            reason: format!("bad base url '{base}': {e}"),
        })
    })?;
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            AdapterFailure::Fatal(ToolError::ExecutionFailed {
                tool_name: "endpoint".into(),
                reason: format!("base url '{base}' cannot carry a path"),
            })
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        event_id: String,
        #[serde(default)]
        max_results: Option<u32>,
    }

    #[test]
    fn parse_args_reports_missing_field() {
        let err = parse_args::<Args>("delete_calendar_event", serde_json::json!({})).unwrap_err();
        assert_eq!(err.code, Some(FailureCode::InvalidArguments));
        assert!(err.render().contains("eventId"));

        let ok: Args = parse_args("x", serde_json::json!({"eventId": "e1", "maxResults": 3})).unwrap();
        assert_eq!(ok.event_id, "e1");
        assert_eq!(ok.max_results, Some(3));
    }

    #[test]
    fn endpoint_escapes_segments() {
        let url = endpoint("https://api.example.com/v3/", &["calendars", "primary", "events", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v3/calendars/primary/events/a%2Fb");
    }

    #[test]
    fn status_mapping() {
        let unauthorized = HttpFailure::Status { status: 401, message: "nope".into() };
        match unauthorized.into_failure(ProviderKind::Google) {
            AdapterFailure::Recoverable(env) => assert_eq!(env.code, Some(FailureCode::InvalidToken)),
            AdapterFailure::Fatal(_) => panic!("401 must be recoverable"),
        }
        let server = HttpFailure::Status { status: 500, message: "Backend Error".into() };
        match server.into_failure(ProviderKind::Github) {
            AdapterFailure::Recoverable(env) => {
                assert_eq!(env.code_str().as_deref(), Some("GITHUB_API_ERROR"));
                assert!(env.render().contains("Backend Error"));
            }
            AdapterFailure::Fatal(_) => panic!("500 must be recoverable"),
        }
    }
}
