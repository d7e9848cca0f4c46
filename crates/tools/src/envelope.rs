//! The typed result every capability function returns.
//!
//! Tools hand the model a string. That string is rendered from a
//! [`ToolEnvelope`] so the adapter boundary itself stays typed: success
//! carries `data`, failure carries a human-readable `error` and a `code`.

use concierge_core::credential::ProviderKind;
use concierge_core::error::ToolError;
use concierge_core::tool::ToolResult;
use serde::{Serialize, Serializer};
use std::fmt;

/// Machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// `NO_<PROVIDER>_ACCOUNT`
    NoAccount(ProviderKind),
    InvalidToken,
    /// `<PROVIDER>_API_ERROR`: the upstream answered with an error status.
    ApiError(ProviderKind),
    /// `<PROVIDER>_ERROR`: the upstream could not be reached or understood.
    ProviderError(ProviderKind),
    EventNotFound,
    DocNotFound,
    InvalidDateFormat,
    InvalidDateRange,
    InvalidArguments,
    MemoryUnavailable,
    MemoryError,
    MemoryNotFound,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCode::NoAccount(p) => write!(f, "NO_{}_ACCOUNT", p.code_prefix()),
            FailureCode::InvalidToken => f.write_str("INVALID_TOKEN"),
            FailureCode::ApiError(p) => write!(f, "{}_API_ERROR", p.code_prefix()),
            FailureCode::ProviderError(p) => write!(f, "{}_ERROR", p.code_prefix()),
            FailureCode::EventNotFound => f.write_str("EVENT_NOT_FOUND"),
            FailureCode::DocNotFound => f.write_str("DOC_NOT_FOUND"),
            FailureCode::InvalidDateFormat => f.write_str("INVALID_DATE_FORMAT"),
            FailureCode::InvalidDateRange => f.write_str("INVALID_DATE_RANGE"),
            FailureCode::InvalidArguments => f.write_str("INVALID_ARGUMENTS"),
            FailureCode::MemoryUnavailable => f.write_str("MEMORY_UNAVAILABLE"),
            FailureCode::MemoryError => f.write_str("MEMORY_ERROR"),
            FailureCode::MemoryNotFound => f.write_str("MEMORY_NOT_FOUND"),
        }
    }
}

impl Serialize for FailureCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `{success, data?, error?, code?}`
#[derive(Debug, Clone, Serialize)]
pub struct ToolEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
}

impl ToolEnvelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: FailureCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: Some(code),
        }
    }

    pub fn no_account(provider: ProviderKind) -> Self {
        let name = provider.display_name();
        Self::failure(
            FailureCode::NoAccount(provider),
            format!(
                "You don't have a {name} account connected. Please connect your {name} account \
                 in the dashboard settings to use this feature."
            ),
        )
    }

    pub fn invalid_token(provider: ProviderKind) -> Self {
        let name = provider.display_name();
        Self::failure(
            FailureCode::InvalidToken,
            format!(
                "Your {name} connection has expired or was revoked. Please reconnect your {name} \
                 account in the dashboard settings and try again."
            ),
        )
    }

    pub fn invalid_arguments(tool: &str, reason: impl fmt::Display) -> Self {
        Self::failure(
            FailureCode::InvalidArguments,
            format!("Invalid arguments for {tool}: {reason}"),
        )
    }

    pub fn code_str(&self) -> Option<String> {
        self.code.map(|c| c.to_string())
    }

    /// The string the model reads.
    pub fn render(&self) -> String {
        if !self.success {
            return self.error.clone().unwrap_or_else(|| "The operation failed.".into());
        }
        match &self.data {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            None => "Done.".into(),
        }
    }

    pub fn into_tool_result(self) -> ToolResult {
        ToolResult {
            call_id: String::new(),
            success: self.success,
            output: self.render(),
            data: serde_json::to_value(&self).ok(),
        }
    }
}

/// Why a capability function stopped early.
#[derive(Debug)]
pub enum AdapterFailure {
    /// Reported to the model as a failed envelope.
    Recoverable(ToolEnvelope),
    /// Aborts the turn.
    Fatal(ToolError),
}

impl From<ToolEnvelope> for AdapterFailure {
    fn from(envelope: ToolEnvelope) -> Self {
        AdapterFailure::Recoverable(envelope)
    }
}

impl From<ToolError> for AdapterFailure {
    fn from(error: ToolError) -> Self {
        AdapterFailure::Fatal(error)
    }
}

pub type Attempt<T> = Result<T, AdapterFailure>;

/// Collapse an attempt into the envelope or the fatal error.
pub fn settle(attempt: Attempt<serde_json::Value>) -> Result<ToolEnvelope, ToolError> {
    match attempt {
        Ok(data) => Ok(ToolEnvelope::ok(data)),
        Err(AdapterFailure::Recoverable(envelope)) => Ok(envelope),
        Err(AdapterFailure::Fatal(error)) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_with_provider_prefix() {
        assert_eq!(FailureCode::NoAccount(ProviderKind::Github).to_string(), "NO_GITHUB_ACCOUNT");
        assert_eq!(FailureCode::ApiError(ProviderKind::Google).to_string(), "GOOGLE_API_ERROR");
        assert_eq!(FailureCode::ProviderError(ProviderKind::Linkedin).to_string(), "LINKEDIN_ERROR");
    }

    #[test]
    fn failure_renders_guidance_not_code() {
        let env = ToolEnvelope::no_account(ProviderKind::Github);
        let result = env.into_tool_result();
        assert!(!result.success);
        assert!(result.output.starts_with("You don't have a GitHub account connected"));
        assert!(!result.output.contains("NO_GITHUB_ACCOUNT"));
        let data = result.data.unwrap();
        assert_eq!(data["code"], "NO_GITHUB_ACCOUNT");
        assert_eq!(data["success"], false);
        assert!(data.get("data").is_none());
    }

    #[test]
    fn success_renders_data() {
        let env = ToolEnvelope::ok(serde_json::json!({"events": []}));
        assert!(env.render().contains("\"events\""));
        assert_eq!(ToolEnvelope::ok(serde_json::json!("Sent.")).render(), "Sent.");
    }

    #[test]
    fn settle_keeps_fatal_errors() {
        let fatal = settle(Err(AdapterFailure::Fatal(ToolError::Infrastructure {
            tool_name: "x".into(),
            reason: "db down".into(),
        })));
        assert!(fatal.is_err());
        let soft = settle(Err(ToolEnvelope::invalid_token(ProviderKind::Google).into())).unwrap();
        assert_eq!(soft.code_str().as_deref(), Some("INVALID_TOKEN"));
    }
}
