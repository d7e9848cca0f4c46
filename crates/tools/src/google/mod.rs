//! Google Workspace adapters: Calendar, Docs (via Drive), Gmail.

pub mod calendar;
pub mod docs;
pub mod gmail;

use serde::Deserialize;

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: Option<GoogleError>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GoogleError {
    Object { message: Option<String> },
    Text(String),
}

/// Extract the human-readable message from a Google API error body.
pub(crate) fn parse_google_error(body: &str) -> Option<String> {
    let payload: GoogleErrorBody = serde_json::from_str(body).ok()?;
    payload.error_description.or(match payload.error {
        Some(GoogleError::Object { message }) => message,
        Some(GoogleError::Text(text)) => Some(text),
        None => None,
    })
}

/// `maxResults` as the model sent it, clamped to what the APIs accept.
pub(crate) fn clamp_max_results(requested: Option<i64>, default: u32) -> u32 {
    requested
        .map(|n| n.clamp(1, 50) as u32)
        .unwrap_or(default)
}
