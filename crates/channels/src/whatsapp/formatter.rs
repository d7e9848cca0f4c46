//! Turn whatever the model produced into one valid WhatsApp message.
//!
//! The chain is: parse the whole reply as JSON, then look for a fenced or
//! bare JSON object inside it, then salvage a `text` or `body.text` field
//! from an object that did not fit any shape, and finally wrap the raw
//! reply as a text message. The last step cannot fail.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::schema::StructuredMessage;

/// Sent when the model produced nothing at all.
pub const EMPTY_REPLY_TEXT: &str = "Sorry, I couldn't put together a reply. Please try again.";

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

fn bare_object() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok()).as_ref()
}

/// JSON objects found in `raw`, most likely first.
fn candidates(raw: &str) -> Vec<Value> {
    let trimmed = raw.trim();
    let mut found = Vec::new();
    let mut push = |text: &str| {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
            found.push(value);
        }
    };

    push(trimmed);
    if let Some(re) = fenced_block() {
        for captures in re.captures_iter(trimmed) {
            if let Some(inner) = captures.get(1) {
                push(inner.as_str());
            }
        }
    }
    if let Some(m) = bare_object().and_then(|re| re.find(trimmed)) {
        push(m.as_str());
    }
    found
}

fn salvage_text(value: &Value) -> Option<String> {
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/body/text").and_then(Value::as_str))?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse, validate and truncate the model's reply.
pub fn parse_model_output(raw: &str) -> StructuredMessage {
    let candidates = candidates(raw);

    for value in &candidates {
        match serde_json::from_value::<StructuredMessage>(value.clone()) {
            Ok(message) => match message.normalize() {
                Ok(message) => return message,
                Err(violation) => debug!(%violation, "Structured reply failed validation"),
            },
            Err(e) => debug!(error = %e, "Object does not match a message shape"),
        }
    }

    if let Some(text) = candidates.iter().find_map(salvage_text) {
        warn!("Model reply did not match the message schema, salvaged its text");
        return StructuredMessage::text(text);
    }

    let text = raw.trim();
    if text.is_empty() {
        warn!("Model produced an empty reply");
        return StructuredMessage::text(EMPTY_REPLY_TEXT);
    }
    if !candidates.is_empty() {
        warn!("Model reply held JSON with no usable text, sending it verbatim");
    }
    StructuredMessage::text(text)
}

/// [`parse_model_output`] rendered back to the JSON string delivered downstream.
pub fn format_model_output(raw: &str) -> String {
    parse_model_output(raw).to_json()
}
