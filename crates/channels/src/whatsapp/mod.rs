//! WhatsApp: structured replies, the Cloud API client and webhook handling.

pub mod cloud_api;
pub mod formatter;
pub mod schema;
pub mod webhook;

pub use cloud_api::{CloudApiClient, WhatsAppSender, to_cloud_payload};
pub use formatter::{format_model_output, parse_model_output};
pub use schema::{MessageType, StructuredMessage};
pub use webhook::{InboundKind, InboundMessage, VerificationQuery, parse_webhook, verify_signature};

/// Reaction put on a user's message when their turn failed.
pub const ERROR_REACTION: &str = "⚠️";

/// Sent after a failed or timed-out turn.
pub const FAILURE_TEXT: &str =
    "Sorry, something went wrong while handling your message. Please try again in a moment.";

/// Sent to numbers that are not linked to a verified account.
pub const LINKING_HINT: &str = "Hi! I don't recognise this number yet. Add and verify it in your \
     Concierge dashboard settings, then message me again.";
