//! Inbound webhook deliveries: subscription handshake, signature check and
//! payload parsing.

use concierge_core::error::ChannelError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Query parameters of the `GET` verification request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerificationQuery {
    /// The challenge to echo back, when the request is a valid subscribe
    /// handshake for `expected_token`.
    pub fn challenge_for(&self, expected_token: &str) -> Option<&str> {
        let subscribing = self.mode.as_deref() == Some("subscribe");
        let token_matches = self.verify_token.as_deref() == Some(expected_token);
        if subscribing && token_matches && !expected_token.is_empty() {
            self.challenge.as_deref()
        } else {
            None
        }
    }
}

/// Check `X-Hub-Signature-256` (`sha256=<hex hmac of body>`).
///
/// Comparison is constant-time.
pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> Result<(), ChannelError> {
    let header = header.ok_or(ChannelError::InvalidSignature)?;
    let hex_digest = header.strip_prefix("sha256=").ok_or(ChannelError::InvalidSignature)?;
    let provided = hex::decode(hex_digest).map_err(|_| ChannelError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).map_err(|_| ChannelError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| ChannelError::InvalidSignature)
}

/// Hex signature for `body`, in header form.
pub fn sign(app_secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// What kind of user action produced an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Text,
    /// Tapped a row of a list message.
    ListReply { id: String },
    /// Tapped a reply button.
    ButtonReply { id: String },
}

/// One user message pulled out of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender's number in E.164, without the leading `+`.
    pub from: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub kind: InboundKind,
    pub timestamp: Option<String>,
}

impl InboundMessage {
    /// Sender number with the `+` prefix used by the user directory.
    pub fn from_e164(&self) -> String {
        if self.from.starts_with('+') {
            self.from.clone()
        } else {
            format!("+{}", self.from)
        }
    }
}

#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    value: Option<ChangeValue>,
}

#[derive(Deserialize)]
struct ChangeValue {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct Contact {
    wa_id: String,
    profile: Option<Profile>,
}

#[derive(Deserialize)]
struct Profile {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: String,
    from: String,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<RawText>,
    interactive: Option<RawInteractive>,
    button: Option<RawQuickReply>,
}

#[derive(Deserialize)]
struct RawText {
    body: String,
}

#[derive(Deserialize)]
struct RawInteractive {
    list_reply: Option<RawReply>,
    button_reply: Option<RawReply>,
}

#[derive(Deserialize)]
struct RawReply {
    id: String,
    title: String,
}

/// Template quick-reply buttons arrive as `type: "button"`.
#[derive(Deserialize)]
struct RawQuickReply {
    text: String,
    payload: Option<String>,
}

fn convert(raw: RawMessage, contacts: &[Contact]) -> Option<InboundMessage> {
    let (text, kind) = match raw.kind.as_str() {
        "text" => (raw.text?.body, InboundKind::Text),
        "interactive" => {
            let interactive = raw.interactive?;
            if let Some(reply) = interactive.list_reply {
                (reply.title, InboundKind::ListReply { id: reply.id })
            } else {
                let reply = interactive.button_reply?;
                (reply.title, InboundKind::ButtonReply { id: reply.id })
            }
        }
        "button" => {
            let button = raw.button?;
            let id = button.payload.unwrap_or_else(|| button.text.clone());
            (button.text, InboundKind::ButtonReply { id })
        }
        other => {
            debug!(message_type = other, "Ignoring unsupported WhatsApp message type");
            return None;
        }
    };
    if text.trim().is_empty() {
        return None;
    }

    let sender_name = contacts
        .iter()
        .find(|c| c.wa_id == raw.from)
        .and_then(|c| c.profile.as_ref())
        .and_then(|p| p.name.clone());

    Some(InboundMessage {
        message_id: raw.id,
        from: raw.from,
        sender_name,
        text,
        kind,
        timestamp: raw.timestamp,
    })
}

/// Extract user messages from a webhook body.
///
/// Status callbacks, unsupported message types and non-`messages` changes
/// are skipped; an undecodable body is an error.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<InboundMessage>, ChannelError> {
    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

    let mut messages = Vec::new();
    for change in payload.entry.into_iter().flat_map(|e| e.changes) {
        if change.field != "messages" {
            continue;
        }
        let Some(value) = change.value else { continue };
        let contacts = value.contacts;
        messages.extend(value.messages.into_iter().filter_map(|m| convert(m, &contacts)));
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(message: serde_json::Value) -> Vec<u8> {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "15550000000", "phone_number_id": "1234"},
                        "contacts": [{"profile": {"name": "Alice"}, "wa_id": "15551234567"}],
                        "messages": [message]
                    }
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn parses_text_message() {
        let body = delivery(json!({
            "from": "15551234567", "id": "wamid.A", "timestamp": "1700000000",
            "type": "text", "text": {"body": "What's on my calendar?"}
        }));
        let messages = parse_webhook(&body).unwrap();
        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_eq!(m.text, "What's on my calendar?");
        assert_eq!(m.kind, InboundKind::Text);
        assert_eq!(m.sender_name.as_deref(), Some("Alice"));
        assert_eq!(m.from_e164(), "+15551234567");
    }

    #[test]
    fn parses_list_and_button_replies() {
        let list = delivery(json!({
            "from": "15551234567", "id": "wamid.B", "type": "interactive",
            "interactive": {"type": "list_reply", "list_reply": {"id": "evt_1", "title": "Standup", "description": "9am"}}
        }));
        let m = &parse_webhook(&list).unwrap()[0];
        assert_eq!(m.text, "Standup");
        assert_eq!(m.kind, InboundKind::ListReply { id: "evt_1".into() });

        let button = delivery(json!({
            "from": "15551234567", "id": "wamid.C", "type": "interactive",
            "interactive": {"type": "button_reply", "button_reply": {"id": "yes", "title": "Yes, send it"}}
        }));
        let m = &parse_webhook(&button).unwrap()[0];
        assert_eq!(m.kind, InboundKind::ButtonReply { id: "yes".into() });
    }

    #[test]
    fn skips_statuses_and_media() {
        let statuses = json!({
            "entry": [{"changes": [{"field": "messages", "value": {
                "statuses": [{"id": "wamid.X", "status": "delivered"}]
            }}]}]
        })
        .to_string();
        assert!(parse_webhook(statuses.as_bytes()).unwrap().is_empty());

        let image = delivery(json!({
            "from": "15551234567", "id": "wamid.D", "type": "image", "image": {"id": "media"}
        }));
        assert!(parse_webhook(&image).unwrap().is_empty());
    }

    #[test]
    fn garbage_body_is_invalid_payload() {
        assert!(matches!(
            parse_webhook(b"not json"),
            Err(ChannelError::InvalidPayload(_))
        ));
    }

    #[test]
    fn signature_roundtrip_and_rejections() {
        let body = br#"{"entry":[]}"#;
        let header = sign("app-secret", body).unwrap();
        assert!(verify_signature("app-secret", body, Some(&header)).is_ok());

        assert!(verify_signature("other-secret", body, Some(&header)).is_err());
        assert!(verify_signature("app-secret", b"tampered", Some(&header)).is_err());
        assert!(verify_signature("app-secret", body, None).is_err());
        assert!(verify_signature("app-secret", body, Some(header.trim_start_matches("sha256="))).is_err());
        assert!(verify_signature("app-secret", body, Some("sha256=zz")).is_err());
    }

    #[test]
    fn verification_handshake() {
        let query = VerificationQuery {
            mode: Some("subscribe".into()),
            verify_token: Some("tok".into()),
            challenge: Some("12345".into()),
        };
        assert_eq!(query.challenge_for("tok"), Some("12345"));
        assert_eq!(query.challenge_for("other"), None);

        let unsubscribe = VerificationQuery {
            mode: Some("unsubscribe".into()),
            ..query
        };
        assert_eq!(unsubscribe.challenge_for("tok"), None);
    }
}
