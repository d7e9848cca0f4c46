//! Outbound delivery through the WhatsApp Cloud API `messages` endpoint.

use async_trait::async_trait;
use concierge_config::WhatsAppConfig;
use concierge_core::error::ChannelError;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::schema::{Header, StructuredMessage, TextBlock};

const CHANNEL: &str = "whatsapp";

/// Anything that can deliver messages to a WhatsApp number.
#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    /// Deliver one structured message. Limits are applied before sending.
    async fn send_message(&self, to: &str, message: &StructuredMessage) -> Result<(), ChannelError>;

    /// React to one of the user's messages.
    async fn send_reaction(&self, to: &str, message_id: &str, emoji: &str) -> Result<(), ChannelError>;

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ChannelError> {
        self.send_message(to, &StructuredMessage::text(text)).await
    }
}

/// Build the Cloud API request body for `message`.
pub fn to_cloud_payload(to: &str, message: &StructuredMessage) -> Value {
    let mut message = message.clone();
    message.truncate();

    let header = |h: &Option<Header>| h.as_ref().map(|h| json!({ "type": "text", "text": h.text }));
    let footer = |f: &Option<TextBlock>| f.as_ref().map(|f| json!({ "text": f.text }));

    let (kind, content) = match &message {
        StructuredMessage::Text(m) => ("text", json!({ "preview_url": false, "body": m.text })),
        StructuredMessage::List(m) => {
            let sections: Vec<Value> = m
                .action
                .sections
                .iter()
                .map(|s| {
                    let rows: Vec<Value> = s
                        .rows
                        .iter()
                        .map(|r| {
                            let mut row = json!({ "id": r.id, "title": r.title });
                            if let Some(description) = &r.description {
                                row["description"] = json!(description);
                            }
                            row
                        })
                        .collect();
                    let mut section = json!({ "rows": rows });
                    if let Some(title) = s.title.as_deref().filter(|t| !t.is_empty()) {
                        section["title"] = json!(title);
                    }
                    section
                })
                .collect();
            let mut interactive = json!({
                "type": "list",
                "body": { "text": m.body.text },
                "action": { "button": m.action.button, "sections": sections },
            });
            if let Some(h) = header(&m.header) {
                interactive["header"] = h;
            }
            if let Some(f) = footer(&m.footer) {
                interactive["footer"] = f;
            }
            ("interactive", interactive)
        }
        StructuredMessage::Button(m) => {
            let buttons: Vec<Value> = m
                .action
                .buttons
                .iter()
                .map(|b| json!({ "type": "reply", "reply": { "id": b.reply.id, "title": b.reply.title } }))
                .collect();
            let mut interactive = json!({
                "type": "button",
                "body": { "text": m.body.text },
                "action": { "buttons": buttons },
            });
            if let Some(h) = header(&m.header) {
                interactive["header"] = h;
            }
            if let Some(f) = footer(&m.footer) {
                interactive["footer"] = f;
            }
            ("interactive", interactive)
        }
    };

    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": kind,
    });
    payload[kind] = content;
    payload
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Cloud API client bound to one business phone number.
#[derive(Clone)]
pub struct CloudApiClient {
    http: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    access_token: String,
}

impl std::fmt::Debug for CloudApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudApiClient")
            .field("api_base", &self.api_base)
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl CloudApiClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Build a client from config, or explain what is missing.
    pub fn from_config(http: reqwest::Client, config: &WhatsAppConfig) -> Result<Self, ChannelError> {
        match (&config.phone_number_id, &config.access_token) {
            (Some(phone), Some(token)) => Ok(Self::new(http, &config.api_base, phone, token)),
            _ => Err(ChannelError::NotConfigured(
                "whatsapp.phone_number_id and whatsapp.access_token are required".into(),
            )),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base.trim_end_matches('/'), self.phone_number_id)
    }

    async fn post(&self, payload: &Value) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<GraphErrorBody>(&body) {
            Ok(parsed) => match parsed.error.code {
                Some(code) => format!("{} (code {code})", parsed.error.message),
                None => parsed.error.message,
            },
            Err(_) => format!("HTTP {status}"),
        };
        Err(ChannelError::DeliveryFailed {
            channel: CHANNEL.into(),
            reason,
        })
    }
}

#[async_trait]
impl WhatsAppSender for CloudApiClient {
    async fn send_message(&self, to: &str, message: &StructuredMessage) -> Result<(), ChannelError> {
        debug!(kind = ?message.message_type(), "Sending WhatsApp message");
        self.post(&to_cloud_payload(to, message)).await
    }

    async fn send_reaction(&self, to: &str, message_id: &str, emoji: &str) -> Result<(), ChannelError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "reaction",
            "reaction": { "message_id": message_id, "emoji": emoji },
        });
        self.post(&payload).await
    }
}
