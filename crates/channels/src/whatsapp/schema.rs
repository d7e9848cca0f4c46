//! The three message shapes the assistant may answer with on WhatsApp.
//!
//! The model writes these as JSON. Every field with a platform length limit
//! is cut down by [`StructuredMessage::normalize`]; nothing here rejects a
//! message for being too long.

use serde::{Deserialize, Serialize};

pub const MAX_HEADER_CHARS: usize = 60;
pub const MAX_FOOTER_CHARS: usize = 60;
pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_LIST_BODY_CHARS: usize = 4096;
pub const MAX_LIST_BUTTON_CHARS: usize = 20;
pub const MAX_SECTION_TITLE_CHARS: usize = 24;
pub const MAX_ROW_ID_CHARS: usize = 200;
pub const MAX_ROW_TITLE_CHARS: usize = 24;
pub const MAX_ROW_DESCRIPTION_CHARS: usize = 72;
pub const MAX_BUTTON_BODY_CHARS: usize = 1024;
pub const MAX_REPLY_ID_CHARS: usize = 256;
pub const MAX_REPLY_TITLE_CHARS: usize = 20;
pub const MAX_SECTIONS: usize = 10;
pub const MAX_ROWS: usize = 10;
pub const MAX_BUTTONS: usize = 3;

/// Top-level `message_type` discriminator written next to `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Interactive,
}

/// One outbound WhatsApp message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StructuredMessage {
    Text(TextMessage),
    List(ListMessage),
    Button(ButtonMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(default)]
    pub message_type: MessageType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMessage {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    pub body: TextBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<TextBlock>,
    pub action: ListAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonMessage {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    pub body: TextBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<TextBlock>,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderKind {
    #[default]
    Text,
}

/// Only text headers are supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HeaderKind>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListAction {
    pub button: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonAction {
    pub buttons: Vec<ReplyButton>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    #[default]
    Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyButton {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ReplyKind>,
    pub reply: Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub title: String,
}

/// Why a parsed object is not a usable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    EmptyBody,
    NoSections,
    EmptySection(usize),
    NoButtons,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaViolation::EmptyBody => f.write_str("body text is empty"),
            SchemaViolation::NoSections => f.write_str("list has no sections"),
            SchemaViolation::EmptySection(i) => write!(f, "section {i} has no rows"),
            SchemaViolation::NoButtons => f.write_str("button message has no buttons"),
        }
    }
}

/// Cut `value` to at most `max` characters in place.
pub fn truncate_chars(value: &mut String, max: usize) {
    if let Some((cut, _)) = value.char_indices().nth(max) {
        value.truncate(cut);
    }
}

fn truncate_header(header: &mut Option<Header>) {
    if let Some(h) = header {
        truncate_chars(&mut h.text, MAX_HEADER_CHARS);
    }
}

fn truncate_footer(footer: &mut Option<TextBlock>) {
    if let Some(f) = footer {
        truncate_chars(&mut f.text, MAX_FOOTER_CHARS);
    }
}

impl StructuredMessage {
    /// A plain text message, already within limits.
    pub fn text(text: impl Into<String>) -> Self {
        let mut message = StructuredMessage::Text(TextMessage {
            message_type: MessageType::Text,
            text: text.into(),
        });
        message.truncate();
        message
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            StructuredMessage::Text(_) => MessageType::Text,
            StructuredMessage::List(_) | StructuredMessage::Button(_) => MessageType::Interactive,
        }
    }

    /// Check the parts no amount of truncation can fix.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        match self {
            StructuredMessage::Text(_) => Ok(()),
            StructuredMessage::List(list) => {
                if list.body.text.trim().is_empty() {
                    return Err(SchemaViolation::EmptyBody);
                }
                if list.action.sections.is_empty() {
                    return Err(SchemaViolation::NoSections);
                }
                match list.action.sections.iter().position(|s| s.rows.is_empty()) {
                    Some(i) => Err(SchemaViolation::EmptySection(i)),
                    None => Ok(()),
                }
            }
            StructuredMessage::Button(buttons) => {
                if buttons.body.text.trim().is_empty() {
                    return Err(SchemaViolation::EmptyBody);
                }
                if buttons.action.buttons.is_empty() {
                    return Err(SchemaViolation::NoButtons);
                }
                Ok(())
            }
        }
    }

    /// Apply every length and count limit. Idempotent.
    pub fn truncate(&mut self) {
        match self {
            StructuredMessage::Text(text) => {
                truncate_chars(&mut text.text, MAX_TEXT_CHARS);
            }
            StructuredMessage::List(list) => {
                truncate_header(&mut list.header);
                truncate_footer(&mut list.footer);
                truncate_chars(&mut list.body.text, MAX_LIST_BODY_CHARS);
                truncate_chars(&mut list.action.button, MAX_LIST_BUTTON_CHARS);
                list.action.sections.truncate(MAX_SECTIONS);
                for section in &mut list.action.sections {
                    if let Some(title) = &mut section.title {
                        truncate_chars(title, MAX_SECTION_TITLE_CHARS);
                    }
                    section.rows.truncate(MAX_ROWS);
                    for row in &mut section.rows {
                        truncate_chars(&mut row.id, MAX_ROW_ID_CHARS);
                        truncate_chars(&mut row.title, MAX_ROW_TITLE_CHARS);
                        if let Some(description) = &mut row.description {
                            truncate_chars(description, MAX_ROW_DESCRIPTION_CHARS);
                        }
                    }
                }
            }
            StructuredMessage::Button(buttons) => {
                truncate_header(&mut buttons.header);
                truncate_footer(&mut buttons.footer);
                truncate_chars(&mut buttons.body.text, MAX_BUTTON_BODY_CHARS);
                buttons.action.buttons.truncate(MAX_BUTTONS);
                for button in &mut buttons.action.buttons {
                    truncate_chars(&mut button.reply.id, MAX_REPLY_ID_CHARS);
                    truncate_chars(&mut button.reply.title, MAX_REPLY_TITLE_CHARS);
                }
            }
        }
    }

    /// Validate, fix the `message_type` discriminator and truncate.
    pub fn normalize(mut self) -> Result<Self, SchemaViolation> {
        self.validate()?;
        let message_type = self.message_type();
        match &mut self {
            StructuredMessage::Text(m) => m.message_type = message_type,
            StructuredMessage::List(m) => m.message_type = message_type,
            StructuredMessage::Button(m) => m.message_type = message_type,
        }
        self.truncate();
        Ok(self)
    }

    /// The human-readable core of the message, used when an interactive
    /// message has to be downgraded to text.
    pub fn body_text(&self) -> &str {
        match self {
            StructuredMessage::Text(m) => &m.text,
            StructuredMessage::List(m) => &m.body.text,
            StructuredMessage::Button(m) => &m.body.text,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({ "message_type": "text", "type": "text", "text": self.body_text() }).to_string()
        })
    }
}
