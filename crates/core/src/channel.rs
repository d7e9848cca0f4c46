//! Inbound channels.
//!
//! The same agent serves two surfaces: the web dashboard chat and WhatsApp.
//! Only the system-prompt addendum and the expected output grammar differ.

use serde::{Deserialize, Serialize};

/// Where a turn came from and where its answer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Dashboard chat; plain text, streamed.
    #[default]
    Web,
    /// WhatsApp; one structured JSON message per turn.
    WhatsApp,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Web => "web",
            ChannelKind::WhatsApp => "whatsapp",
        }
    }

    /// Whether answers on this channel must follow the structured grammar.
    pub fn is_structured(&self) -> bool {
        matches!(self, ChannelKind::WhatsApp)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
