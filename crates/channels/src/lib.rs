//! Messaging channels for Concierge.
//!
//! WhatsApp is the only push channel. The model answers it with one JSON
//! message per turn, which [`whatsapp::formatter`] validates and cuts to the
//! platform's limits before [`whatsapp::CloudApiClient`] delivers it. The web
//! chat needs no adapter here; the gateway streams plain text directly.

pub mod whatsapp;

pub use whatsapp::{
    CloudApiClient, InboundMessage, StructuredMessage, WhatsAppSender, format_model_output,
    parse_model_output,
};
