//! WhatsApp webhook.
//!
//! - `GET  /webhooks/whatsapp`: subscription handshake
//! - `POST /webhooks/whatsapp`: message delivery
//!
//! Deliveries are acknowledged as soon as they are authenticated and
//! parsed. Each message then runs as its own background turn, bounded by
//! `turn_timeout_secs`. A turn that fails or times out leaves a reaction
//! and an apology on the user's message.

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use concierge_channels::whatsapp::webhook::SIGNATURE_HEADER;
use concierge_channels::whatsapp::{
    ERROR_REACTION, FAILURE_TEXT, LINKING_HINT, VerificationQuery, parse_webhook, verify_signature,
};
use concierge_channels::{InboundMessage, WhatsAppSender};
use concierge_core::channel::ChannelKind;

use crate::SharedState;

pub fn whatsapp_router(state: SharedState) -> Router {
    Router::new()
        .route("/whatsapp", get(verify_handler).post(delivery_handler))
        .with_state(state)
}

async fn verify_handler(
    State(state): State<SharedState>,
    Query(query): Query<VerificationQuery>,
) -> Result<String, StatusCode> {
    let expected = state
        .whatsapp_config
        .verify_token
        .as_deref()
        .ok_or(StatusCode::FORBIDDEN)?;
    match query.challenge_for(expected) {
        Some(challenge) => {
            info!("WhatsApp webhook verified");
            Ok(challenge.to_string())
        }
        None => {
            warn!("WhatsApp webhook verification rejected");
            Err(StatusCode::FORBIDDEN)
        }
    }
}

async fn delivery_handler(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(secret) = state.whatsapp_config.app_secret.as_deref() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = verify_signature(secret, &body, signature) {
            warn!(error = %e, "Rejected WhatsApp delivery");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let messages = match parse_webhook(&body) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "Unreadable WhatsApp delivery");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(sender) = state.whatsapp.clone() else {
        if !messages.is_empty() {
            warn!(count = messages.len(), "WhatsApp messages dropped: sending is not configured");
        }
        return StatusCode::OK;
    };

    for message in messages {
        debug!(message_id = %message.message_id, "Queued WhatsApp message");
        spawn_turn(state.clone(), sender.clone(), message);
    }
    StatusCode::OK
}

/// Run one inbound message to completion in the background.
pub fn spawn_turn(state: SharedState, sender: Arc<dyn WhatsAppSender>, message: InboundMessage) -> JoinHandle<()> {
    let timeout = Duration::from_secs(state.whatsapp_config.turn_timeout_secs);
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, handle_message(&state, sender.as_ref(), &message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(message_id = %message.message_id, error = %e, "WhatsApp turn failed");
                report_failure(sender.as_ref(), &message).await;
            }
            Err(_) => {
                error!(
                    message_id = %message.message_id,
                    timeout_secs = timeout.as_secs(),
                    "WhatsApp turn timed out"
                );
                report_failure(sender.as_ref(), &message).await;
            }
        }
    })
}

async fn handle_message(
    state: &SharedState,
    sender: &dyn WhatsAppSender,
    message: &InboundMessage,
) -> Result<(), concierge_core::Error> {
    let phone = message.from_e164();
    let Some(user) = state.users.find_by_phone(&phone).await? else {
        info!(message_id = %message.message_id, "Message from an unlinked number");
        sender.send_text(&message.from, LINKING_HINT).await?;
        return Ok(());
    };

    let outcome = state.agent.run(&user, ChannelKind::WhatsApp, &message.text).await?;
    match &outcome.structured {
        Some(reply) => sender.send_message(&message.from, reply).await?,
        None => sender.send_text(&message.from, &outcome.reply).await?,
    }
    info!(user_id = %user.id, thread_id = %outcome.thread_id, "WhatsApp reply sent");
    Ok(())
}

/// Best-effort: each step is logged and skipped on failure.
async fn report_failure(sender: &dyn WhatsAppSender, message: &InboundMessage) {
    if let Err(e) = sender.send_reaction(&message.from, &message.message_id, ERROR_REACTION).await {
        warn!(message_id = %message.message_id, error = %e, "Could not send failure reaction");
    }
    if let Err(e) = sender.send_text(&message.from, FAILURE_TEXT).await {
        warn!(message_id = %message.message_id, error = %e, "Could not send failure message");
    }
}
