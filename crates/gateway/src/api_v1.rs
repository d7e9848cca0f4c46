//! Web chat API.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`        : Send a message, get `{reply, thread_id}`
//! - `POST /v1/chat/stream` : Send a message, get an SSE stream
//!
//! The dashboard authenticates its own users and names the one it acts for
//! in the `X-User-Id` header.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use concierge_agent::TURN_FAILED_MESSAGE;
use concierge_core::channel::ChannelKind;
use concierge_core::user::User;

use crate::SharedState;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .with_state(state)
}

/// Resolve the user named by `X-User-Id`.
async fn resolve_user(state: &SharedState, headers: &HeaderMap) -> Result<User, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing X-User-Id header"))?;

    match state.users.get_user(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("unknown user '{user_id}'"))),
        Err(e) => {
            tracing::error!(user_id, error = %e, "User lookup failed");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, TURN_FAILED_MESSAGE))
        }
    }
}

fn validate_message(payload: &ChatRequest) -> Result<(), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    Ok(())
}

async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    validate_message(&payload)?;
    let user = resolve_user(&state, &headers).await?;
    info!(user_id = %user.id, "v1/chat request");

    let outcome = state
        .agent
        .run(&user, ChannelKind::Web, &payload.message)
        .await
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, TURN_FAILED_MESSAGE))?;
    debug!(user_id = %user.id, iterations = outcome.iterations, "v1/chat complete");

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        thread_id: outcome.thread_id,
    }))
}

/// `POST /v1/chat/stream`: Send a message, receive an SSE stream of events.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    validate_message(&payload)?;
    let user = resolve_user(&state, &headers).await?;
    info!(user_id = %user.id, "v1/chat/stream SSE request");

    let rx = state.agent.clone().run_stream(user, payload.message);

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type().to_string();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}
