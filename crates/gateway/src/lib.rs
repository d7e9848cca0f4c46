//! HTTP gateway for Concierge.
//!
//! Serves the web chat API for the dashboard and the WhatsApp webhook.
//!
//! Built on Axum.

pub mod api_v1;
pub mod runtime;
pub mod whatsapp;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use concierge_agent::AgentLoop;
use concierge_channels::WhatsAppSender;
use concierge_config::{GatewayConfig, WhatsAppConfig};
use concierge_core::user::UserDirectory;

pub use runtime::Runtime;

/// Shared application state for the gateway.
pub struct AppState {
    pub agent: Arc<AgentLoop>,
    pub users: Arc<dyn UserDirectory>,
    /// `None` when outbound WhatsApp is not configured.
    pub whatsapp: Option<Arc<dyn WhatsAppSender>>,
    pub whatsapp_config: WhatsAppConfig,
    /// Service tokens accepted on `/v1`. Empty = open.
    pub api_tokens: Vec<String>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            agent: runtime.agent.clone(),
            users: runtime.stores.users.clone(),
            whatsapp: runtime.whatsapp.clone(),
            whatsapp_config: runtime.config.whatsapp.clone(),
            api_tokens: runtime.config.gateway.api_tokens.clone(),
        }
    }
}

/// Build the full router.
///
/// Layers applied:
/// - Bearer token authentication and per-client rate limiting on `/v1`
/// - CORS restricted to the configured origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, gateway: &GatewayConfig) -> Router {
    let limiter = Arc::new(RateLimiter::new(
        gateway.rate_limit_per_minute as usize,
        Duration::from_secs(60),
    ));

    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn(move |req, next| {
            let limiter = limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .nest("/webhooks", whatsapp::whatsapp_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(&gateway.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(api_v1::USER_ID_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(runtime: Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", runtime.config.gateway.host, runtime.config.gateway.port);
    if runtime.config.gateway.api_tokens.is_empty() {
        warn!("No gateway api_tokens configured; /v1 is open to any caller");
    }

    let state = Arc::new(AppState::from_runtime(&runtime));
    let app = build_router(state, &runtime.config.gateway);

    info!(addr = %addr, whatsapp = runtime.whatsapp.is_some(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key.
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    /// `max_requests == 0` disables limiting.
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within its limit.
    fn check(&self, client_key: &str) -> bool {
        if self.max_requests == 0 {
            return true;
        }
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keys clients by the user they act for, then by credential.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let headers = req.headers();
    let client_key = headers
        .get(api_v1::USER_ID_HEADER)
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

/// Requires `Authorization: Bearer <token>` when tokens are configured.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if state.api_tokens.is_empty() {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if state.api_tokens.iter().any(|t| t == token) => Ok(next.run(req).await),
        _ => {
            warn!("Unauthorized request to /v1 API: missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
