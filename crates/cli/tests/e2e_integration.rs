//! End-to-end tests for the Concierge assistant.
//!
//! These drive the full turn pipeline (context assembly, the agent loop,
//! real adapters against mock upstreams, formatting and memory) through
//! public APIs only.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use concierge_agent::{AgentLoop, ContextAssembler, UserToolset};
use concierge_channels::whatsapp::schema::{
    MAX_REPLY_TITLE_CHARS, MAX_ROW_DESCRIPTION_CHARS, MAX_ROW_TITLE_CHARS, MAX_SECTION_TITLE_CHARS,
};
use concierge_channels::{StructuredMessage, parse_model_output};
use concierge_config::EndpointsConfig;
use concierge_core::error::{MemoryError, ProviderError};
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
use concierge_core::message::{Message, MessageToolCall, Role};
use concierge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use concierge_core::thread::{Checkpointer, ThreadStore};
use concierge_core::tool::ToolCall;
use concierge_core::{ChannelKind, ProviderKind, User};
use concierge_credentials::StaticCredentialResolver;
use concierge_memory::{InMemoryBackend, MemoryService, RetryPolicy};
use concierge_store::InMemoryStore;
use concierge_tools::google::gmail::EMAIL_SIGNATURE;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted responses in order, then fails.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<ProviderResponse>>,
    call_count: std::sync::Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    fn text(response: &str) -> Self {
        Self::new(vec![text_response(response)])
    }

    fn tool_then_text(tool_call: MessageToolCall, answer: &str) -> Self {
        Self::new(vec![tool_response(vec![tool_call]), text_response(answer)])
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let Some(response) = responses.get(*count).cloned() else {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted at call #{}", *count),
            });
        };
        *count += 1;
        Ok(response)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "e2e-model".into(),
    }
}

fn tool_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls("", tool_calls),
        usage: usage(),
        model: "e2e-model".into(),
    }
}

fn call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

// ── Memory backends ──────────────────────────────────────────────────────

/// Refuses every connection and counts the attempts.
#[derive(Default)]
struct RefusingBackend {
    searches: AtomicUsize,
}

#[async_trait::async_trait]
impl MemoryBackend for RefusingBackend {
    fn name(&self) -> &str {
        "refusing"
    }

    async fn search(&self, _query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Err(MemoryError::Unreachable("connect ECONNREFUSED 127.0.0.1:8888".into()))
    }

    async fn add(
        &self,
        _messages: &[Message],
        _user_id: &str,
        _metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, MemoryError> {
        Err(MemoryError::Unreachable("connect ECONNREFUSED 127.0.0.1:8888".into()))
    }

    async fn get_all(&self, _user_id: &str, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        Err(MemoryError::Unreachable("connect ECONNREFUSED 127.0.0.1:8888".into()))
    }

    async fn update(&self, _memory_id: &str, _content: &str) -> Result<(), MemoryError> {
        Err(MemoryError::Unreachable("connect ECONNREFUSED 127.0.0.1:8888".into()))
    }

    async fn delete(&self, _memory_id: &str) -> Result<(), MemoryError> {
        Err(MemoryError::Unreachable("connect ECONNREFUSED 127.0.0.1:8888".into()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<InMemoryStore>,
    memory: MemoryService,
    events: Arc<EventBus>,
    toolset: Arc<UserToolset>,
}

impl Harness {
    /// Real adapters pointed at `base`, with a credential resolver that
    /// either hands out a fixed token or reports no linked account.
    fn new(base: &str, credentials: StaticCredentialResolver, memory: MemoryService) -> Self {
        let toolset = Arc::new(UserToolset::new(
            Arc::new(credentials),
            reqwest::Client::new(),
            Arc::new(EndpointsConfig::all_at(base)),
            memory.clone(),
        ));
        Self {
            store: Arc::new(InMemoryStore::new()),
            memory,
            events: Arc::new(EventBus::default()),
            toolset,
        }
    }

    fn offline() -> Self {
        Self::new(
            "http://127.0.0.1:1",
            StaticCredentialResolver::unlinked(),
            MemoryService::new(Arc::new(InMemoryBackend::new())),
        )
    }

    fn agent(&self, provider: Arc<dyn Provider>) -> AgentLoop {
        let assembler = Arc::new(ContextAssembler::new(
            self.memory.clone(),
            self.store.clone(),
            self.events.clone(),
        ));
        AgentLoop::new(
            provider,
            "e2e-model",
            assembler,
            self.store.clone(),
            self.toolset.clone(),
            self.events.clone(),
        )
    }

    async fn tool_message(&self, thread_id: &str) -> String {
        let checkpoint = self.store.load(thread_id).await.unwrap().unwrap();
        checkpoint
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .expect("no tool message in checkpoint")
    }
}

fn alice() -> User {
    let mut user = User::new("alice");
    user.name = Some("Alice".into());
    user
}

// ── Formatting ───────────────────────────────────────────────────────────

#[test]
fn malformed_model_output_always_yields_a_valid_text_envelope() {
    let inputs = [
        "",
        "   ",
        "{",
        "{\"type\": \"list\"}",
        "```json\n{\"type\": \"button\", \"body\": {\"text\": \"\"}}\n```",
        "[1, 2, 3]",
        "null",
        "Plain words with a stray } brace",
    ];

    for raw in inputs {
        let message = parse_model_output(raw);
        let value: serde_json::Value = serde_json::from_str(&message.to_json()).unwrap();
        assert!(value["type"].is_string(), "input {raw:?}");
        assert!(value["message_type"].is_string(), "input {raw:?}");
        if let StructuredMessage::Text(text) = &message {
            assert!(!text.text.trim().is_empty(), "input {raw:?} produced empty text");
        }
    }
}

#[test]
fn interactive_payloads_are_truncated_to_platform_limits() {
    let long = "x".repeat(120);
    let list = json!({
        "type": "list",
        "body": {"text": "Pick one"},
        "action": {
            "button": long,
            "sections": [{
                "title": long,
                "rows": [{"id": "r1", "title": long, "description": long}]
            }]
        }
    });
    let StructuredMessage::List(list) = parse_model_output(&list.to_string()) else {
        panic!("expected a list message");
    };
    let section = &list.action.sections[0];
    assert_eq!(section.title.as_deref().unwrap().chars().count(), MAX_SECTION_TITLE_CHARS);
    assert_eq!(section.rows[0].title.chars().count(), MAX_ROW_TITLE_CHARS);
    assert_eq!(
        section.rows[0].description.as_deref().unwrap().chars().count(),
        MAX_ROW_DESCRIPTION_CHARS
    );

    let buttons = json!({
        "type": "button",
        "body": {"text": "Confirm?"},
        "action": {"buttons": [{"type": "reply", "reply": {"id": "yes", "title": long}}]}
    });
    let StructuredMessage::Button(buttons) = parse_model_output(&buttons.to_string()) else {
        panic!("expected a button message");
    };
    assert_eq!(buttons.action.buttons[0].reply.title.chars().count(), MAX_REPLY_TITLE_CHARS);
}

#[tokio::test]
async fn long_row_description_is_cut_in_a_whatsapp_turn() {
    let description = "d".repeat(100);
    let reply = json!({
        "message_type": "interactive",
        "type": "list",
        "body": {"text": "Your meetings today"},
        "action": {
            "button": "View",
            "sections": [{
                "title": "Today",
                "rows": [{"id": "evt_1", "title": "Standup", "description": description}]
            }]
        }
    });
    let h = Harness::offline();
    let agent = h.agent(Arc::new(ScriptedProvider::text(&reply.to_string())));

    let outcome = agent.run(&alice(), ChannelKind::WhatsApp, "What's on today?").await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&outcome.reply).unwrap();
    let sent = value["action"]["sections"][0]["rows"][0]["description"].as_str().unwrap();
    assert_eq!(sent.chars().count(), 72);
    assert!(matches!(outcome.structured, Some(StructuredMessage::List(_))));
}

// ── Memory degradation ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refused_memory_is_skipped_within_the_attempt_budget() {
    let backend = Arc::new(RefusingBackend::default());
    let memory = MemoryService::new(backend.clone()).with_policy(RetryPolicy {
        max_attempts: 3,
        ..RetryPolicy::default()
    });

    assert!(memory.safe_search("dentist", "alice", 5).await.is_none());
    let attempts = backend.searches.load(Ordering::SeqCst);
    assert!((1..=3).contains(&attempts), "made {attempts} attempts");
}

#[tokio::test(start_paused = true)]
async fn turn_completes_while_memory_is_down() {
    let backend = Arc::new(RefusingBackend::default());
    let memory = MemoryService::new(backend.clone());
    let h = Harness::new("http://127.0.0.1:1", StaticCredentialResolver::unlinked(), memory);
    let mut rx = h.events.subscribe();
    let provider = Arc::new(ScriptedProvider::text("Your dentist appointment is on Friday."));
    let agent = h.agent(provider.clone());

    let outcome = agent.run(&alice(), ChannelKind::Web, "When is my dentist?").await.unwrap();
    assert_eq!(outcome.reply, "Your dentist appointment is on Friday.");
    assert!(outcome.memory_degraded);
    assert_eq!(provider.calls(), 1);
    outcome.ingestion.await.unwrap();

    let mut degraded = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.as_ref(), DomainEvent::MemoryDegraded { .. }) {
            degraded += 1;
        }
    }
    assert!(degraded >= 1);
}

#[tokio::test]
async fn exchange_is_remembered_for_the_next_turn() {
    let h = Harness::offline();
    let first = h
        .agent(Arc::new(ScriptedProvider::text("Noted, you prefer aisle seats.")))
        .run(&alice(), ChannelKind::Web, "I always prefer aisle seats")
        .await
        .unwrap();
    first.ingestion.await.unwrap();

    let records = h.memory.safe_search("aisle seats", "alice", 5).await.unwrap();
    assert!(!records.is_empty());
}

// ── Credentials ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unlinked_accounts_return_guidance_codes() {
    let h = Harness::offline();
    let ctx = h.toolset.context_for("alice");
    let registry = concierge_tools::user_registry(&ctx, &h.memory);

    let cases = [
        ("list_calendar_events", ProviderKind::Google),
        ("list_gmail_messages", ProviderKind::Google),
        ("list_github_pull_requests", ProviderKind::Github),
        ("get_linkedin_profile", ProviderKind::Linkedin),
    ];
    for (tool, provider) in cases {
        let result = registry
            .execute(&ToolCall {
                id: format!("call_{tool}"),
                name: tool.into(),
                arguments: json!({}),
            })
            .await
            .unwrap();
        assert!(!result.success, "{tool}");
        let code = format!("NO_{}_ACCOUNT", provider.code_prefix());
        assert_eq!(result.data.unwrap()["code"], code.as_str(), "{tool}");
        assert!(
            result
                .output
                .contains(&format!("You don't have a {} account connected", provider.display_name())),
            "{tool}: {}",
            result.output
        );
    }
}

#[tokio::test]
async fn github_request_without_account_is_explained() {
    let h = Harness::offline();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        call("list_github_pull_requests", json!({})),
        "You'll need to connect GitHub first.",
    ));
    let agent = h.agent(provider.clone());

    let outcome = agent.run(&alice(), ChannelKind::Web, "What PRs need my review?").await.unwrap();
    assert_eq!(outcome.reply, "You'll need to connect GitHub first.");
    assert_eq!(outcome.tool_calls_made, 1);
    assert_eq!(provider.calls(), 2);

    let tool_message = h.tool_message(&outcome.thread_id).await;
    assert!(tool_message.starts_with("You don't have a GitHub account connected"));
}

// ── Adapters ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_event_date_never_reaches_the_calendar() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "evt_1"})))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::new(
        &server.uri(),
        StaticCredentialResolver::new("ya29.token"),
        MemoryService::new(Arc::new(InMemoryBackend::new())),
    );
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        call(
            "create_calendar_event",
            json!({"summary": "Sync", "start": "not-a-date", "end": "2025-03-14T10:00:00-05:00"}),
        ),
        "That date didn't work, could you give me an exact time?",
    ));
    let agent = h.agent(provider);

    let outcome = agent.run(&alice(), ChannelKind::Web, "Book a sync").await.unwrap();
    assert!(outcome.reply.contains("exact time"));

    let tool_message = h.tool_message(&outcome.thread_id).await;
    assert!(tool_message.contains("Invalid date format for 'start'"));
    assert!(tool_message.contains("YYYY-MM-DDTHH:MM:SS±HH:MM"));
    server.verify().await;
}

#[tokio::test]
async fn sent_email_always_ends_with_the_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1", "threadId": "t1"})))
        .mount(&server)
        .await;

    let h = Harness::new(
        &server.uri(),
        StaticCredentialResolver::new("ya29.token"),
        MemoryService::new(Arc::new(InMemoryBackend::new())),
    );
    let ctx = h.toolset.context_for("alice");
    let registry = concierge_tools::user_registry(&ctx, &h.memory);

    let bodies = [
        "See you Friday.",
        "Thanks!\n\nAlice\n\n",
        "",
        "Forwarding below.\n--\nOld signature",
    ];
    for body in bodies {
        let result = registry
            .execute(&ToolCall {
                id: "call_send".into(),
                name: "send_gmail_message".into(),
                arguments: json!({"to": "sam@example.com", "subject": "Hello", "body": body}),
            })
            .await
            .unwrap();
        assert!(result.success, "body {body:?}: {}", result.output);
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), bodies.len());
    for request in requests {
        let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(payload["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.ends_with(EMAIL_SIGNATURE), "raw message {raw:?}");
    }
}

// ── Threads ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn thread_lookup_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let first = store.get_or_create_thread_id("alice").await.unwrap();
    let second = store.get_or_create_thread_id("alice").await.unwrap();
    let other = store.get_or_create_thread_id("bob").await.unwrap();
    assert_eq!(first, second);
    assert_ne!(first, other);

    let concurrent = concurrent_lookups(store.clone(), "carol").await;
    assert!(concurrent.windows(2).all(|w| w[0] == w[1]));
}

async fn concurrent_lookups(store: Arc<InMemoryStore>, user_id: &'static str) -> Vec<String> {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.get_or_create_thread_id(user_id).await.unwrap() })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids
}

#[tokio::test]
async fn consecutive_turns_share_one_thread() {
    let h = Harness::offline();
    let provider = Arc::new(ScriptedProvider::new(vec![
        text_response("Hi Alice."),
        text_response("You said hello earlier."),
    ]));
    let agent = h.agent(provider);

    let first = agent.run(&alice(), ChannelKind::Web, "Hello").await.unwrap();
    let second = agent.run(&alice(), ChannelKind::WhatsApp, "What did I say?").await.unwrap();
    assert_eq!(first.thread_id, second.thread_id);

    let checkpoint = h.store.load(&second.thread_id).await.unwrap().unwrap();
    let users: Vec<_> = checkpoint.messages.iter().filter(|m| m.role == Role::User).collect();
    assert_eq!(users.len(), 2);
}
