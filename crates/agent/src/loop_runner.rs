//! The tool-calling agent loop.
//!
//! One turn moves through these states:
//!
//! ```text
//! assembling-context -> model-thinking -> (tool-executing -> model-thinking)* -> final-answer
//!                                                                            \-> aborted
//! ```
//!
//! Tool failures and memory failures are data the model reads. Provider,
//! store and credential-store failures abort the turn with an `Err`.
//!
//! The loop runs in one of two modes. Web turns stream text chunks to the
//! caller as they arrive. WhatsApp turns ask the model for a JSON object and
//! pass the final answer through the channel formatter. Both use the same
//! tools and the same checkpointed thread.

use chrono::Utc;
use concierge_channels::whatsapp::formatter::EMPTY_REPLY_TEXT;
use concierge_channels::{StructuredMessage, parse_model_output};
use concierge_core::channel::ChannelKind;
use concierge_core::error::{Error, ProviderError, ToolError};
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::message::{Message, MessageToolCall};
use concierge_core::provider::{Provider, ProviderRequest, ResponseFormat, Usage};
use concierge_core::thread::{Checkpoint, Checkpointer};
use concierge_core::tool::{ToolCall, ToolRegistry};
use concierge_core::user::User;
use concierge_tools::ToolEnvelope;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::{ContextAssembler, history_window, repair_dangling_tool_calls};
use crate::prompts::MAX_ITERATIONS_REPLY;
use crate::stream_event::AgentStreamEvent;
use crate::toolset::ToolsetFactory;

/// Shown to the web client when a turn aborts.
pub const TURN_FAILED_MESSAGE: &str =
    "Sorry, something went wrong while working on that. Please try again in a moment.";

/// The result of one completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub thread_id: String,
    /// What gets delivered: plain text on the web, the formatted JSON
    /// message on WhatsApp.
    pub reply: String,
    /// The validated message, for structured turns.
    pub structured: Option<StructuredMessage>,
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub usage: Option<Usage>,
    pub memory_degraded: bool,
    /// Post-turn memory ingestion, running detached.
    pub ingestion: JoinHandle<()>,
}

/// One model step, after any streaming has been merged.
struct Step {
    message: Message,
    usage: Option<Usage>,
    model: String,
}

fn add_usage(total: &mut Option<Usage>, step: Option<Usage>) {
    let Some(step) = step else { return };
    match total {
        Some(t) => {
            t.prompt_tokens += step.prompt_tokens;
            t.completion_tokens += step.completion_tokens;
            t.total_tokens += step.total_tokens;
        }
        None => *total = Some(step),
    }
}

async fn emit(sink: Option<&mpsc::Sender<AgentStreamEvent>>, event: AgentStreamEvent) {
    if let Some(tx) = sink {
        // A disconnected client does not stop the turn.
        let _ = tx.send(event).await;
    }
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    assembler: Arc<ContextAssembler>,
    checkpoints: Arc<dyn Checkpointer>,
    toolset: Arc<dyn ToolsetFactory>,
    event_bus: Arc<EventBus>,
    max_iterations: usize,
    history_window: usize,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        assembler: Arc<ContextAssembler>,
        checkpoints: Arc<dyn Checkpointer>,
        toolset: Arc<dyn ToolsetFactory>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            assembler,
            checkpoints,
            toolset,
            event_bus,
            max_iterations: 10,
            history_window: 40,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Maximum model steps per turn.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Maximum checkpointed messages sent to the model.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one turn without streaming. WhatsApp turns come back formatted.
    pub async fn run(&self, user: &User, channel: ChannelKind, text: &str) -> Result<TurnOutcome, Error> {
        self.run_turn(user, channel, text, None).await
    }

    /// Run one web turn, streaming events as it goes.
    ///
    /// The receiver always ends with either `done` or `error`.
    pub fn run_stream(self: Arc<Self>, user: User, text: String) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel::<AgentStreamEvent>(128);
        tokio::spawn(async move {
            let event = match self.run_turn(&user, ChannelKind::Web, &text, Some(&tx)).await {
                Ok(outcome) => AgentStreamEvent::Done {
                    thread_id: outcome.thread_id,
                    reply: outcome.reply,
                    usage: outcome.usage,
                    iterations: outcome.iterations,
                    tool_calls_made: outcome.tool_calls_made,
                },
                Err(_) => AgentStreamEvent::Error {
                    message: TURN_FAILED_MESSAGE.into(),
                },
            };
            let _ = tx.send(event).await;
        });
        rx
    }

    async fn run_turn(
        &self,
        user: &User,
        channel: ChannelKind,
        text: &str,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnOutcome, Error> {
        match self.drive(user, channel, text, sink).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(user_id = %user.id, channel = %channel, error = %e, "Turn aborted");
                self.event_bus.publish(DomainEvent::TurnFailed {
                    user_id: user.id.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        user: &User,
        channel: ChannelKind,
        text: &str,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnOutcome, Error> {
        let assembled = self
            .assembler
            .assemble(user, channel, vec![Message::user(text)])
            .await?;
        let thread_id = assembled.thread_id.clone();
        info!(user_id = %user.id, thread_id = %thread_id, channel = %channel, "Turn started");
        self.event_bus.publish(DomainEvent::TurnStarted {
            user_id: user.id.clone(),
            thread_id: thread_id.clone(),
            channel,
            timestamp: Utc::now(),
        });

        let mut checkpoint = self
            .checkpoints
            .load(&thread_id)
            .await?
            .unwrap_or_else(|| Checkpoint::empty(&thread_id));
        let repaired = repair_dangling_tool_calls(&mut checkpoint);
        if repaired > 0 {
            warn!(thread_id = %thread_id, repaired, "Closed tool calls left open by an interrupted turn");
        }
        checkpoint.messages.extend(assembled.conversation().iter().cloned());
        self.save(&mut checkpoint).await?;

        let tools = self.toolset.build(user);
        let definitions = tools.definitions();
        let preamble = assembled.preamble();
        let response_format = if channel.is_structured() {
            ResponseFormat::JsonObject
        } else {
            ResponseFormat::Text
        };

        let mut usage = None;
        let mut tool_calls_made = 0;
        let mut final_text = None;
        let mut iterations = 0;
        let mut model = self.model.clone();

        while iterations < self.max_iterations {
            iterations += 1;
            debug!(thread_id = %thread_id, iteration = iterations, "Agent loop iteration");

            let mut messages = preamble.to_vec();
            messages.extend_from_slice(history_window(&checkpoint.messages, self.history_window));
            let request = ProviderRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
                stream: sink.is_some(),
                response_format,
            };

            let step = self.model_step(request, sink).await?;
            add_usage(&mut usage, step.usage);
            model = step.model;

            if step.message.tool_calls.is_empty() {
                final_text = Some(step.message.content);
                break;
            }

            let calls = step.message.tool_calls.clone();
            checkpoint.messages.push(step.message);
            self.save(&mut checkpoint).await?;

            for tc in &calls {
                tool_calls_made += 1;
                let output = self.execute_tool(&tools, user, tc, sink).await?;
                checkpoint.messages.push(Message::tool_result(&tc.id, output));
                self.save(&mut checkpoint).await?;
            }
        }

        let raw = final_text.unwrap_or_else(|| {
            warn!(thread_id = %thread_id, iterations, "Max tool iterations reached");
            MAX_ITERATIONS_REPLY.to_string()
        });

        let (reply, structured, remembered) = if channel.is_structured() {
            let message = parse_model_output(&raw);
            let remembered = message.body_text().to_string();
            (message.to_json(), Some(message), remembered)
        } else {
            let text = if raw.trim().is_empty() { EMPTY_REPLY_TEXT.to_string() } else { raw };
            (text.clone(), None, text)
        };

        checkpoint.messages.push(Message::assistant(&reply));
        self.save(&mut checkpoint).await?;

        self.event_bus.publish(DomainEvent::ResponseGenerated {
            user_id: user.id.clone(),
            thread_id: thread_id.clone(),
            model,
            tokens_used: usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
            iterations,
            timestamp: Utc::now(),
        });
        info!(user_id = %user.id, thread_id = %thread_id, iterations, tool_calls_made, "Turn complete");

        let ingestion = self.spawn_ingestion(user, channel, text, remembered);

        Ok(TurnOutcome {
            thread_id,
            reply,
            structured,
            iterations,
            tool_calls_made,
            usage,
            memory_degraded: assembled.memory_degraded,
            ingestion,
        })
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), Error> {
        checkpoint.step += 1;
        checkpoint.updated_at = Utc::now();
        self.checkpoints.save(checkpoint).await?;
        Ok(())
    }

    /// Call the model once, forwarding text chunks when streaming.
    async fn model_step(
        &self,
        request: ProviderRequest,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<Step, ProviderError> {
        if sink.is_none() {
            let response = self.provider.complete(request).await?;
            return Ok(Step {
                message: response.message,
                usage: response.usage,
                model: response.model,
            });
        }

        let mut stream = self.provider.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage = None;

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                content.push_str(&text);
                emit(sink, AgentStreamEvent::Chunk { content: text }).await;
            }
            for tc in chunk.tool_calls {
                match tool_calls.iter_mut().find(|t| t.id == tc.id) {
                    Some(existing) => existing.arguments.push_str(&tc.arguments),
                    None => tool_calls.push(tc),
                }
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        Ok(Step {
            message: Message::assistant_tool_calls(content, tool_calls),
            usage,
            model: self.model.clone(),
        })
    }

    /// Run one tool call and return the text the model reads.
    ///
    /// Only infrastructure failures escape as `Err`.
    async fn execute_tool(
        &self,
        tools: &ToolRegistry,
        user: &User,
        tc: &MessageToolCall,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<String, Error> {
        let arguments = if tc.arguments.trim().is_empty() {
            Ok(serde_json::Value::Object(Default::default()))
        } else {
            serde_json::from_str::<serde_json::Value>(&tc.arguments)
        };

        emit(
            sink,
            AgentStreamEvent::ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                input: arguments.as_ref().cloned().unwrap_or(serde_json::Value::Null),
            },
        )
        .await;

        let start = std::time::Instant::now();
        let (output, success) = match arguments {
            Err(e) => {
                warn!(tool = %tc.name, error = %e, "Tool arguments are not valid JSON");
                (
                    ToolEnvelope::invalid_arguments(&tc.name, format!("arguments are not valid JSON ({e})")).render(),
                    false,
                )
            }
            Ok(arguments) => {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };
                match tools.execute(&call).await {
                    Ok(result) => (result.output, result.success),
                    Err(e @ ToolError::Infrastructure { .. }) => {
                        self.event_bus.publish(DomainEvent::ToolExecuted {
                            user_id: user.id.clone(),
                            tool_name: tc.name.clone(),
                            success: false,
                            duration_ms: start.elapsed().as_millis() as u64,
                            timestamp: Utc::now(),
                        });
                        return Err(e.into());
                    }
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool execution failed");
                        (format!("Error: {e}"), false)
                    }
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(tool = %tc.name, success, duration_ms, "Tool executed");

        self.event_bus.publish(DomainEvent::ToolExecuted {
            user_id: user.id.clone(),
            tool_name: tc.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        emit(
            sink,
            AgentStreamEvent::ToolResult {
                id: tc.id.clone(),
                name: tc.name.clone(),
                output: output.clone(),
                success,
            },
        )
        .await;
        Ok(output)
    }

    /// Store the exchange in long-term memory without holding up the reply.
    fn spawn_ingestion(&self, user: &User, channel: ChannelKind, text: &str, reply: String) -> JoinHandle<()> {
        let memory = self.assembler.memory().clone();
        let events = self.event_bus.clone();
        let user_id = user.id.clone();
        let exchange = [Message::user(text), Message::assistant(reply)];
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), serde_json::json!("conversation"));
        metadata.insert("channel".into(), serde_json::json!(channel.as_str()));

        tokio::spawn(async move {
            if memory.safe_add(&exchange, &user_id, metadata).await.is_none() {
                events.publish(DomainEvent::MemoryDegraded {
                    user_id,
                    operation: "add".into(),
                    timestamp: Utc::now(),
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response};
    use async_trait::async_trait;
    use concierge_core::error::MemoryError;
    use concierge_core::message::Role;
    use concierge_core::provider::ProviderResponse;
    use concierge_core::thread::ThreadStore;
    use concierge_core::tool::{Tool, ToolResult};
    use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
    use concierge_memory::{InMemoryBackend, MemoryService, RetryPolicy};
    use concierge_store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!("echo: {}", arguments["text"].as_str().unwrap_or_default()),
                data: None,
            })
        }
    }

    struct BrokenStoreTool;

    #[async_trait]
    impl Tool for BrokenStoreTool {
        fn name(&self) -> &str {
            "list_calendar_events"
        }
        fn description(&self) -> &str {
            "Always hits a dead credential store"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::Infrastructure {
                tool_name: "list_calendar_events".into(),
                reason: "database is locked".into(),
            })
        }
    }

    struct RefusingBackend;

    #[async_trait]
    impl MemoryBackend for RefusingBackend {
        fn name(&self) -> &str {
            "refusing"
        }
        async fn search(&self, _query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
            Err(MemoryError::Unreachable("ECONNREFUSED".into()))
        }
        async fn add(
            &self,
            _messages: &[Message],
            _user_id: &str,
            _metadata: serde_json::Map<String, serde_json::Value>,
        ) -> Result<Vec<String>, MemoryError> {
            Err(MemoryError::Unreachable("ECONNREFUSED".into()))
        }
        async fn get_all(&self, _user_id: &str, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
            Err(MemoryError::Unreachable("ECONNREFUSED".into()))
        }
        async fn update(&self, _memory_id: &str, _content: &str) -> Result<(), MemoryError> {
            Err(MemoryError::Unreachable("ECONNREFUSED".into()))
        }
        async fn delete(&self, _memory_id: &str) -> Result<(), MemoryError> {
            Err(MemoryError::Unreachable("ECONNREFUSED".into()))
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        memory: MemoryService,
        events: Arc<EventBus>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_memory(MemoryService::new(Arc::new(InMemoryBackend::new())))
        }

        fn with_memory(memory: MemoryService) -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                memory,
                events: Arc::new(EventBus::default()),
            }
        }

        fn agent(&self, provider: Arc<dyn Provider>, tools: fn(&User) -> ToolRegistry) -> AgentLoop {
            let assembler = Arc::new(ContextAssembler::new(
                self.memory.clone(),
                self.store.clone(),
                self.events.clone(),
            ));
            AgentLoop::new(
                provider,
                "mock-model",
                assembler,
                self.store.clone(),
                Arc::new(tools),
                self.events.clone(),
            )
        }
    }

    fn echo_tools(_user: &User) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    fn no_tools(_user: &User) -> ToolRegistry {
        ToolRegistry::new()
    }

    fn broken_tools(_user: &User) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(BrokenStoreTool));
        registry
    }

    #[tokio::test]
    async fn plain_answer() {
        let h = Harness::new();
        let agent = h.agent(Arc::new(SequentialMockProvider::single_text("Hello! How can I help?")), no_tools);

        let outcome = agent.run(&User::new("alice"), ChannelKind::Web, "Hello!").await.unwrap();
        assert_eq!(outcome.reply, "Hello! How can I help?");
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.structured.is_none());
        outcome.ingestion.await.unwrap();

        let checkpoint = h.store.load(&outcome.thread_id).await.unwrap().unwrap();
        assert_eq!(checkpoint.messages.len(), 2);
        assert!(checkpoint.messages.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("echo", json!({"text": "ping"}))],
            "",
            "The tool said ping.",
        ));
        let agent = h.agent(provider, echo_tools);
        let mut rx = h.events.subscribe();

        let outcome = agent.run(&User::new("alice"), ChannelKind::Web, "Echo ping").await.unwrap();
        assert_eq!(outcome.reply, "The tool said ping.");
        assert_eq!(outcome.tool_calls_made, 1);
        assert_eq!(outcome.iterations, 2);

        let checkpoint = h.store.load(&outcome.thread_id).await.unwrap().unwrap();
        let tool_msg = checkpoint.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.content, "echo: ping");
        assert!(checkpoint.pending_tool_calls().is_empty());
        assert!(checkpoint.step >= 4);

        let mut saw_tool = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::ToolExecuted { tool_name, success, .. } = event.as_ref() {
                assert_eq!(tool_name, "echo");
                assert!(success);
                saw_tool = true;
            }
        }
        assert!(saw_tool);
    }

    #[tokio::test]
    async fn structured_turn_is_formatted() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            "Sure thing!\n```json\n{\"message_type\":\"text\",\"type\":\"text\",\"text\":\"Done.\"}\n```",
        )]));
        let agent = h.agent(provider.clone(), no_tools);

        let outcome = agent.run(&User::new("alice"), ChannelKind::WhatsApp, "Thanks").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&outcome.reply).unwrap();
        assert_eq!(value["text"], "Done.");
        assert!(outcome.structured.is_some());

        let requests = provider.requests();
        assert_eq!(requests[0].response_format, ResponseFormat::JsonObject);
        assert!(requests[0].messages[0].content.contains("\"message_type\""));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("teleport", json!({}))],
            "",
            "I can't do that.",
        ));
        let agent = h.agent(provider, no_tools);

        let outcome = agent.run(&User::new("alice"), ChannelKind::Web, "Teleport me").await.unwrap();
        let checkpoint = h.store.load(&outcome.thread_id).await.unwrap().unwrap();
        let tool_msg = checkpoint.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("Tool not found"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported_not_executed() {
        let h = Harness::new();
        let mut call = make_tool_call("echo", json!({}));
        call.arguments = "{not json".into();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(vec![call], "", "Sorry."));
        let agent = h.agent(provider, echo_tools);

        let outcome = agent.run(&User::new("alice"), ChannelKind::Web, "echo").await.unwrap();
        let checkpoint = h.store.load(&outcome.thread_id).await.unwrap().unwrap();
        let tool_msg = checkpoint.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Invalid arguments for echo"));
    }

    #[tokio::test]
    async fn infrastructure_failure_aborts_the_turn() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("list_calendar_events", json!({}))],
            "",
            "never",
        ));
        let agent = h.agent(provider, broken_tools);
        let mut rx = h.events.subscribe();

        let err = agent.run(&User::new("alice"), ChannelKind::Web, "What's today?").await.unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::Infrastructure { .. })));

        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            failed |= matches!(event.as_ref(), DomainEvent::TurnFailed { .. });
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_turn() {
        let h = Harness::new();
        let agent = h.agent(Arc::new(SequentialMockProvider::new(vec![])), no_tools);
        let err = agent.run(&User::new("alice"), ChannelKind::Web, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn max_iterations_yields_apology() {
        let h = Harness::new();
        let responses: Vec<ProviderResponse> = (0..3)
            .map(|i| {
                let mut call = make_tool_call("echo", json!({"text": "again"}));
                call.id = format!("call_{i}");
                make_tool_call_response(vec![call], "")
            })
            .collect();
        let agent = h
            .agent(Arc::new(SequentialMockProvider::new(responses)), echo_tools)
            .with_max_iterations(3);

        let outcome = agent.run(&User::new("alice"), ChannelKind::WhatsApp, "loop").await.unwrap();
        assert_eq!(outcome.iterations, 3);
        let value: serde_json::Value = serde_json::from_str(&outcome.reply).unwrap();
        assert_eq!(value["message_type"], "text");
        assert_eq!(value["text"], MAX_ITERATIONS_REPLY);
    }

    #[tokio::test]
    async fn follow_up_turn_sees_history() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("Noted, Friday at 3."),
            make_text_response("You said Friday at 3."),
        ]));
        let agent = h.agent(provider.clone(), no_tools);
        let user = User::new("alice");

        let first = agent.run(&user, ChannelKind::Web, "Meeting is Friday at 3").await.unwrap();
        let second = agent.run(&user, ChannelKind::Web, "When is the meeting?").await.unwrap();
        assert_eq!(first.thread_id, second.thread_id);

        let requests = provider.requests();
        let history: Vec<&str> = requests[1]
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(
            history,
            vec!["Meeting is Friday at 3", "Noted, Friday at 3.", "When is the meeting?"]
        );
    }

    #[tokio::test]
    async fn interrupted_checkpoint_is_repaired() {
        let h = Harness::new();
        let user = User::new("alice");
        let thread_id = h.store.get_or_create_thread_id(&user.id).await.unwrap();
        let mut cp = Checkpoint::empty(&thread_id);
        cp.messages.push(Message::user("list my events"));
        cp.messages.push(Message::assistant_tool_calls("", vec![make_tool_call("echo", json!({}))]));
        h.store.save(&cp).await.unwrap();

        let agent = h.agent(Arc::new(SequentialMockProvider::single_text("Back again.")), echo_tools);
        agent.run(&user, ChannelKind::Web, "hello?").await.unwrap();

        let checkpoint = h.store.load(&thread_id).await.unwrap().unwrap();
        assert!(checkpoint.pending_tool_calls().is_empty());
        assert_eq!(checkpoint.messages[2].role, Role::Tool);
        assert_eq!(checkpoint.messages[3].content, "hello?");
    }

    #[tokio::test]
    async fn exchange_is_ingested_into_memory() {
        let h = Harness::new();
        let agent = h.agent(
            Arc::new(SequentialMockProvider::single_text("Got it, you prefer aisle seats.")),
            no_tools,
        );
        let outcome = agent
            .run(&User::new("alice"), ChannelKind::Web, "I prefer aisle seats on flights")
            .await
            .unwrap();
        outcome.ingestion.await.unwrap();

        let all = h.memory.get_all("alice", 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.metadata["source"] == "conversation"));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_memory_does_not_fail_the_turn() {
        let memory = MemoryService::new(Arc::new(RefusingBackend)).with_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        });
        let h = Harness::with_memory(memory);
        let agent = h.agent(Arc::new(SequentialMockProvider::single_text("Here you go.")), no_tools);

        let outcome = agent.run(&User::new("alice"), ChannelKind::Web, "What's up?").await.unwrap();
        assert!(outcome.memory_degraded);
        assert_eq!(outcome.reply, "Here you go.");
        outcome.ingestion.await.unwrap();
    }

    #[tokio::test]
    async fn stream_emits_chunks_tools_and_done() {
        let h = Harness::new();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("echo", json!({"text": "hi"}))],
            "",
            "All done.",
        ));
        let agent = Arc::new(h.agent(provider, echo_tools));

        let mut rx = agent.run_stream(User::new("alice"), "Echo hi".into());
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
            if let AgentStreamEvent::Done { reply, tool_calls_made, .. } = &event {
                assert_eq!(reply, "All done.");
                assert_eq!(*tool_calls_made, 1);
            }
        }
        assert_eq!(kinds, vec!["tool_call", "tool_result", "chunk", "done"]);
    }

    #[tokio::test]
    async fn stream_failure_ends_with_error_event() {
        let h = Harness::new();
        let agent = Arc::new(h.agent(Arc::new(SequentialMockProvider::new(vec![])), no_tools));

        let mut rx = agent.run_stream(User::new("alice"), "hi".into());
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        match last {
            Some(AgentStreamEvent::Error { message }) => assert_eq!(message, TURN_FAILED_MESSAGE),
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
