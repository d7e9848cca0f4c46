//! Agent-level streaming events.
//!
//! The web chat receives these over SSE, one event per variant:
//! - `chunk`       partial text from the model
//! - `tool_call`   the agent is invoking a tool
//! - `tool_result` a tool finished
//! - `done`        the turn completed
//! - `error`       the turn failed; `message` is safe to show the user

use concierge_core::provider::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn is complete.
    Done {
        thread_id: String,
        reply: String,
        usage: Option<Usage>,
        iterations: usize,
        tool_calls_made: usize,
    },

    /// The turn failed.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_with_tag() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn tool_call_serializes_input() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "list_calendar_events".into(),
            input: serde_json::json!({"maxResults": 5}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""maxResults":5"#));
    }

    #[test]
    fn done_carries_thread_and_reply() {
        let event = AgentStreamEvent::Done {
            thread_id: "thread_abc".into(),
            reply: "All set.".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            iterations: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""thread_id":"thread_abc""#));
        assert_eq!(event.event_type(), "done");
    }

    #[test]
    fn event_type_names() {
        let cases = [
            (AgentStreamEvent::Chunk { content: "x".into() }, "chunk"),
            (
                AgentStreamEvent::ToolResult {
                    id: "a".into(),
                    name: "b".into(),
                    output: "c".into(),
                    success: true,
                },
                "tool_result",
            ),
            (AgentStreamEvent::Error { message: "x".into() }, "error"),
        ];
        for (event, name) in cases {
            assert_eq!(event.event_type(), name);
        }
    }

    #[test]
    fn roundtrips_from_json() {
        let event: AgentStreamEvent = serde_json::from_str(r#"{"type":"chunk","content":"hi"}"#).unwrap();
        match event {
            AgentStreamEvent::Chunk { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
