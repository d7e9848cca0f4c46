//! Conversation threads and agent checkpoints.
//!
//! Each user has exactly one thread. The thread id keys the checkpoint that
//! lets the agent loop resume multi-step tool use across turns and channels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::{Message, Role};

/// The agent loop's persisted state for one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,

    /// Full non-system history: user, assistant, and tool messages.
    pub messages: Vec<Message>,

    /// Model steps taken over the thread's lifetime.
    #[serde(default)]
    pub step: u64,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn empty(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            step: 0,
            updated_at: Utc::now(),
        }
    }

    /// Tool call ids requested by the last assistant message that have no
    /// matching tool result yet.
    pub fn pending_tool_calls(&self) -> Vec<String> {
        let Some(pos) = self.messages.iter().rposition(|m| m.requests_tools()) else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[pos]
            .tool_calls
            .iter()
            .filter(|tc| !answered.contains(&tc.id.as_str()))
            .map(|tc| tc.id.clone())
            .collect()
    }
}

/// Maps users to their single conversation thread.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Return the user's thread id, creating it on first use.
    /// Concurrent first calls for one user must all observe the same id.
    async fn get_or_create_thread_id(&self, user_id: &str) -> Result<String, StoreError>;
}

/// Persists and restores agent state keyed by thread id.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    fn call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "list_calendar_events".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn no_pending_calls_on_plain_history() {
        let mut cp = Checkpoint::empty("t1");
        cp.messages.push(Message::user("hi"));
        cp.messages.push(Message::assistant("hello"));
        assert!(cp.pending_tool_calls().is_empty());
    }

    #[test]
    fn detects_unanswered_tool_calls() {
        let mut cp = Checkpoint::empty("t1");
        cp.messages.push(Message::user("what's on today?"));
        cp.messages.push(Message::assistant_tool_calls("", vec![call("a"), call("b")]));
        cp.messages.push(Message::tool_result("a", "[]"));
        assert_eq!(cp.pending_tool_calls(), vec!["b".to_string()]);
    }
}
