//! Per-turn context assembly.
//!
//! Produces `[system, memory?, ...rest]` for one turn:
//!
//! 1. **System**: taken from the incoming messages when the caller supplied
//!    one, otherwise derived from the base instructions, the channel's
//!    formatting rules, the user's profile and the current time. Derived
//!    fresh on every call.
//! 2. **Memory**: when the newest message is from the user, long-term
//!    memory is searched with its text. Hits become one context message
//!    placed right after the system message. A failed search only drops
//!    this slot.
//! 3. **Rest**: the remaining incoming messages, in order.
//!
//! The user's thread id is resolved alongside; failing to resolve it is fatal.

use chrono::{DateTime, Utc};
use concierge_core::channel::ChannelKind;
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::message::{Message, Role};
use concierge_core::thread::ThreadStore;
use concierge_core::user::User;
use concierge_memory::MemoryService;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::prompts;

/// The assembled input for one turn.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// `[system, memory?, ...rest]`
    pub messages: Vec<Message>,
    pub thread_id: String,
    /// Number of memories recalled into the context.
    pub recalled: usize,
    /// The memory search was skipped because the backend failed.
    pub memory_degraded: bool,
}

impl AssembledContext {
    /// The leading system and memory messages.
    pub fn preamble(&self) -> &[Message] {
        let count = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        &self.messages[..count]
    }

    /// Everything after the preamble.
    pub fn conversation(&self) -> &[Message] {
        &self.messages[self.preamble().len()..]
    }
}

pub struct ContextAssembler {
    memory: MemoryService,
    threads: Arc<dyn ThreadStore>,
    events: Arc<EventBus>,
    recall_limit: usize,
    clock: fn() -> DateTime<Utc>,
}

impl ContextAssembler {
    pub fn new(memory: MemoryService, threads: Arc<dyn ThreadStore>, events: Arc<EventBus>) -> Self {
        Self {
            memory,
            threads,
            events,
            recall_limit: concierge_core::memory::default_limit(),
            clock: Utc::now,
        }
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    /// Replace the clock used to stamp system prompts.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn memory(&self) -> &MemoryService {
        &self.memory
    }

    pub async fn assemble(
        &self,
        user: &User,
        channel: ChannelKind,
        mut incoming: Vec<Message>,
    ) -> Result<AssembledContext, concierge_core::Error> {
        let thread_id = self.threads.get_or_create_thread_id(&user.id).await?;

        let system = match incoming.iter().position(|m| m.role == Role::System) {
            Some(pos) => incoming.remove(pos),
            None => Message::system(prompts::system_prompt(user, channel, (self.clock)())),
        };

        let mut memory_degraded = false;
        let mut recalled = 0;
        let memory_message = match incoming.last() {
            Some(last) if last.role == Role::User && !last.content.trim().is_empty() => {
                match self.memory.safe_search(&last.content, &user.id, self.recall_limit).await {
                    Some(records) => {
                        recalled = records.len();
                        prompts::memory_context(&records).map(Message::system)
                    }
                    None => {
                        memory_degraded = true;
                        warn!(user_id = %user.id, "Assembling context without memory");
                        self.events.publish(DomainEvent::MemoryDegraded {
                            user_id: user.id.clone(),
                            operation: "search".into(),
                            timestamp: Utc::now(),
                        });
                        None
                    }
                }
            }
            _ => None,
        };
        debug!(user_id = %user.id, thread_id = %thread_id, recalled, "Context assembled");

        let messages = [Some(system), memory_message]
            .into_iter()
            .flatten()
            .chain(incoming)
            .collect();

        Ok(AssembledContext {
            messages,
            thread_id,
            recalled,
            memory_degraded,
        })
    }
}
