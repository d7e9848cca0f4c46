//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge assistant
//! runtime. This crate has **no framework dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Layout
//!
//! Every stateful subsystem is a trait here and an implementation elsewhere:
//! - [`Provider`]: LLM backends (`concierge-providers`)
//! - [`MemoryBackend`]: long-term semantic memory (`concierge-memory`)
//! - [`AccountStore`], [`ThreadStore`], [`Checkpointer`], [`UserDirectory`]:
//!   relational persistence (`concierge-store`)
//! - [`CredentialResolver`]: per-user OAuth tokens (`concierge-credentials`)
//! - [`Tool`]: capabilities exposed to the model (`concierge-tools`)

pub mod channel;
pub mod credential;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod thread;
pub mod tool;
pub mod user;

// Re-export key types at crate root for ergonomics
pub use channel::ChannelKind;
pub use credential::{AccessToken, AccountStore, CredentialResolver, ProviderAccount, ProviderKind};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryBackend, MemoryQuery, MemoryRecord};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk};
pub use thread::{Checkpoint, Checkpointer, ThreadStore};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use user::{Capability, CommunicationSettings, User, UserDirectory, UserPreferences};
