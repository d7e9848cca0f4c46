//! The Concierge agent.
//!
//! A turn follows a **think → act → observe** cycle:
//!
//! 1. **Assemble** the system prompt, recalled memories and the new message
//! 2. **Ask the model**, offering the tools the user has enabled
//! 3. **If tool calls**: execute them, checkpoint the results, go back to 2
//! 4. **If text**: format it for the channel and return it
//!
//! The loop stops at the first text answer or at the iteration cap.

pub mod briefing;
pub mod context;
pub mod loop_runner;
pub mod prompts;
pub mod stream_event;
pub mod toolset;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use briefing::{Briefing, BriefingGenerator, BriefingMaterial, Section};
pub use context::{AssembledContext, ContextAssembler};
pub use loop_runner::{AgentLoop, TURN_FAILED_MESSAGE, TurnOutcome};
pub use stream_event::AgentStreamEvent;
pub use toolset::{ToolsetFactory, UserToolset};
