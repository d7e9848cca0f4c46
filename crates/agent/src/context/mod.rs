//! Context for one model call: the per-turn preamble from
//! [`ContextAssembler`] plus a window over the checkpointed thread history.

pub mod assembler;
pub mod history;

pub use assembler::{AssembledContext, ContextAssembler};
pub use history::{history_window, repair_dangling_tool_calls};
