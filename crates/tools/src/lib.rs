//! Tool adapters for Concierge.
//!
//! Each adapter resolves the user's credential, calls one external API and
//! normalizes the answer into a [`ToolEnvelope`]. A registry is built per
//! request by [`user_registry`], so every tool carries the identity of the
//! user it acts for.

pub mod context;
pub mod envelope;
pub mod github;
pub mod google;
pub mod linkedin;
pub mod memory;

pub use context::ToolContext;
pub use envelope::{AdapterFailure, Attempt, FailureCode, ToolEnvelope};

use concierge_core::tool::ToolRegistry;
use concierge_core::user::{Capability, UserPreferences};
use concierge_memory::MemoryService;

use crate::memory::MemoryTools;

/// Every tool, bound to `ctx.user_id`.
pub fn user_registry(ctx: &ToolContext, memory: &MemoryService) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_calendar(&mut registry, ctx);
    register_documents(&mut registry, ctx);
    register_email(&mut registry, ctx);
    register_github(&mut registry, ctx);
    registry.register(Box::new(linkedin::GetLinkedinProfileTool::new(ctx.clone())));
    register_memory(&mut registry, MemoryTools::new(ctx.user_id.clone(), memory.clone()));
    registry
}

/// Only the tools whose capability the user has enabled.
pub fn registry_for_preferences(
    ctx: &ToolContext,
    memory: &MemoryService,
    preferences: &UserPreferences,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if preferences.allows(Capability::Calendar) {
        register_calendar(&mut registry, ctx);
    }
    if preferences.allows(Capability::Documents) {
        register_documents(&mut registry, ctx);
    }
    if preferences.allows(Capability::Email) {
        register_email(&mut registry, ctx);
    }
    if preferences.allows(Capability::Github) {
        register_github(&mut registry, ctx);
    }
    if preferences.allows(Capability::Linkedin) {
        registry.register(Box::new(linkedin::GetLinkedinProfileTool::new(ctx.clone())));
    }
    if preferences.allows(Capability::Memory) {
        register_memory(&mut registry, MemoryTools::new(ctx.user_id.clone(), memory.clone()));
    }
    registry
}

fn register_calendar(registry: &mut ToolRegistry, ctx: &ToolContext) {
    registry.register(Box::new(google::calendar::ListCalendarEventsTool::new(ctx.clone())));
    registry.register(Box::new(google::calendar::CreateCalendarEventTool::new(ctx.clone())));
    registry.register(Box::new(google::calendar::DeleteCalendarEventTool::new(ctx.clone())));
}

fn register_documents(registry: &mut ToolRegistry, ctx: &ToolContext) {
    registry.register(Box::new(google::docs::ListDocumentsTool::new(ctx.clone())));
    registry.register(Box::new(google::docs::GetDocumentContentTool::new(ctx.clone())));
}

fn register_email(registry: &mut ToolRegistry, ctx: &ToolContext) {
    registry.register(Box::new(google::gmail::ListGmailMessagesTool::new(ctx.clone())));
    registry.register(Box::new(google::gmail::ReadGmailMessageTool::new(ctx.clone())));
    registry.register(Box::new(google::gmail::SendGmailMessageTool::new(ctx.clone())));
}

fn register_github(registry: &mut ToolRegistry, ctx: &ToolContext) {
    registry.register(Box::new(github::ListGithubPullRequestsTool::new(ctx.clone())));
    registry.register(Box::new(github::GetGithubPullRequestDetailsTool::new(ctx.clone())));
}

fn register_memory(registry: &mut ToolRegistry, tools: MemoryTools) {
    registry.register(Box::new(memory::SearchMemoriesTool(tools.clone())));
    registry.register(Box::new(memory::AddMemoryTool(tools.clone())));
    registry.register(Box::new(memory::GetAllMemoriesTool(tools.clone())));
    registry.register(Box::new(memory::UpdateMemoryTool(tools.clone())));
    registry.register(Box::new(memory::DeleteMemoryTool(tools)));
}
