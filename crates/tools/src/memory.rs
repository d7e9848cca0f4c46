//! Memory tools: let the model search, add, list, update and delete the
//! user's long-term memories.

use async_trait::async_trait;
use concierge_core::error::ToolError;
use concierge_core::memory::{MemoryQuery, MemoryRecord};
use concierge_core::message::Message;
use concierge_core::tool::{Tool, ToolResult};
use concierge_memory::{MemoryService, MemoryServiceError};
use serde::Deserialize;
use serde_json::json;

use crate::context::parse_args;
use crate::envelope::{FailureCode, ToolEnvelope};

const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

fn record_json(record: &MemoryRecord) -> serde_json::Value {
    json!({
        "id": record.id,
        "content": record.content,
        "score": record.score,
        "metadata": record.metadata,
        "createdAt": record.created_at.to_rfc3339(),
    })
}

fn failure(error: &MemoryServiceError, memory_id: Option<&str>) -> ToolEnvelope {
    if error.is_unavailable() {
        return ToolEnvelope::failure(
            FailureCode::MemoryUnavailable,
            "Long-term memory is temporarily unavailable. Continue without it and let the user \
             know if they asked you to remember something.",
        );
    }
    if let (true, Some(id)) = (error.is_not_found(), memory_id) {
        return ToolEnvelope::failure(
            FailureCode::MemoryNotFound,
            format!("No memory with id '{id}' exists. Use search_memories or get_all_memories to find ids."),
        );
    }
    ToolEnvelope::failure(FailureCode::MemoryError, format!("Memory operation failed: {error}"))
}

/// Shared state of every memory tool.
#[derive(Clone)]
pub struct MemoryTools {
    user_id: String,
    memory: MemoryService,
}

impl MemoryTools {
    pub fn new(user_id: impl Into<String>, memory: MemoryService) -> Self {
        Self {
            user_id: user_id.into(),
            memory,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        filters: serde_json::Map<String, serde_json::Value>,
    ) -> ToolEnvelope {
        let query = MemoryQuery::new(query, &self.user_id)
            .with_limit(limit.unwrap_or_else(concierge_core::memory::default_limit).clamp(1, MAX_LIMIT))
            .with_filters(filters);
        match self.memory.search(query).await {
            Ok(records) => ToolEnvelope::ok(json!({
                "count": records.len(),
                "memories": records.iter().map(record_json).collect::<Vec<_>>(),
            })),
            Err(e) => failure(&e, None),
        }
    }

    pub async fn add(&self, content: &str, metadata: serde_json::Map<String, serde_json::Value>) -> ToolEnvelope {
        if content.trim().is_empty() {
            return ToolEnvelope::invalid_arguments("add_memory", "content must not be empty");
        }
        let mut metadata = metadata;
        metadata
            .entry("source")
            .or_insert_with(|| json!("explicit"));
        match self.memory.add(&[Message::user(content)], &self.user_id, metadata).await {
            Ok(ids) => ToolEnvelope::ok(json!({ "stored": true, "ids": ids })),
            Err(e) => failure(&e, None),
        }
    }

    pub async fn get_all(&self, limit: Option<usize>) -> ToolEnvelope {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIMIT);
        match self.memory.get_all(&self.user_id, limit).await {
            Ok(records) => ToolEnvelope::ok(json!({
                "count": records.len(),
                "memories": records.iter().map(record_json).collect::<Vec<_>>(),
            })),
            Err(e) => failure(&e, None),
        }
    }

    pub async fn update(&self, memory_id: &str, new_content: &str) -> ToolEnvelope {
        if new_content.trim().is_empty() {
            return ToolEnvelope::invalid_arguments("update_memory", "newContent must not be empty");
        }
        match self.memory.update(memory_id, new_content).await {
            Ok(()) => ToolEnvelope::ok(json!(format!("Memory {memory_id} updated."))),
            Err(e) => failure(&e, Some(memory_id)),
        }
    }

    pub async fn delete(&self, memory_id: &str) -> ToolEnvelope {
        match self.memory.delete(memory_id).await {
            Ok(()) => ToolEnvelope::ok(json!(format!("Memory {memory_id} deleted."))),
            Err(e) => failure(&e, Some(memory_id)),
        }
    }
}

// --- Tools ---

pub struct SearchMemoriesTool(pub MemoryTools);
pub struct AddMemoryTool(pub MemoryTools);
pub struct GetAllMemoriesTool(pub MemoryTools);
pub struct UpdateMemoryTool(pub MemoryTools);
pub struct DeleteMemoryTool(pub MemoryTools);

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    filters: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
impl Tool for SearchMemoriesTool {
    fn name(&self) -> &str {
        "search_memories"
    }

    fn description(&self) -> &str {
        "Search the user's long-term memory for facts, preferences and past conversations \
         relevant to a query."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Maximum results (default 5)" },
                "filters": {
                    "type": "object",
                    "description": "Optional metadata filters, e.g. {\"category\": \"travel\"}"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let envelope = match parse_args::<SearchArgs>(self.name(), arguments) {
            Ok(args) => self.0.search(&args.query, args.limit, args.filters).await,
            Err(envelope) => envelope,
        };
        Ok(envelope.into_tool_result())
    }
}

#[derive(Deserialize)]
struct AddArgs {
    content: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
impl Tool for AddMemoryTool {
    fn name(&self) -> &str {
        "add_memory"
    }

    fn description(&self) -> &str {
        "Store a fact or preference in the user's long-term memory. Use when the user asks you \
         to remember something."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" },
                "metadata": { "type": "object", "description": "Optional metadata, e.g. a category" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let envelope = match parse_args::<AddArgs>(self.name(), arguments) {
            Ok(args) => self.0.add(&args.content, args.metadata).await,
            Err(envelope) => envelope,
        };
        Ok(envelope.into_tool_result())
    }
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for GetAllMemoriesTool {
    fn name(&self) -> &str {
        "get_all_memories"
    }

    fn description(&self) -> &str {
        "List the user's stored memories, newest first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Maximum results (default 10)" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let envelope = match parse_args::<ListArgs>(self.name(), arguments) {
            Ok(args) => self.0.get_all(args.limit).await,
            Err(envelope) => envelope,
        };
        Ok(envelope.into_tool_result())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArgs {
    memory_id: String,
    new_content: String,
}

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str {
        "update_memory"
    }

    fn description(&self) -> &str {
        "Replace the content of a stored memory by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "memoryId": { "type": "string" },
                "newContent": { "type": "string" }
            },
            "required": ["memoryId", "newContent"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let envelope = match parse_args::<UpdateArgs>(self.name(), arguments) {
            Ok(args) => self.0.update(&args.memory_id, &args.new_content).await,
            Err(envelope) => envelope,
        };
        Ok(envelope.into_tool_result())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    memory_id: String,
}

#[async_trait]
impl Tool for DeleteMemoryTool {
    fn name(&self) -> &str {
        "delete_memory"
    }

    fn description(&self) -> &str {
        "Delete a stored memory by id. Use when the user asks you to forget something."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "memoryId": { "type": "string" }
            },
            "required": ["memoryId"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let envelope = match parse_args::<DeleteArgs>(self.name(), arguments) {
            Ok(args) => self.0.delete(&args.memory_id).await,
            Err(envelope) => envelope,
        };
        Ok(envelope.into_tool_result())
    }
}
