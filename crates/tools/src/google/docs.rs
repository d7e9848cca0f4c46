//! Google Docs: list documents through Drive, read one through the Docs API.

use async_trait::async_trait;
use concierge_core::credential::ProviderKind;
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use serde_json::json;

use super::{clamp_max_results, parse_google_error};
use crate::context::{ToolContext, endpoint, parse_args, read_json, send, with_defaults};
use crate::envelope::{AdapterFailure, Attempt, FailureCode, ToolEnvelope, settle};

const PROVIDER: ProviderKind = ProviderKind::Google;
const DEFAULT_MAX_RESULTS: u32 = 10;

/// Longest document body handed to the model.
pub const MAX_DOCUMENT_CHARS: usize = 20_000;

#[derive(Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: Option<String>,
    name: Option<String>,
    modified_time: Option<String>,
    web_view_link: Option<String>,
}

/// Just enough of the Docs structure to pull text out.
#[derive(Deserialize)]
struct Document {
    title: Option<String>,
    #[serde(rename = "documentId")]
    document_id: Option<String>,
    body: Option<Body>,
}

#[derive(Deserialize)]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Deserialize)]
struct StructuralElement {
    paragraph: Option<Paragraph>,
    table: Option<Table>,
}

#[derive(Deserialize)]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
}

#[derive(Deserialize)]
struct TextRun {
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    table_rows: Vec<TableRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    #[serde(default)]
    table_cells: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

fn flatten(elements: &[StructuralElement], out: &mut String) {
    for element in elements {
        if let Some(paragraph) = &element.paragraph {
            for run in paragraph.elements.iter().filter_map(|e| e.text_run.as_ref()) {
                if let Some(text) = &run.content {
                    out.push_str(text);
                }
            }
        }
        if let Some(table) = &element.table {
            for cell in table.table_rows.iter().flat_map(|r| &r.table_cells) {
                flatten(&cell.content, out);
            }
        }
    }
}

/// Cap `text` at [`MAX_DOCUMENT_CHARS`] characters, marking the cut.
pub fn truncate_document(text: &str) -> (String, bool) {
    match text.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((cut, _)) => (
            format!("{}\n\n[Document truncated at {MAX_DOCUMENT_CHARS} characters]", &text[..cut]),
            true,
        ),
        None => (text.to_string(), false),
    }
}

/// Most recently modified Google Docs first.
pub async fn list_documents(ctx: &ToolContext, max_results: Option<i64>) -> Result<ToolEnvelope, ToolError> {
    settle(try_list_documents(ctx, max_results).await)
}

async fn try_list_documents(ctx: &ToolContext, max_results: Option<i64>) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "list_documents").await?;
    let mut url = endpoint(&ctx.endpoints.google_drive, &["files"])?;
    url.query_pairs_mut()
        .append_pair("q", "mimeType = 'application/vnd.google-apps.document' and trashed = false")
        .append_pair("orderBy", "modifiedTime desc")
        .append_pair("pageSize", &clamp_max_results(max_results, DEFAULT_MAX_RESULTS).to_string())
        .append_pair("fields", "files(id,name,modifiedTime,webViewLink)");

    let response = send(with_defaults(ctx.http.get(url), &token), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let body: FilesResponse = read_json(PROVIDER, response).await?;

    let documents: Vec<_> = body
        .files
        .into_iter()
        .map(|f| {
            json!({
                "id": f.id,
                "name": f.name,
                "modifiedTime": f.modified_time,
                "link": f.web_view_link,
            })
        })
        .collect();
    Ok(json!({ "count": documents.len(), "documents": documents }))
}

pub async fn get_document_content(ctx: &ToolContext, document_id: &str) -> Result<ToolEnvelope, ToolError> {
    settle(try_get_document_content(ctx, document_id).await)
}

async fn try_get_document_content(ctx: &ToolContext, document_id: &str) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "get_document_content").await?;
    let url = endpoint(&ctx.endpoints.google_docs, &["documents", document_id])?;
    let response = send(with_defaults(ctx.http.get(url), &token), parse_google_error)
        .await
        .map_err(|e| match e.status() {
            Some(404) => AdapterFailure::from(ToolEnvelope::failure(
                FailureCode::DocNotFound,
                format!(
                    "No document with id '{document_id}' was found. Use list_documents to find \
                     the right id."
                ),
            )),
            _ => e.into_failure(PROVIDER),
        })?;
    let document: Document = read_json(PROVIDER, response).await?;

    let mut text = String::new();
    if let Some(body) = &document.body {
        flatten(&body.content, &mut text);
    }
    let (content, truncated) = truncate_document(text.trim());
    Ok(json!({
        "id": document.document_id.unwrap_or_else(|| document_id.to_string()),
        "title": document.title,
        "content": content,
        "truncated": truncated,
    }))
}

// --- Tools ---

pub struct ListDocumentsTool {
    ctx: ToolContext,
}

impl ListDocumentsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default)]
    max_results: Option<i64>,
}

#[async_trait]
impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        "list_documents"
    }

    fn description(&self) -> &str {
        "List the user's Google Docs, most recently modified first, with their ids."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "maxResults": {
                    "type": "integer",
                    "description": "Maximum number of documents to return (1-50, default 10)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: ListArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(list_documents(&self.ctx, args.max_results).await?.into_tool_result())
    }
}

pub struct GetDocumentContentTool {
    ctx: ToolContext,
}

impl GetDocumentContentTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetArgs {
    document_id: String,
}

#[async_trait]
impl Tool for GetDocumentContentTool {
    fn name(&self) -> &str {
        "get_document_content"
    }

    fn description(&self) -> &str {
        "Read the text of a Google Doc by id. Long documents are truncated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "documentId": { "type": "string", "description": "The Google Docs document id" }
            },
            "required": ["documentId"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: GetArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(get_document_content(&self.ctx, &args.document_id).await?.into_tool_result())
    }
}
