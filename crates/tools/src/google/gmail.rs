//! Gmail: list, read and send messages for the authenticated user.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use concierge_core::credential::{AccessToken, ProviderKind};
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use serde_json::json;

use super::{clamp_max_results, parse_google_error};
use crate::context::{ToolContext, endpoint, parse_args, read_json, send, with_defaults};
use crate::envelope::{Attempt, ToolEnvelope, settle};

const PROVIDER: ProviderKind = ProviderKind::Google;
const DEFAULT_MAX_RESULTS: u32 = 10;
const MAX_BODY_CHARS: usize = 10_000;

/// Appended to every outgoing email body.
pub const EMAIL_SIGNATURE: &str = "Sent by Concierge, my AI executive assistant";

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: Option<String>,
    thread_id: Option<String>,
    snippet: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    payload: Option<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    mime_type: Option<String>,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct PartBody {
    data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: Option<String>,
    thread_id: Option<String>,
}

impl GmailMessage {
    fn header(&self, name: &str) -> Option<String> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    }
}

fn decode_part(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn find_body(part: &Part, mime: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime) {
        if let Some(text) = part.body.as_ref().and_then(|b| b.data.as_deref()).and_then(decode_part) {
            return Some(text);
        }
    }
    part.parts.iter().find_map(|p| find_body(p, mime))
}

/// Drop tags and decode the handful of entities mail clients emit.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}… [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// The body exactly as it will be sent: trailing whitespace trimmed, then
/// the signature.
pub fn compose_body(body: &str) -> String {
    format!("{}\n\n--\n{EMAIL_SIGNATURE}", body.trim_end())
}

fn sanitize_header(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ").trim().to_string()
}

fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject))
    }
}

/// Recipients as the model sends them: one string (comma separated) or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Default for Recipients {
    fn default() -> Self {
        Recipients::Many(Vec::new())
    }
}

impl Recipients {
    pub fn addresses(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Recipients::One(s) => s.split(',').collect(),
            Recipients::Many(list) => list.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(sanitize_header)
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// Input for [`send_message`].
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingEmail {
    pub to: Recipients,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Recipients,
    #[serde(default)]
    pub bcc: Recipients,
}

/// RFC 2822 message with CRLF line endings.
pub fn build_raw_message(email: &OutgoingEmail) -> String {
    let mut message = format!("To: {}\r\n", email.to.addresses().join(", "));
    let cc = email.cc.addresses();
    if !cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", cc.join(", ")));
    }
    let bcc = email.bcc.addresses();
    if !bcc.is_empty() {
        message.push_str(&format!("Bcc: {}\r\n", bcc.join(", ")));
    }
    message.push_str(&format!("Subject: {}\r\n", encode_subject(&sanitize_header(&email.subject))));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");

    let body = compose_body(&email.body)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n");
    message.push_str(&body);
    message
}

async fn fetch_metadata(ctx: &ToolContext, token: &AccessToken, id: &str) -> Attempt<serde_json::Value> {
    let mut url = endpoint(&ctx.endpoints.gmail, &["users", "me", "messages", id])?;
    url.query_pairs_mut()
        .append_pair("format", "metadata")
        .append_pair("metadataHeaders", "From")
        .append_pair("metadataHeaders", "Subject")
        .append_pair("metadataHeaders", "Date");
    let response = send(with_defaults(ctx.http.get(url), token), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let message: GmailMessage = read_json(PROVIDER, response).await?;
    Ok(json!({
        "id": message.id,
        "threadId": message.thread_id,
        "from": message.header("From"),
        "subject": message.header("Subject"),
        "date": message.header("Date"),
        "snippet": message.snippet,
        "unread": message.label_ids.iter().any(|l| l == "UNREAD"),
    }))
}

/// Message ids, then per-message metadata.
pub async fn list_messages(
    ctx: &ToolContext,
    max_results: Option<i64>,
    query: Option<&str>,
    label_ids: &[String],
) -> Result<ToolEnvelope, ToolError> {
    settle(try_list_messages(ctx, max_results, query, label_ids).await)
}

async fn try_list_messages(
    ctx: &ToolContext,
    max_results: Option<i64>,
    query: Option<&str>,
    label_ids: &[String],
) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "list_gmail_messages").await?;
    let mut url = endpoint(&ctx.endpoints.gmail, &["users", "me", "messages"])?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("maxResults", &clamp_max_results(max_results, DEFAULT_MAX_RESULTS).to_string());
        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            pairs.append_pair("q", q);
        }
        for label in label_ids {
            pairs.append_pair("labelIds", label);
        }
    }

    let response = send(with_defaults(ctx.http.get(url), &token), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let list: MessageList = read_json(PROVIDER, response).await?;

    let lookups = list.messages.iter().map(|m| fetch_metadata(ctx, &token, &m.id));
    let mut messages = Vec::with_capacity(list.messages.len());
    for result in futures::future::join_all(lookups).await {
        messages.push(result?);
    }
    Ok(json!({ "count": messages.len(), "messages": messages }))
}

/// Headers plus the plain-text body (HTML stripped, then snippet, as fallbacks).
pub async fn read_message(ctx: &ToolContext, message_id: &str) -> Result<ToolEnvelope, ToolError> {
    settle(try_read_message(ctx, message_id).await)
}

async fn try_read_message(ctx: &ToolContext, message_id: &str) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "read_gmail_message").await?;
    let mut url = endpoint(&ctx.endpoints.gmail, &["users", "me", "messages", message_id])?;
    url.query_pairs_mut().append_pair("format", "full");
    let response = send(with_defaults(ctx.http.get(url), &token), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let message: GmailMessage = read_json(PROVIDER, response).await?;

    let body = message
        .payload
        .as_ref()
        .and_then(|p| find_body(p, "text/plain"))
        .or_else(|| {
            message
                .payload
                .as_ref()
                .and_then(|p| find_body(p, "text/html"))
                .map(|html| strip_html(&html))
        })
        .or_else(|| message.snippet.clone())
        .unwrap_or_default();

    Ok(json!({
        "id": message.id,
        "threadId": message.thread_id,
        "from": message.header("From"),
        "to": message.header("To"),
        "cc": message.header("Cc"),
        "subject": message.header("Subject"),
        "date": message.header("Date"),
        "body": cap(body.trim(), MAX_BODY_CHARS),
    }))
}

/// Sends with [`EMAIL_SIGNATURE`] appended, whatever the body says.
pub async fn send_message(ctx: &ToolContext, email: OutgoingEmail) -> Result<ToolEnvelope, ToolError> {
    settle(try_send_message(ctx, email).await)
}

async fn try_send_message(ctx: &ToolContext, email: OutgoingEmail) -> Attempt<serde_json::Value> {
    let recipients = email.to.addresses();
    if recipients.is_empty() {
        return Err(ToolEnvelope::invalid_arguments("send_gmail_message", "at least one recipient is required").into());
    }
    if let Some(bad) = recipients.iter().find(|a| !a.contains('@')) {
        return Err(ToolEnvelope::invalid_arguments(
            "send_gmail_message",
            format!("'{bad}' is not an email address"),
        )
        .into());
    }

    let token = ctx.token(PROVIDER, "send_gmail_message").await?;
    let raw = URL_SAFE_NO_PAD.encode(build_raw_message(&email));
    let url = endpoint(&ctx.endpoints.gmail, &["users", "me", "messages", "send"])?;
    let response = send(
        with_defaults(ctx.http.post(url), &token).json(&json!({ "raw": raw })),
        parse_google_error,
    )
    .await
    .map_err(|e| e.into_failure(PROVIDER))?;
    let sent: SendResponse = read_json(PROVIDER, response).await?;

    Ok(json!({
        "sent": true,
        "id": sent.id,
        "threadId": sent.thread_id,
        "to": recipients,
    }))
}

// --- Tools ---

pub struct ListGmailMessagesTool {
    ctx: ToolContext,
}

impl ListGmailMessagesTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default)]
    max_results: Option<i64>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[async_trait]
impl Tool for ListGmailMessagesTool {
    fn name(&self) -> &str {
        "list_gmail_messages"
    }

    fn description(&self) -> &str {
        "List recent Gmail messages with sender, subject, date and snippet. Supports Gmail \
         search syntax (e.g. 'is:unread from:boss@example.com') and label filters."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "maxResults": {
                    "type": "integer",
                    "description": "Maximum number of messages (1-50, default 10)"
                },
                "query": { "type": "string", "description": "Gmail search query" },
                "labelIds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Only messages with all of these labels, e.g. [\"INBOX\", \"UNREAD\"]"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: ListArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(list_messages(&self.ctx, args.max_results, args.query.as_deref(), &args.label_ids)
            .await?
            .into_tool_result())
    }
}

pub struct ReadGmailMessageTool {
    ctx: ToolContext,
}

impl ReadGmailMessageTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadArgs {
    message_id: String,
}

#[async_trait]
impl Tool for ReadGmailMessageTool {
    fn name(&self) -> &str {
        "read_gmail_message"
    }

    fn description(&self) -> &str {
        "Read one Gmail message by id, including its full text body. Get ids from list_gmail_messages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "messageId": { "type": "string", "description": "The Gmail message id" }
            },
            "required": ["messageId"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: ReadArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(read_message(&self.ctx, &args.message_id).await?.into_tool_result())
    }
}

pub struct SendGmailMessageTool {
    ctx: ToolContext,
}

impl SendGmailMessageTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SendGmailMessageTool {
    fn name(&self) -> &str {
        "send_gmail_message"
    }

    fn description(&self) -> &str {
        "Send a plain-text email from the user's Gmail account. Confirm recipients and content \
         with the user before sending. A signature is added automatically."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let recipients = json!({
            "oneOf": [
                { "type": "string" },
                { "type": "array", "items": { "type": "string" } }
            ]
        });
        json!({
            "type": "object",
            "properties": {
                "to": recipients.clone(),
                "subject": { "type": "string" },
                "body": { "type": "string", "description": "Plain-text body, without a signature" },
                "cc": recipients.clone(),
                "bcc": recipients
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let email: OutgoingEmail = match parse_args(self.name(), arguments) {
            Ok(email) => email,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(send_message(&self.ctx, email).await?.into_tool_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_at;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn email(body: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: Recipients::One("sam@example.com, lee@example.com".into()),
            subject: "Quarterly\r\nBcc: attacker@example.com".into(),
            body: body.into(),
            cc: Recipients::default(),
            bcc: Recipients::default(),
        }
    }

    #[test]
    fn raw_message_strips_header_injection() {
        let raw = build_raw_message(&email("Hi"));
        assert!(raw.starts_with("To: sam@example.com, lee@example.com\r\n"));
        assert!(raw.contains("Subject: Quarterly  Bcc: attacker@example.com\r\n"));
        assert!(!raw.contains("\r\nBcc:"));
    }

    #[test]
    fn signature_is_always_last() {
        for body in ["Hello", "Hello\n\n", "Thanks,\nAlex\n-- \nAlex's own sig", ""] {
            let raw = build_raw_message(&email(body));
            assert!(raw.ends_with(EMAIL_SIGNATURE), "body {body:?}");
        }
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        assert_eq!(encode_subject("Plan"), "Plan");
        assert!(encode_subject("Café").starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn html_is_stripped() {
        assert_eq!(strip_html("<p>Hi &amp; welcome</p><br/>Bye"), "Hi & welcome Bye");
    }

    #[tokio::test]
    async fn send_appends_signature_to_sent_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1", "threadId": "t1"})))
            .expect(1)
            .mount(&server)
            .await;

        let env = send_message(&context_at(&server.uri()), email("See you Friday.")).await.unwrap();
        assert!(env.success);

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(body["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("See you Friday.\r\n\r\n--\r\n"));
        assert!(raw.ends_with(EMAIL_SIGNATURE));
    }

    #[tokio::test]
    async fn send_rejects_bad_recipient_without_request() {
        let ctx = context_at("http://127.0.0.1:1");
        let mut bad = email("x");
        bad.to = Recipients::Many(vec!["not-an-address".into()]);
        let env = send_message(&ctx, bad).await.unwrap();
        assert_eq!(env.code_str().as_deref(), Some("INVALID_ARGUMENTS"));
    }

    #[tokio::test]
    async fn lists_with_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("q", "is:unread"))
            .and(query_param("labelIds", "INBOX"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "a", "threadId": "ta"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/a"))
            .and(query_param("format", "metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "a",
                "threadId": "ta",
                "snippet": "Can we move the review?",
                "labelIds": ["INBOX", "UNREAD"],
                "payload": {"headers": [
                    {"name": "From", "value": "Pat <pat@example.com>"},
                    {"name": "Subject", "value": "Review"}
                ]}
            })))
            .mount(&server)
            .await;

        let env = list_messages(&context_at(&server.uri()), None, Some("is:unread"), &["INBOX".into()])
            .await
            .unwrap();
        let data = env.data.unwrap();
        assert_eq!(data["count"], 1);
        assert_eq!(data["messages"][0]["from"], "Pat <pat@example.com>");
        assert_eq!(data["messages"][0]["unread"], true);
    }

    #[tokio::test]
    async fn reads_plain_text_part() {
        let server = MockServer::start().await;
        let encoded = URL_SAFE_NO_PAD.encode("Line one\nLine two");
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [{"name": "Subject", "value": "Hello"}],
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": URL_SAFE_NO_PAD.encode("<b>x</b>")}},
                        {"mimeType": "text/plain", "body": {"data": encoded}}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let env = read_message(&context_at(&server.uri()), "m1").await.unwrap();
        let data = env.data.unwrap();
        assert_eq!(data["subject"], "Hello");
        assert_eq!(data["body"], "Line one\nLine two");
    }
}
