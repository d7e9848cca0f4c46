//! Google Calendar: list, create and delete events on the primary calendar.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
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
const DATE_EXAMPLE: &str = "2025-03-14T09:30:00-05:00";

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<Event>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    html_link: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct Attendee {
    email: Option<String>,
}

fn event_time(time: Option<EventTime>) -> Option<String> {
    time.and_then(|t| t.date_time.or(t.date))
}

fn event_json(event: Event) -> serde_json::Value {
    json!({
        "id": event.id,
        "summary": event.summary.unwrap_or_else(|| "(no title)".into()),
        "description": event.description,
        "location": event.location,
        "start": event_time(event.start),
        "end": event_time(event.end),
        "attendees": event.attendees.into_iter().filter_map(|a| a.email).collect::<Vec<_>>(),
        "htmlLink": event.html_link,
    })
}

/// Parse `YYYY-MM-DDTHH:MM:SS±HH:MM`. `Z`, fractional seconds and missing
/// offsets are rejected.
pub fn parse_event_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    if value.len() != DATE_EXAMPLE.len() {
        return None;
    }
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%:z").ok()
}

fn require_datetime(field: &str, value: &str) -> Attempt<DateTime<FixedOffset>> {
    parse_event_datetime(value).ok_or_else(|| {
        ToolEnvelope::failure(
            FailureCode::InvalidDateFormat,
            format!(
                "Invalid date format for '{field}': \"{value}\". Dates must be ISO 8601 with an \
                 explicit UTC offset, YYYY-MM-DDTHH:MM:SS±HH:MM (for example {DATE_EXAMPLE})."
            ),
        )
        .into()
    })
}

fn events_url(ctx: &ToolContext, extra: &[&str]) -> Attempt<url::Url> {
    let mut segments = vec!["calendars", "primary", "events"];
    segments.extend_from_slice(extra);
    endpoint(&ctx.endpoints.google_calendar, &segments)
}

/// Upcoming events from now, soonest first.
pub async fn list_events(ctx: &ToolContext, max_results: Option<i64>) -> Result<ToolEnvelope, ToolError> {
    settle(try_list_events(ctx, max_results).await)
}

async fn try_list_events(ctx: &ToolContext, max_results: Option<i64>) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "list_calendar_events").await?;
    let mut url = events_url(ctx, &[])?;
    url.query_pairs_mut()
        .append_pair("singleEvents", "true")
        .append_pair("orderBy", "startTime")
        .append_pair("timeMin", &Utc::now().to_rfc3339())
        .append_pair("maxResults", &clamp_max_results(max_results, DEFAULT_MAX_RESULTS).to_string());

    let response = send(with_defaults(ctx.http.get(url), &token), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let body: EventsResponse = read_json(PROVIDER, response).await?;

    let events: Vec<_> = body.items.into_iter().map(event_json).collect();
    Ok(json!({ "count": events.len(), "events": events }))
}

/// Input for [`create_event`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub summary: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Validates both dates and their order before touching the network.
pub async fn create_event(ctx: &ToolContext, event: NewEvent) -> Result<ToolEnvelope, ToolError> {
    settle(try_create_event(ctx, event).await)
}

async fn try_create_event(ctx: &ToolContext, event: NewEvent) -> Attempt<serde_json::Value> {
    let start = require_datetime("start", &event.start)?;
    let end = require_datetime("end", &event.end)?;
    if end <= start {
        return Err(ToolEnvelope::failure(
            FailureCode::InvalidDateRange,
            format!("The event must end after it starts (start {}, end {}).", event.start, event.end),
        )
        .into());
    }

    let token = ctx.token(PROVIDER, "create_calendar_event").await?;
    let mut body = json!({
        "summary": event.summary,
        "start": { "dateTime": start.to_rfc3339() },
        "end": { "dateTime": end.to_rfc3339() },
    });
    if let Some(description) = &event.description {
        body["description"] = json!(description);
    }
    let attendees: Vec<_> = event
        .attendees
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|email| json!({ "email": email }))
        .collect();
    if !attendees.is_empty() {
        body["attendees"] = json!(attendees);
    }

    let url = events_url(ctx, &[])?;
    let response = send(with_defaults(ctx.http.post(url), &token).json(&body), parse_google_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let created: Event = read_json(PROVIDER, response).await?;
    Ok(json!({ "created": true, "event": event_json(created) }))
}

pub async fn delete_event(ctx: &ToolContext, event_id: &str) -> Result<ToolEnvelope, ToolError> {
    settle(try_delete_event(ctx, event_id).await)
}

async fn try_delete_event(ctx: &ToolContext, event_id: &str) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "delete_calendar_event").await?;
    let url = events_url(ctx, &[event_id])?;
    send(with_defaults(ctx.http.delete(url), &token), parse_google_error)
        .await
        .map_err(|e| match e.status() {
            Some(404 | 410) => AdapterFailure::from(ToolEnvelope::failure(
                FailureCode::EventNotFound,
                format!(
                    "No calendar event with id '{event_id}' was found. List the calendar \
                     events first to get a valid id."
                ),
            )),
            _ => e.into_failure(PROVIDER),
        })?;
    Ok(json!(format!("Deleted calendar event {event_id}.")))
}

// --- Tools ---

pub struct ListCalendarEventsTool {
    ctx: ToolContext,
}

impl ListCalendarEventsTool {
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
impl Tool for ListCalendarEventsTool {
    fn name(&self) -> &str {
        "list_calendar_events"
    }

    fn description(&self) -> &str {
        "List the user's upcoming Google Calendar events (primary calendar), soonest first. \
         Use this to answer questions about their schedule and to find event ids."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "maxResults": {
                    "type": "integer",
                    "description": "Maximum number of events to return (1-50, default 10)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: ListArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(list_events(&self.ctx, args.max_results).await?.into_tool_result())
    }
}

pub struct CreateCalendarEventTool {
    ctx: ToolContext,
}

impl CreateCalendarEventTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for CreateCalendarEventTool {
    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn description(&self) -> &str {
        "Create an event on the user's primary Google Calendar. Dates must include an explicit \
         UTC offset in the user's timezone, e.g. 2025-03-14T09:30:00-05:00."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "Event title" },
                "start": {
                    "type": "string",
                    "description": "Start time, YYYY-MM-DDTHH:MM:SS±HH:MM"
                },
                "end": {
                    "type": "string",
                    "description": "End time, YYYY-MM-DDTHH:MM:SS±HH:MM"
                },
                "description": { "type": "string", "description": "Optional event notes" },
                "attendees": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional attendee email addresses"
                }
            },
            "required": ["summary", "start", "end"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let event: NewEvent = match parse_args(self.name(), arguments) {
            Ok(event) => event,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(create_event(&self.ctx, event).await?.into_tool_result())
    }
}

pub struct DeleteCalendarEventTool {
    ctx: ToolContext,
}

impl DeleteCalendarEventTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    event_id: String,
}

#[async_trait]
impl Tool for DeleteCalendarEventTool {
    fn name(&self) -> &str {
        "delete_calendar_event"
    }

    fn description(&self) -> &str {
        "Delete an event from the user's primary Google Calendar by id. If you do not know the \
         id, call list_calendar_events first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "eventId": { "type": "string", "description": "The calendar event id" }
            },
            "required": ["eventId"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: DeleteArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(delete_event(&self.ctx, &args.event_id).await?.into_tool_result())
    }
}
