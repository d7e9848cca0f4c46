//! System prompts and the fixed texts the agent speaks with.

use chrono::{DateTime, SecondsFormat, Utc};
use concierge_core::channel::ChannelKind;
use concierge_core::memory::MemoryRecord;
use concierge_core::user::User;

pub const BASE_INSTRUCTIONS: &str = "\
You are Concierge, a personal executive assistant. You help the user manage \
their calendar, email, documents, GitHub pull requests and LinkedIn presence, \
and you remember what matters to them.

Guidelines:
- Use the available tools to look things up instead of guessing.
- Before deleting, updating or reading something by id, list first to find \
the id if you do not already know it.
- Confirm the details of an email or calendar event with the user before \
sending or creating it, unless they were explicit.
- When a tool reports that an account is not connected or needs to be \
reconnected, pass that guidance on to the user in plain words.
- Dates you send to calendar tools must look like 2025-03-14T15:00:00+01:00.
- When the user tells you something worth remembering about themselves, store \
it with add_memory.
- Be brief and concrete. Never show raw error codes or stack traces.";

pub const WHATSAPP_FORMAT_RULES: &str = r#"
You are replying on WhatsApp. Your final answer must be exactly one JSON object
and nothing else, in one of these shapes:

1. Plain text:
{"message_type":"text","type":"text","text":"..."}

2. A list the user picks one item from (menus, events, emails):
{"message_type":"interactive","type":"list",
 "header":{"type":"text","text":"≤60 chars, optional"},
 "body":{"text":"≤4096 chars"},
 "footer":{"text":"≤60 chars, optional"},
 "action":{"button":"≤20 chars","sections":[{"title":"≤24 chars","rows":[
   {"id":"≤200 chars","title":"≤24 chars","description":"≤72 chars, optional"}]}]}}
At most 10 sections and 10 rows per section.

3. Up to three quick-reply buttons (yes/no, confirmations):
{"message_type":"interactive","type":"button",
 "body":{"text":"≤1024 chars"},
 "action":{"buttons":[{"type":"reply","reply":{"id":"≤256 chars","title":"≤20 chars"}}]}}

Use WhatsApp formatting inside text: *bold*, _italic_, no Markdown headings or tables."#;

/// Answer given when a turn runs out of tool iterations.
pub const MAX_ITERATIONS_REPLY: &str = "I'm sorry, I couldn't finish that request in a reasonable \
     number of steps. Could you break it into smaller parts or tell me more precisely what you need?";

/// Stand-in result for a tool call that never completed.
pub const INTERRUPTED_TOOL_RESULT: &str =
    "This tool call was interrupted before it completed. Check with the user before trying again.";

const MEMORY_HEADER: &str = "Previous relevant information about the user from earlier conversations:";

/// The user fields the model may rely on.
pub fn profile_snapshot(user: &User) -> String {
    let prefs = &user.preferences;
    let mut lines = vec![format!("- Name: {}", user.display_name())];
    if let Some(email) = &user.email {
        lines.push(format!("- Email: {email}"));
    }
    if let Some(phone) = user.verified_phone() {
        lines.push(format!("- Phone: {phone}"));
    }
    if let Some(tz) = &user.timezone {
        lines.push(format!("- Timezone: {tz}"));
    }
    let capabilities: Vec<&str> = prefs.capabilities.iter().map(|c| c.as_str()).collect();
    if !capabilities.is_empty() {
        lines.push(format!("- Enabled capabilities: {}", capabilities.join(", ")));
    }
    if !prefs.interests.is_empty() {
        lines.push(format!("- Interests: {}", prefs.interests.join(", ")));
    }
    lines.push(format!("- Preferred tone: {}", prefs.communication.tone));
    lines.join("\n")
}

/// System prompt for one turn. `now` must be read fresh for every turn.
pub fn system_prompt(user: &User, channel: ChannelKind, now: DateTime<Utc>) -> String {
    let mut prompt = String::from(BASE_INSTRUCTIONS);
    if channel.is_structured() {
        prompt.push('\n');
        prompt.push_str(WHATSAPP_FORMAT_RULES);
    }
    prompt.push_str("\n\nAbout the user:\n");
    prompt.push_str(&profile_snapshot(user));
    prompt.push_str(&format!(
        "\n\nCurrent date and time: {} (UTC). Today is {}.",
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
        now.format("%A, %B %-d, %Y"),
    ));
    prompt
}

/// Render recalled memories, or `None` when there is nothing to add.
pub fn memory_context(records: &[MemoryRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut text = String::from(MEMORY_HEADER);
    for record in records {
        text.push_str("\n- ");
        text.push_str(record.content.trim());
    }
    Some(text)
}

pub const BRIEFING_INSTRUCTIONS: &str = "\
You write the script for a short spoken morning briefing, about two minutes \
when read aloud. Greet the user by name, then cover today's schedule, the \
emails that need attention and open pull requests, in that order. Mention a \
section that is unavailable in one short sentence and move on. Close with \
one line tied to the user's interests. Write plain sentences for a voice: \
no lists, no markdown, no emoji, no URLs.";
