//! Thread history kept in checkpoints.

use concierge_core::message::{Message, Role};
use concierge_core::thread::Checkpoint;

use crate::prompts::INTERRUPTED_TOOL_RESULT;

/// The slice of `messages` sent to the model: at most `max` of the newest
/// messages, starting at a user message.
///
/// When the current turn alone is longer than `max` it is kept whole, since
/// tool results are meaningless without the call that requested them.
pub fn history_window(messages: &[Message], max: usize) -> &[Message] {
    let earliest = messages.len().saturating_sub(max);
    let start = messages[earliest..]
        .iter()
        .position(|m| m.role == Role::User)
        .map(|offset| earliest + offset)
        .or_else(|| messages.iter().rposition(|m| m.role == Role::User))
        .unwrap_or(earliest);
    &messages[start..]
}

/// Answer tool calls left open by an interrupted turn.
///
/// Returns how many synthetic results were inserted.
pub fn repair_dangling_tool_calls(checkpoint: &mut Checkpoint) -> usize {
    let pending = checkpoint.pending_tool_calls();
    if pending.is_empty() {
        return 0;
    }
    let Some(pos) = checkpoint.messages.iter().rposition(|m| m.requests_tools()) else {
        return 0;
    };
    let answered = checkpoint.messages[pos + 1..]
        .iter()
        .take_while(|m| m.role == Role::Tool)
        .count();
    let insert_at = pos + 1 + answered;

    let count = pending.len();
    let results = pending
        .into_iter()
        .map(|id| Message::tool_result(id, INTERRUPTED_TOOL_RESULT));
    checkpoint.messages.splice(insert_at..insert_at, results);
    count
}
