//! Turns a thread's message list into the widget's reply shape.

use chrono::{DateTime, Utc};
use cr_domain::assistant::{MessageRole, ThreadMessage};
use serde::Serialize;

/// One message as the widget renders it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

fn joined_text(message: &ThreadMessage) -> String {
    message.text_segments().collect::<Vec<_>>().join("\n")
}

fn chronological(messages: &[ThreadMessage]) -> Vec<&ThreadMessage> {
    let mut sorted: Vec<&ThreadMessage> = messages.iter().collect();
    // Stable, so equal timestamps keep backend order.
    sorted.sort_by_key(|m| m.created_at);
    sorted
}

/// First text segment of the newest assistant message that has one, or
/// an empty string. Image-only replies are skipped.
pub fn latest_assistant_text(messages: &[ThreadMessage]) -> String {
    chronological(messages)
        .into_iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .find_map(|m| m.text_segments().next())
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Every message oldest first, text parts only.
pub fn transcript(messages: &[ThreadMessage]) -> Vec<TranscriptLine> {
    chronological(messages)
        .into_iter()
        .map(|m| TranscriptLine {
            role: m.role,
            content: joined_text(m),
            created_at: DateTime::from_timestamp(m.created_at, 0).unwrap_or_default(),
        })
        .collect()
}
