//! Conversation memory
//!
//! Keeps long-running sessions bounded: the summarization gate decides when
//! history must be condensed, the summarizer writes the summary and prunes.

pub mod context_manager;
pub mod summarizer;

pub use context_manager::SummarizationPolicy;
pub use summarizer::SummarizerNode;

use crate::models::Message;

/// Render messages as `Role: content` lines for prompts
pub fn format_transcript<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    let mut text = String::new();
    for msg in messages {
        text.push_str(&format!("{}: {}\n", msg.role, msg.content));
    }
    text
}

/// The `count` most recent messages, oldest first
pub fn recent_messages(messages: &[Message], count: usize) -> &[Message] {
    &messages[messages.len().saturating_sub(count)..]
}
