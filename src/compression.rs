//! Prompt and summary message for the `:compress` command.
//!
//! The light model gets the recent part of the conversation as a guide and
//! condenses the older part into one summary message.

use crate::message::{Message, Role};

/// Longer message bodies are cut in the transcript sent for summarizing.
const MAX_MESSAGE_CHARS: usize = 4000;

pub const SUMMARY_HEADER: &str = "[earlier conversation summarized]";

/// Opening and closing tag for one message.
fn tags(message: &Message) -> (String, &'static str) {
    match (message.role, &message.tool_name) {
        (Role::Tool, Some(name)) => (format!("<tool name=\"{name}\">"), "</tool>"),
        (Role::Tool, None) => ("<tool>".to_string(), "</tool>"),
        (Role::System, _) => ("<system>".to_string(), "</system>"),
        (Role::User, _) => ("<user>".to_string(), "</user>"),
        (Role::Assistant, _) => ("<assistant>".to_string(), "</assistant>"),
    }
}

fn clip(text: &str) -> String {
    let total = text.chars().count();
    if total <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{head}\n[... {} more characters]", total - MAX_MESSAGE_CHARS)
}

/// Renders messages as a plain transcript.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let (open, close) = tags(message);
            let mut body = clip(message.content.trim());
            for call in &message.tool_calls {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(&format!(
                    "called {}({})",
                    call.name,
                    clip(&call.arguments_text())
                ));
            }
            if !message.images.is_empty() {
                body.push_str(&format!("\n[{} image(s) attached]", message.images.len()));
            }
            format!("{open}\n{body}\n{close}")
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub fn compression_prompt(older: &[Message], recent: &[Message]) -> String {
    format!(
        "You condense the memory of a coding assistant working in a software project.

Below are the RECENT messages of its conversation, which show what it is working on now, \
followed by the OLDER messages. Write a summary of the OLDER messages that keeps everything \
the recent work may still need:
- file paths, function names and code that relate to the current task
- decisions, requirements and constraints agreed on earlier
- results of commands and searches that are still relevant

Leave out small talk, repeated attempts and anything the recent messages make obsolete.

RECENT MESSAGES:
---
{}
---

OLDER MESSAGES (summarize these):
---
{}
---

Reply with the summary text only.",
        transcript(recent),
        transcript(older)
    )
}

/// The message that replaces the summarized history.
pub fn summary_message(summary: &str) -> Message {
    Message::system(format!("{SUMMARY_HEADER}\n{}", summary.trim()))
}
