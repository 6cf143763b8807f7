//! Context preamble: what the model should know before every request.

use std::future::Future;
use std::time::Duration;

use aide_providers::MessageRole;
use chrono::{DateTime, Local};
use tracing::warn;

use crate::capabilities::{Capabilities, CalendarEvent, ListFilter, MemoryEntry, Reminder};
use crate::error::CapabilityError;
use crate::turn::ConversationTurn;

const MAX_EVENTS: usize = 10;
const MAX_REMINDERS: usize = 20;
const MAX_MEMORIES: usize = 50;
const DIGEST_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub now: DateTime<Local>,
    pub location: Option<String>,
    pub memories: Vec<MemoryEntry>,
    pub events: Vec<CalendarEvent>,
    pub reminders: Vec<Reminder>,
    /// Role and abbreviated text of turns before the current exchange
    pub recent_turns: Vec<(MessageRole, String)>,
}

async fn bounded<T>(
    what: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, CapabilityError>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(CapabilityError::Unavailable(_))) => None,
        Ok(Err(e)) => {
            warn!("Could not read {} for context: {}", what, e);
            None
        }
        Err(_) => {
            warn!("Reading {} for context timed out after {:?}", what, timeout);
            None
        }
    }
}

impl ContextSnapshot {
    /// Read every available provider, each bounded by `timeout`. A provider
    /// that fails or stalls contributes nothing.
    pub async fn gather(
        capabilities: &Capabilities,
        timeout: Duration,
        earlier_turns: &[ConversationTurn],
    ) -> Self {
        let memories = match capabilities.memory() {
            Ok(store) => {
                let filter = ListFilter::upcoming(MAX_MEMORIES);
                bounded("memories", timeout, store.list(&filter)).await
            }
            Err(_) => None,
        };
        let events = match capabilities.calendar() {
            Ok(store) => {
                let filter = ListFilter::upcoming(MAX_EVENTS);
                bounded("calendar", timeout, store.list(&filter)).await
            }
            Err(_) => None,
        };
        let reminders = match capabilities.reminders() {
            Ok(store) => {
                let filter = ListFilter::upcoming(MAX_REMINDERS);
                bounded("reminders", timeout, store.list(&filter)).await
            }
            Err(_) => None,
        };
        let location = match &capabilities.location {
            Some(source) => bounded("location", timeout, source.current_location()).await.flatten(),
            None => None,
        };

        let recent_turns = earlier_turns
            .iter()
            .filter(|turn| turn.is_complete() && !turn.content().trim().is_empty())
            .map(|turn| (turn.role, abbreviate(turn.content().trim(), DIGEST_CHARS)))
            .collect();

        Self {
            now: Local::now(),
            location,
            memories: memories.unwrap_or_default(),
            events: events.unwrap_or_default(),
            reminders: reminders.unwrap_or_default(),
            recent_turns,
        }
    }

    /// Markdown rendering appended to the instruction prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Context\n\n");
        out.push_str(&format!(
            "Current time: {}\n",
            self.now.format("%A, %-d %B %Y %H:%M (%:z)")
        ));
        if let Some(location) = &self.location {
            out.push_str(&format!("Location: {}\n", location));
        }

        out.push_str("\n## What you remember about the user\n");
        if self.memories.is_empty() {
            out.push_str("(nothing yet)\n");
        }
        for memory in &self.memories {
            out.push_str(&format!("- [{}] {}\n", memory.id, memory.content));
        }

        out.push_str("\n## Upcoming calendar events\n");
        if self.events.is_empty() {
            out.push_str("(none)\n");
        }
        for event in &self.events {
            let mut line = format!("- [{}] {} | {}", event.id, event.title, event.start);
            if let Some(end) = &event.end {
                line.push_str(&format!(" to {}", end));
            }
            if let Some(location) = &event.location {
                line.push_str(&format!(" @ {}", location));
            }
            out.push_str(&line);
            out.push('\n');
        }

        out.push_str("\n## Open reminders\n");
        if self.reminders.is_empty() {
            out.push_str("(none)\n");
        }
        for reminder in &self.reminders {
            match &reminder.due {
                Some(due) => out.push_str(&format!(
                    "- [{}] {} (due {})\n",
                    reminder.id, reminder.title, due
                )),
                None => out.push_str(&format!("- [{}] {}\n", reminder.id, reminder.title)),
            }
        }

        if !self.recent_turns.is_empty() {
            out.push_str("\n## Earlier in this conversation\n");
            for (role, text) in &self.recent_turns {
                let speaker = match role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "You",
                };
                out.push_str(&format!("{}: {}\n", speaker, text));
            }
        }

        out
    }
}

fn abbreviate(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        flattened
    } else {
        let truncated: String = flattened.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Instruction prompt followed by the rendered context.
pub fn system_text(instructions: &str, snapshot: &ContextSnapshot) -> String {
    format!("{}\n\n{}", instructions.trim_end(), snapshot.render())
}
