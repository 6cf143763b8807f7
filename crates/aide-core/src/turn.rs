//! Conversation log entries and the tool invocations/results attached to them.

use aide_providers::MessageRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TurnId = Uuid;

/// One role-attributed entry in the conversation log.
///
/// Text may only change while `complete` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub role: MessageRole,
    content: String,
    complete: bool,
    pub created_at: DateTime<Utc>,
    /// Seeded by the engine rather than typed by the user
    pub automatic: bool,
    /// Invocations the model issued during this turn, in dispatch order
    pub invocations: Vec<ToolInvocation>,
}

impl ConversationTurn {
    /// A finished user (or automatic) turn.
    pub fn user(content: impl Into<String>, automatic: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            content: content.into(),
            complete: true,
            created_at: Utc::now(),
            automatic,
            invocations: Vec::new(),
        }
    }

    /// An assistant turn that is about to be streamed into.
    pub fn streaming_assistant() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: String::new(),
            complete: false,
            created_at: Utc::now(),
            automatic: false,
            invocations: Vec::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Append streamed text. Returns false when the turn is already finalised.
    pub fn append_text(&mut self, text: &str) -> bool {
        if self.complete {
            return false;
        }
        self.content.push_str(text);
        true
    }

    /// Replace the text of a turn that is still open.
    pub fn replace_text(&mut self, text: String) -> bool {
        if self.complete {
            return false;
        }
        self.content = text;
        true
    }

    pub fn record_invocation(&mut self, invocation: ToolInvocation) -> bool {
        if self.complete {
            return false;
        }
        self.invocations.push(invocation);
        true
    }

    pub fn finalize(&mut self) {
        self.complete = true;
    }

    pub fn has_invocation(&self, id: &str) -> bool {
        self.invocations.iter().any(|inv| inv.id == id)
    }
}

/// A model-issued request to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub origin_turn: TurnId,
    /// Arguments were substituted because assembly failed
    pub fallback: bool,
}

/// Outcome of dispatching one invocation, fed back to the model once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub content: String,
    pub success: bool,
}

impl ToolResult {
    pub fn success(invocation_id: &str, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            content: content.into(),
            success: true,
        }
    }

    pub fn failure(invocation_id: &str, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            content: content.into(),
            success: false,
        }
    }
}
