mod streaming;
pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockScript};
pub use streaming::{
    decode_line, decode_utf8_streaming, DecodedLine, LineOutcome, LineSplitter, StopReason,
    StreamDecoder, StreamEvent, StreamEventHandler, DATA_PREFIX, DONE_SENTINEL,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Trait for LLM providers
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// Open a streaming completion and return the raw protocol lines.
    ///
    /// A non-success HTTP status or a connection failure is returned as `Err`;
    /// a failure after the stream has opened arrives as an `Err` item.
    async fn stream(&self, request: CompletionRequest) -> Result<LineStream>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the model name
    fn model(&self) -> &str;

    /// Get the configured max_tokens for this provider
    fn max_tokens(&self) -> u32;
}

/// Lazily produced, single-pass sequence of protocol lines.
pub type LineStream = tokio_stream::wrappers::ReceiverStream<Result<String>>;

/// Transport-level failures. Anything in here ends the turn.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Instruction text plus the rendered context preamble
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
}

/// Plain text, or the structured block form needed for tool calls and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Message {
    pub fn new(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content: MessageContent::Text(content),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into())
    }

    pub fn with_blocks(role: MessageRole, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Concatenated text of the message, ignoring tool blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Identifiers of every `tool_use` block carried by this message.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Identifiers referenced by the `tool_result` blocks of this message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn has_tool_use(&self) -> bool {
        !self.tool_use_ids().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_message_serializes_as_plain_string() {
        let msg = Message::user("Hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "Hello"}));
    }

    #[test]
    fn test_tool_blocks_serialize_with_type_tags() {
        let msg = Message::with_blocks(
            MessageRole::Assistant,
            vec![
                ContentBlock::Text {
                    text: "On it.".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "add_reminder".to_string(),
                    input: json!({"title": "Call mom"}),
                },
            ],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "tool_use");
        assert_eq!(json["content"][1]["input"]["title"], "Call mom");
        assert_eq!(msg.tool_use_ids(), vec!["t1"]);
        assert_eq!(msg.text(), "On it.");
    }

    #[test]
    fn test_tool_result_omits_is_error_when_false() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "t1".to_string(),
            content: "done".to_string(),
            is_error: false,
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(!json.contains("is_error"));

        let failed = ContentBlock::ToolResult {
            tool_use_id: "t1".to_string(),
            content: "nope".to_string(),
            is_error: true,
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"is_error\":true"));
    }

    #[test]
    fn test_blocks_round_trip_through_untagged_content() {
        let raw = json!({
            "role": "user",
            "content": [{"type": "tool_result", "tool_use_id": "t9", "content": "ok"}]
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.tool_result_ids(), vec!["t9"]);
        assert!(!msg.has_tool_use());
    }
}
