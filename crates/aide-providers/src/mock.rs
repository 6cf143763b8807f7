#![allow(dead_code)]
//! Mock LLM Provider for Testing
//!
//! Replays scripted protocol lines instead of talking to the network, so the
//! orchestration engine can be exercised end to end. Each call to `stream`
//! consumes the next script; every request is recorded for inspection.
//!
//! # Example
//!
//! ```rust,ignore
//! use aide_providers::mock::{MockProvider, MockScript};
//!
//! let provider = MockProvider::new()
//!     .with_script(MockScript::tool_call("t1", "add_reminder", Some(r#"{"title":"Call mom"}"#)))
//!     .with_script(MockScript::text("Done!"));
//! ```

use crate::{CompletionRequest, LLMProvider, LineStream, ProviderError};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Builders for individual protocol lines.
pub mod sse {
    use serde_json::json;

    pub fn text_block_start() -> String {
        format!(
            "data: {}",
            json!({"type": "content_block_start", "content_block": {"type": "text", "text": ""}})
        )
    }

    pub fn text_delta(text: &str) -> String {
        format!(
            "data: {}",
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}})
        )
    }

    pub fn tool_use_start(id: &str, name: &str) -> String {
        format!(
            "data: {}",
            json!({"type": "content_block_start", "content_block": {"type": "tool_use", "name": name, "id": id}})
        )
    }

    pub fn input_json_delta(partial_json: &str) -> String {
        format!(
            "data: {}",
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": partial_json}})
        )
    }

    pub fn message_delta(stop_reason: &str) -> String {
        format!(
            "data: {}",
            json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}})
        )
    }

    pub fn done() -> String {
        "data: [DONE]".to_string()
    }
}

/// One scripted response.
#[derive(Debug, Clone)]
pub enum MockScript {
    /// Lines delivered in order, then the stream closes.
    Lines(Vec<String>),
    /// Lines delivered, then a transport failure mid-stream.
    Interrupted(Vec<String>),
    /// The request is rejected before any line arrives.
    HttpError { status: u16, body: String },
}

impl MockScript {
    pub fn raw(lines: Vec<String>) -> Self {
        Self::Lines(lines)
    }

    /// A plain text reply ending with `end_turn`.
    pub fn text(content: &str) -> Self {
        Self::Lines(vec![
            sse::text_block_start(),
            sse::text_delta(content),
            sse::message_delta("end_turn"),
            sse::done(),
        ])
    }

    /// A single tool call. `partial_json` of `None` omits the argument fragment.
    pub fn tool_call(id: &str, name: &str, partial_json: Option<&str>) -> Self {
        let mut lines = vec![sse::tool_use_start(id, name)];
        if let Some(json) = partial_json {
            lines.push(sse::input_json_delta(json));
        }
        lines.push(sse::message_delta("tool_use"));
        lines.push(sse::done());
        Self::Lines(lines)
    }

    /// Text, then a tool call whose arguments arrive in the given fragments.
    pub fn text_then_fragmented_tool(text: &str, id: &str, name: &str, fragments: &[&str]) -> Self {
        let mut lines = vec![sse::text_block_start(), sse::text_delta(text)];
        lines.push(sse::tool_use_start(id, name));
        lines.extend(fragments.iter().map(|f| sse::input_json_delta(f)));
        lines.push(sse::message_delta("tool_use"));
        lines.push(sse::done());
        Self::Lines(lines)
    }

    pub fn http_error(status: u16, body: &str) -> Self {
        Self::HttpError {
            status,
            body: body.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct MockProvider {
    scripts: Arc<Mutex<VecDeque<MockScript>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    name: String,
    model: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            name: "mock".to_string(),
            model: "mock-model".to_string(),
        }
    }

    pub fn with_script(self, script: MockScript) -> Self {
        self.push_script(script);
        self
    }

    pub fn with_scripts(self, scripts: Vec<MockScript>) -> Self {
        for script in scripts {
            self.push_script(script);
        }
        self
    }

    pub fn push_script(&self, script: MockScript) {
        self.scripts
            .lock()
            .expect("mock script lock poisoned")
            .push_back(script);
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .expect("mock request lock poisoned")
            .clone()
    }

    pub fn remaining_scripts(&self) -> usize {
        self.scripts.lock().expect("mock script lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<LineStream> {
        self.requests
            .lock()
            .expect("mock request lock poisoned")
            .push(request);

        let script = self
            .scripts
            .lock()
            .expect("mock script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| MockScript::text(""));

        let (lines, interrupted) = match script {
            MockScript::HttpError { status, body } => {
                return Err(ProviderError::Http { status, body }.into());
            }
            MockScript::Lines(lines) => (lines, false),
            MockScript::Interrupted(lines) => (lines, true),
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for line in lines {
                if tx.send(Ok(line)).await.is_err() {
                    return;
                }
            }
            if interrupted {
                let _ = tx
                    .send(Err(ProviderError::Stream("connection reset".to_string()).into()))
                    .await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        1024
    }
}
