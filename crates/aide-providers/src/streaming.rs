//! Server-sent event line handling and the protocol event decoder.
//!
//! Bytes arrive from the transport in arbitrary chunks. [`LineSplitter`] turns
//! them into complete lines, and [`StreamDecoder`] turns each line into at most
//! one typed [`StreamEvent`], handed to a [`StreamEventHandler`] callback.
//! The decoder holds no state beyond the current line and whether the
//! end-of-stream sentinel has been seen.

use serde::Deserialize;
use tracing::debug;

/// Prefix carried by every event line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

// ─────────────────────────────────────────────────────────────────────────────
// UTF-8 Streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Try to decode bytes as UTF-8, handling incomplete sequences at the end.
/// Returns the decoded string and leaves any incomplete bytes in the buffer.
pub fn decode_utf8_streaming(byte_buffer: &mut Vec<u8>) -> Option<String> {
    match std::str::from_utf8(byte_buffer) {
        Ok(s) => {
            let result = s.to_string();
            byte_buffer.clear();
            Some(result)
        }
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            if valid_up_to > 0 {
                let valid_bytes: Vec<u8> = byte_buffer.drain(..valid_up_to).collect();
                Some(String::from_utf8_lossy(&valid_bytes).into_owned())
            } else if e.error_len().is_some() {
                // Permanently invalid byte at the front; skip it.
                byte_buffer.drain(..1);
                None
            } else {
                None // No valid UTF-8 yet, wait for more bytes
            }
        }
    }
}

/// Reassembles transport chunks into complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    bytes: Vec<u8>,
    text: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        loop {
            let before = self.bytes.len();
            if let Some(decoded) = decode_utf8_streaming(&mut self.bytes) {
                self.text.push_str(&decoded);
            }
            if self.bytes.is_empty() || self.bytes.len() == before {
                break;
            }
        }

        let mut lines = Vec::new();
        while let Some(line_end) = self.text.find('\n') {
            let line = self.text[..line_end].trim_end_matches('\r').to_string();
            self.text.drain(..line_end + 1);
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the transport closes without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if !self.bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.bytes).into_owned();
            self.text.push_str(&tail);
            self.bytes.clear();
        }
        if self.text.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.text))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol events
// ─────────────────────────────────────────────────────────────────────────────

/// Why the model stopped producing the current message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    ToolUse,
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "tool_use" => Self::ToolUse,
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content block opened. Tool-use blocks carry the invocation id and tool name.
    BlockStart {
        id: Option<String>,
        name: Option<String>,
    },
    /// A chunk of the open invocation's JSON arguments.
    ArgumentFragment(String),
    TurnStop(StopReason),
    TextDelta(String),
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// Blank, unprefixed, malformed, or of an unknown kind.
    Skip,
    Event(StreamEvent),
    End,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    event_type: String,
    content_block: Option<WireBlock>,
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    id: Option<String>,
    name: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

/// Decode a single protocol line.
pub fn decode_line(line: &str) -> DecodedLine {
    let line = line.trim();
    if line.is_empty() {
        return DecodedLine::Skip;
    }

    let Some(data) = line.strip_prefix(DATA_PREFIX.trim_end()) else {
        return DecodedLine::Skip;
    };
    let data = data.trim_start();

    if data == DONE_SENTINEL {
        return DecodedLine::End;
    }

    let event: WireEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            debug!("Dropping malformed stream event: {} - Data: {}", e, data);
            return DecodedLine::Skip;
        }
    };

    match event.event_type.as_str() {
        "content_block_start" => {
            let Some(block) = event.content_block else {
                return DecodedLine::Skip;
            };
            match block.block_type.as_deref() {
                Some("tool_use") => DecodedLine::Event(StreamEvent::BlockStart {
                    id: block.id,
                    name: block.name,
                }),
                Some("text") => match block.text {
                    Some(text) if !text.is_empty() => {
                        DecodedLine::Event(StreamEvent::TextDelta(text))
                    }
                    _ => DecodedLine::Event(StreamEvent::BlockStart {
                        id: None,
                        name: None,
                    }),
                },
                _ => DecodedLine::Skip,
            }
        }
        "content_block_delta" => {
            let Some(delta) = event.delta else {
                return DecodedLine::Skip;
            };
            match delta.delta_type.as_deref() {
                Some("input_json_delta") => match delta.partial_json {
                    Some(fragment) => DecodedLine::Event(StreamEvent::ArgumentFragment(fragment)),
                    None => DecodedLine::Skip,
                },
                Some("text_delta") | None => match delta.text {
                    Some(text) => DecodedLine::Event(StreamEvent::TextDelta(text)),
                    None => DecodedLine::Skip,
                },
                _ => DecodedLine::Skip,
            }
        }
        "message_delta" => match event.delta.and_then(|d| d.stop_reason) {
            Some(reason) => DecodedLine::Event(StreamEvent::TurnStop(StopReason::parse(&reason))),
            None => DecodedLine::Skip,
        },
        _ => DecodedLine::Skip,
    }
}

/// Callbacks driven by [`StreamDecoder::feed`], one per event kind.
pub trait StreamEventHandler {
    fn on_block_start(&mut self, id: Option<&str>, name: Option<&str>);
    fn on_argument_fragment(&mut self, fragment: &str);
    fn on_turn_stop(&mut self, reason: &StopReason);
    fn on_text_delta(&mut self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Finished,
}

/// Line-at-a-time decoder. Never looks past the line it is given.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    finished: bool,
    lines_seen: usize,
    events_emitted: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed<H: StreamEventHandler>(&mut self, line: &str, handler: &mut H) -> LineOutcome {
        if self.finished {
            return LineOutcome::Finished;
        }
        self.lines_seen += 1;

        match decode_line(line) {
            DecodedLine::Skip => LineOutcome::Continue,
            DecodedLine::End => {
                debug!(
                    "Received stream completion marker after {} lines",
                    self.lines_seen
                );
                self.finished = true;
                LineOutcome::Finished
            }
            DecodedLine::Event(event) => {
                self.events_emitted += 1;
                match &event {
                    StreamEvent::BlockStart { id, name } => {
                        handler.on_block_start(id.as_deref(), name.as_deref())
                    }
                    StreamEvent::ArgumentFragment(fragment) => {
                        handler.on_argument_fragment(fragment)
                    }
                    StreamEvent::TurnStop(reason) => handler.on_turn_stop(reason),
                    StreamEvent::TextDelta(text) => handler.on_text_delta(text),
                }
                LineOutcome::Continue
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    pub fn events_emitted(&self) -> usize {
        self.events_emitted
    }
}
