//! Tool-call accumulator.
//!
//! Assembles the fragmented argument JSON of one tool invocation at a time.
//! At most one invocation is open; a new tool block-start discards a stale
//! one left behind by an aborted stream.

use aide_providers::StopReason;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tool_definitions::*;

#[derive(Debug, Clone, PartialEq)]
enum AccumulatorState {
    Idle,
    Accumulating {
        id: String,
        tool: String,
        buffer: String,
    },
}

/// A fully assembled invocation, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCall {
    pub id: String,
    pub tool: String,
    pub args: Value,
    /// Arguments came from the fallback payload, not from the stream
    pub fallback: bool,
}

#[derive(Debug)]
pub struct ToolCallAccumulator {
    state: AccumulatorState,
    discarded: usize,
    fallbacks: usize,
}

impl Default for ToolCallAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Idle,
            discarded: 0,
            fallbacks: 0,
        }
    }

    /// Handle a block-start event. Only blocks naming a tool open an invocation.
    pub fn on_block_start(&mut self, id: Option<&str>, name: Option<&str>) {
        let Some(tool) = name else {
            return;
        };

        if let AccumulatorState::Accumulating { id: stale, tool: stale_tool, .. } = &self.state {
            warn!(
                "Discarding unfinished invocation {} ({}) for new block {}",
                stale,
                stale_tool,
                id.unwrap_or("<no id>")
            );
            self.discarded += 1;
        }

        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("toolu_local_{}", Uuid::new_v4().simple()),
        };

        debug!("Opening invocation {} for {}", id, tool);
        self.state = AccumulatorState::Accumulating {
            id,
            tool: tool.to_string(),
            buffer: String::new(),
        };
    }

    /// Append a fragment verbatim to the open invocation.
    pub fn on_argument_fragment(&mut self, fragment: &str) {
        match &mut self.state {
            AccumulatorState::Accumulating { buffer, .. } => buffer.push_str(fragment),
            AccumulatorState::Idle => {
                debug!("Dropping argument fragment with no open invocation");
            }
        }
    }

    /// Close the open invocation on a tool-use stop.
    ///
    /// Any other stop reason discards whatever was open.
    pub fn on_turn_stop(&mut self, reason: &StopReason) -> Option<AssembledCall> {
        let state = std::mem::replace(&mut self.state, AccumulatorState::Idle);
        let AccumulatorState::Accumulating { id, tool, buffer } = state else {
            return None;
        };

        if *reason != StopReason::ToolUse {
            warn!(
                "Stream stopped ({:?}) with invocation {} ({}) still open; discarding",
                reason, id, tool
            );
            self.discarded += 1;
            return None;
        }

        let parsed = if buffer.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&buffer) {
                Ok(value @ Value::Object(_)) => Some(value),
                Ok(other) => {
                    debug!("Arguments for {} are not an object: {}", id, other);
                    None
                }
                Err(e) => {
                    debug!("Arguments for {} did not parse: {}", id, e);
                    None
                }
            }
        };

        let (args, fallback) = match parsed {
            Some(args) => (args, false),
            None => {
                warn!(
                    "Substituting fallback arguments for {} ({}), {} bytes buffered",
                    id,
                    tool,
                    buffer.len()
                );
                self.fallbacks += 1;
                (fallback_payload(&tool), true)
            }
        };

        Some(AssembledCall {
            id,
            tool,
            args,
            fallback,
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, AccumulatorState::Accumulating { .. })
    }

    /// Invocations discarded by a superseding block-start or a non-tool stop.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Drop any open invocation, e.g. when the stream fails.
    pub fn reset(&mut self) {
        if self.is_open() {
            self.discarded += 1;
        }
        self.state = AccumulatorState::Idle;
    }
}

/// The hard-coded argument object used when assembly fails.
///
/// Modify and delete tools get an empty object so validation rejects them
/// instead of mutating an arbitrary item.
pub fn fallback_payload(tool: &str) -> Value {
    match tool {
        ADD_CALENDAR_EVENT => calendar_event_fallback(),
        ADD_CALENDAR_EVENTS => json!({ "items": [calendar_event_fallback()] }),
        ADD_REMINDER => reminder_fallback(),
        ADD_REMINDERS => json!({ "items": [reminder_fallback()] }),
        ADD_MEMORY => memory_fallback(),
        ADD_MEMORIES => json!({ "items": [memory_fallback()] }),
        _ => Value::Object(Map::new()),
    }
}

fn calendar_event_fallback() -> Value {
    json!({ "title": "New Event", "start": "today 09:00", "end": "today 10:00" })
}

fn reminder_fallback() -> Value {
    json!({ "title": "New Reminder" })
}

fn memory_fallback() -> Value {
    json!({ "content": "(empty memory)" })
}
