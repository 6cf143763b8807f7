//! Turn history and request-history building.
//!
//! A tool result is only sent when the turn immediately before it is the
//! assistant turn that issued the matching invocation. Anything else is
//! dropped, because the upstream service rejects unpaired results.

use aide_providers::{ContentBlock, Message, MessageContent, MessageRole};
use tracing::{debug, warn};

use crate::turn::{ConversationTurn, ToolResult, TurnId};

/// Messages for one outbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestHistory {
    pub messages: Vec<Message>,
    pub included_results: usize,
    pub dropped_results: usize,
}

/// Build the ordered messages for a request from the turns of the current
/// exchange and the results queued since the last request.
pub fn build_request_history(
    turns: &[ConversationTurn],
    pending: Vec<ToolResult>,
) -> RequestHistory {
    let turns: Vec<&ConversationTurn> = turns.iter().filter(|t| t.is_complete()).collect();
    let mut history = RequestHistory::default();

    let (paired_turn, matched) = match turns.last() {
        Some(last) if last.role == MessageRole::Assistant && !pending.is_empty() => {
            let (matched, unmatched): (Vec<ToolResult>, Vec<ToolResult>) = pending
                .into_iter()
                .partition(|result| last.has_invocation(&result.invocation_id));
            drop_results(&unmatched, "no matching invocation in the preceding assistant turn");
            history.dropped_results += unmatched.len();
            if matched.is_empty() {
                (None, matched)
            } else {
                (Some(*last), matched)
            }
        }
        _ => {
            if !pending.is_empty() {
                drop_results(&pending, "preceding turn is not an assistant turn with tool calls");
                history.dropped_results += pending.len();
            }
            (None, Vec::new())
        }
    };

    let plain_count = if paired_turn.is_some() {
        turns.len() - 1
    } else {
        turns.len()
    };

    for turn in &turns[..plain_count] {
        let text = render_text(turn);
        if text.is_empty() {
            continue;
        }
        push_message(&mut history.messages, Message::new(turn.role, text));
    }

    if let Some(turn) = paired_turn {
        let mut call_blocks = Vec::new();
        let mut result_blocks = Vec::new();
        if !turn.content().trim().is_empty() {
            call_blocks.push(ContentBlock::Text {
                text: turn.content().to_string(),
            });
        }
        // Invocation order, so each call is answered in the order it was made
        for invocation in &turn.invocations {
            if let Some(result) = matched.iter().find(|r| r.invocation_id == invocation.id) {
                call_blocks.push(ContentBlock::ToolUse {
                    id: invocation.id.clone(),
                    name: invocation.tool.clone(),
                    input: invocation.args.clone(),
                });
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: result.invocation_id.clone(),
                    content: result.content.clone(),
                    is_error: !result.success,
                });
            }
        }
        history.included_results = result_blocks.len();
        push_message(
            &mut history.messages,
            Message::with_blocks(MessageRole::Assistant, call_blocks),
        );
        push_message(
            &mut history.messages,
            Message::with_blocks(MessageRole::User, result_blocks),
        );
    }

    // The service requires the first message to come from the user
    while history
        .messages
        .first()
        .is_some_and(|m| m.role == MessageRole::Assistant)
    {
        debug!("Dropping leading assistant message from request history");
        history.messages.remove(0);
    }

    history
}

fn drop_results(results: &[ToolResult], rationale: &str) {
    for result in results {
        warn!(
            "Dropping pending tool result {}: {}",
            result.invocation_id, rationale
        );
    }
}

/// Plain-text rendering used for every turn that is not carrying tool calls
/// into the request. Turns that made calls keep a `[called ...]` marker so
/// the model can see what already ran.
fn render_text(turn: &ConversationTurn) -> String {
    let text = turn.content().trim();
    if turn.invocations.is_empty() {
        return text.to_string();
    }
    let tools: Vec<&str> = turn.invocations.iter().map(|inv| inv.tool.as_str()).collect();
    let marker = format!("[called {}]", tools.join(", "));
    if text.is_empty() {
        marker
    } else {
        format!("{}\n{}", text, marker)
    }
}

/// Append a message, merging it into the previous one when the roles match.
fn push_message(messages: &mut Vec<Message>, message: Message) {
    let Some(last) = messages.last_mut() else {
        messages.push(message);
        return;
    };
    if last.role != message.role {
        messages.push(message);
        return;
    }

    let previous = std::mem::replace(&mut last.content, MessageContent::Text(String::new()));
    last.content = match (previous, message.content) {
        (MessageContent::Text(a), MessageContent::Text(b)) => {
            MessageContent::Text(format!("{}\n\n{}", a, b))
        }
        (a, b) => {
            let mut blocks = into_blocks(a);
            blocks.extend(into_blocks(b));
            MessageContent::Blocks(blocks)
        }
    };
}

fn into_blocks(content: MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![ContentBlock::Text { text }],
        MessageContent::Blocks(blocks) => blocks,
    }
}

/// The ordered conversation log plus the results waiting for the next request.
#[derive(Debug, Default)]
pub struct TurnHistory {
    turns: Vec<ConversationTurn>,
    pending: Vec<ToolResult>,
}

impl TurnHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) -> TurnId {
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, id: TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TurnId) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().rev().find(|t| t.id == id)
    }

    pub fn queue_result(&mut self, result: ToolResult) {
        self.pending.push(result);
    }

    pub fn pending(&self) -> &[ToolResult] {
        &self.pending
    }

    /// Index of the user turn that opened the current exchange.
    fn exchange_start(&self) -> usize {
        self.turns
            .iter()
            .rposition(|t| t.role == MessageRole::User)
            .unwrap_or(0)
    }

    /// Turns of the current exchange: the latest user turn and everything after it.
    pub fn current_exchange(&self) -> &[ConversationTurn] {
        &self.turns[self.exchange_start()..]
    }

    /// Up to `limit` completed turns before the current exchange, oldest first.
    pub fn earlier_turns(&self, limit: usize) -> &[ConversationTurn] {
        let end = self.exchange_start();
        let start = end.saturating_sub(limit);
        &self.turns[start..end]
    }

    /// Build the next request's messages. Pending results are consumed
    /// whether or not they could be included.
    pub fn take_request(&mut self) -> RequestHistory {
        let pending = std::mem::take(&mut self.pending);
        build_request_history(self.current_exchange(), pending)
    }

    /// Forget every turn and pending result.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending.clear();
    }
}
