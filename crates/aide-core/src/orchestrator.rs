//! Conversation orchestrator.
//!
//! Drives one turn at a time through sending, streaming, tool dispatch and
//! finalizing. User turns and automatic turns share the same path; only the
//! seed text differs.

use std::sync::Arc;

use aide_config::Config;
use aide_providers::{
    CompletionRequest, LLMProvider, LineOutcome, StopReason, StreamDecoder, StreamEventHandler,
};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::{AssembledCall, ToolCallAccumulator};
use crate::capabilities::Capabilities;
use crate::context::{system_text, ContextSnapshot};
use crate::dispatcher::{DispatchOrigin, DispatchPolicy, ToolDispatcher};
use crate::error::{describe_transport_error, EngineError};
use crate::history::TurnHistory;
use crate::legacy::{BracketTagGrammar, CommandGrammar};
use crate::prompts::system_prompt;
use crate::scheduler::AutoTrigger;
use crate::stats::{PerformanceTracker, TurnEnd};
use crate::status::StatusBoard;
use crate::turn::{ConversationTurn, ToolInvocation, ToolResult, TurnId};
use crate::ui_writer::UiWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
    ToolDispatch,
    Finalizing,
}

/// Knobs the orchestrator reads on every turn.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    /// Instruction prompt; the context preamble is appended per request
    pub instructions: String,
    pub recent_turns: usize,
    pub max_tool_rounds: usize,
    pub legacy_commands: bool,
    pub dispatch: DispatchPolicy,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            instructions: system_prompt(None, false),
            recent_turns: 10,
            max_tool_rounds: 8,
            legacy_commands: false,
            dispatch: DispatchPolicy::default(),
        }
    }
}

impl ConversationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            instructions: system_prompt(
                config.assistant.system_prompt.as_deref(),
                config.engine.legacy_commands,
            ),
            recent_turns: config.engine.recent_turns,
            max_tool_rounds: config.engine.max_tool_rounds.max(1),
            legacy_commands: config.engine.legacy_commands,
            dispatch: DispatchPolicy::from(&config.engine),
        }
    }
}

/// What one `send` (or automatic turn) produced.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Assistant turns created, one per request round
    pub assistant_turns: Vec<TurnId>,
    /// Final text of those turns
    pub text: String,
    /// Results of model-issued invocations, in dispatch order
    pub tool_results: Vec<ToolResult>,
    /// Results of bracket-tag commands; never sent to the model
    pub command_results: Vec<ToolResult>,
    pub rounds: usize,
    pub fallbacks: usize,
    pub dropped_results: usize,
    /// Set when the turn ended on a transport error or cancellation
    pub interrupted: Option<EngineError>,
}

impl TurnOutcome {
    fn end(&self) -> TurnEnd {
        match self.interrupted {
            None | Some(EngineError::Busy) => TurnEnd::Completed,
            Some(EngineError::Cancelled) => TurnEnd::Cancelled,
            Some(EngineError::Transport(_)) => TurnEnd::TransportError,
        }
    }
}

enum RoundEnd {
    Completed,
    Cancelled,
    Transport(String),
}

/// Collects decoder callbacks for one round.
struct RoundCollector {
    accumulator: ToolCallAccumulator,
    text: String,
    ready: Vec<AssembledCall>,
}

impl StreamEventHandler for RoundCollector {
    fn on_block_start(&mut self, id: Option<&str>, name: Option<&str>) {
        self.accumulator.on_block_start(id, name);
    }

    fn on_argument_fragment(&mut self, fragment: &str) {
        self.accumulator.on_argument_fragment(fragment);
    }

    fn on_turn_stop(&mut self, reason: &StopReason) {
        if let Some(call) = self.accumulator.on_turn_stop(reason) {
            self.ready.push(call);
        }
    }

    fn on_text_delta(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

pub struct Conversation<W: UiWriter> {
    provider: Arc<dyn LLMProvider>,
    dispatcher: ToolDispatcher,
    history: TurnHistory,
    ui_writer: W,
    tracker: Arc<PerformanceTracker>,
    settings: ConversationSettings,
    grammar: Option<Box<dyn CommandGrammar>>,
    phase: TurnPhase,
    streaming_turn: Option<TurnId>,
}

impl<W: UiWriter> Conversation<W> {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        capabilities: Capabilities,
        ui_writer: W,
        settings: ConversationSettings,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        let dispatcher =
            ToolDispatcher::new(capabilities, StatusBoard::new(), settings.dispatch.clone());
        let grammar: Option<Box<dyn CommandGrammar>> = if settings.legacy_commands {
            Some(Box::new(BracketTagGrammar::new()))
        } else {
            None
        };
        Self {
            provider,
            dispatcher,
            history: TurnHistory::new(),
            ui_writer,
            tracker,
            settings,
            grammar,
            phase: TurnPhase::Idle,
            streaming_turn: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn history(&self) -> &TurnHistory {
        &self.history
    }

    pub fn status(&self) -> &StatusBoard {
        self.dispatcher.status()
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.dispatcher.capabilities()
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn ui_writer(&self) -> &W {
        &self.ui_writer
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    /// Run a user-initiated turn.
    pub async fn send(
        &mut self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.recover_abandoned_turn();
        self.history.push(ConversationTurn::user(text, false));
        Ok(self.run_turn(false, &cancel).await)
    }

    /// Run a system-initiated turn seeded for `trigger`.
    pub async fn run_automatic_turn(
        &mut self,
        trigger: AutoTrigger,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.recover_abandoned_turn();
        info!("Running automatic turn ({:?})", trigger);
        self.history.push(ConversationTurn::user(trigger.seed(), true));
        Ok(self.run_turn(true, &cancel).await)
    }

    /// Explicit history clear: turns, pending results and status entries.
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.dispatcher.status().clear();
        self.streaming_turn = None;
        self.phase = TurnPhase::Idle;
        info!("Conversation history cleared");
    }

    /// A previous turn's future was dropped mid-flight; close its turn so
    /// nothing is left in progress.
    fn recover_abandoned_turn(&mut self) {
        if let Some(turn_id) = self.streaming_turn.take() {
            warn!("Closing abandoned turn {}", turn_id);
            if let Some(turn) = self.history.get_mut(turn_id) {
                turn.append_text(" [interrupted]");
                turn.finalize();
            }
        }
        self.phase = TurnPhase::Idle;
    }

    async fn run_turn(&mut self, automatic: bool, cancel: &CancellationToken) -> TurnOutcome {
        let started = Instant::now();
        let mut outcome = TurnOutcome::default();
        let mut first_token_seen = false;

        loop {
            outcome.rounds += 1;

            self.phase = TurnPhase::Sending;
            let request = self.build_request(&mut outcome).await;

            let turn_id = self.history.push(ConversationTurn::streaming_assistant());
            self.streaming_turn = Some(turn_id);
            outcome.assistant_turns.push(turn_id);

            let dispatched_before = outcome.tool_results.len();
            let end = self
                .stream_round(
                    turn_id,
                    request,
                    cancel,
                    started,
                    &mut first_token_seen,
                    &mut outcome,
                )
                .await;
            let dispatched = outcome.tool_results.len() - dispatched_before;

            self.phase = TurnPhase::Finalizing;
            self.finalize_round(turn_id, &end, &mut outcome).await;

            match end {
                RoundEnd::Completed if dispatched > 0 => {
                    if outcome.rounds >= self.settings.max_tool_rounds {
                        warn!(
                            "Stopping after {} tool rounds; {} results left unsent",
                            outcome.rounds,
                            self.history.pending().len()
                        );
                        break;
                    }
                    debug!("Round {} dispatched {} tools; continuing", outcome.rounds, dispatched);
                }
                RoundEnd::Completed => break,
                RoundEnd::Cancelled => {
                    outcome.interrupted = Some(EngineError::Cancelled);
                    break;
                }
                RoundEnd::Transport(message) => {
                    outcome.interrupted = Some(EngineError::Transport(message));
                    break;
                }
            }
        }

        outcome.text = outcome
            .assistant_turns
            .iter()
            .filter_map(|id| self.history.get(*id))
            .map(|turn| turn.content().trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.ui_writer.finish_response();
        self.ui_writer.flush();
        self.tracker.record_turn(started.elapsed(), automatic, outcome.end());
        self.phase = TurnPhase::Idle;
        outcome
    }

    async fn build_request(&mut self, outcome: &mut TurnOutcome) -> CompletionRequest {
        let snapshot = ContextSnapshot::gather(
            self.dispatcher.capabilities(),
            self.settings.dispatch.timeout,
            self.history.earlier_turns(self.settings.recent_turns),
        )
        .await;

        let history = self.history.take_request();
        if history.dropped_results > 0 {
            outcome.dropped_results += history.dropped_results;
            self.tracker.record_dropped_results(history.dropped_results);
        }
        debug!(
            "Request with {} messages, {} tool results",
            history.messages.len(),
            history.included_results
        );

        CompletionRequest {
            system: system_text(&self.settings.instructions, &snapshot),
            messages: history.messages,
            tools: self.dispatcher.registry().definitions(),
            max_tokens: None,
        }
    }

    async fn stream_round(
        &mut self,
        turn_id: TurnId,
        request: CompletionRequest,
        cancel: &CancellationToken,
        started: Instant,
        first_token_seen: &mut bool,
        outcome: &mut TurnOutcome,
    ) -> RoundEnd {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RoundEnd::Cancelled,
            opened = self.provider.stream(request) => match opened {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Request to {} failed: {:#}", self.provider.name(), e);
                    return RoundEnd::Transport(describe_transport_error(&e));
                }
            },
        };

        self.phase = TurnPhase::Streaming;
        let mut decoder = StreamDecoder::new();
        let mut collector = RoundCollector {
            accumulator: ToolCallAccumulator::new(),
            text: String::new(),
            ready: Vec::new(),
        };

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break RoundEnd::Cancelled,
                line = stream.next() => line,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    error!("Stream from {} failed: {:#}", self.provider.name(), e);
                    break RoundEnd::Transport(describe_transport_error(&e));
                }
                None => {
                    debug!("Stream closed after {} lines", decoder.lines_seen());
                    break RoundEnd::Completed;
                }
            };

            self.ui_writer.notify_sse_received();
            let line_outcome = decoder.feed(&line, &mut collector);

            if !*first_token_seen && decoder.events_emitted() > 0 {
                *first_token_seen = true;
                self.tracker.record_first_token(started.elapsed());
            }

            if !collector.text.is_empty() {
                let delta = std::mem::take(&mut collector.text);
                if let Some(turn) = self.history.get_mut(turn_id) {
                    turn.append_text(&delta);
                }
                self.ui_writer.print_agent_response(&delta);
            }

            let ready = std::mem::take(&mut collector.ready);
            for call in ready {
                self.phase = TurnPhase::ToolDispatch;
                self.dispatch_call(turn_id, call, outcome).await;
                self.phase = TurnPhase::Streaming;
            }

            if line_outcome == LineOutcome::Finished {
                break RoundEnd::Completed;
            }
        };

        if !matches!(end, RoundEnd::Completed) {
            collector.accumulator.reset();
        }
        outcome.fallbacks += collector.accumulator.fallbacks();
        end
    }

    async fn dispatch_call(
        &mut self,
        turn_id: TurnId,
        call: AssembledCall,
        outcome: &mut TurnOutcome,
    ) {
        let invocation = ToolInvocation {
            id: call.id,
            tool: call.tool,
            args: call.args,
            origin_turn: turn_id,
            fallback: call.fallback,
        };

        // Recorded before dispatch so the result always has its invocation
        if let Some(turn) = self.history.get_mut(turn_id) {
            turn.record_invocation(invocation.clone());
        }
        if invocation.fallback {
            self.tracker.record_fallback();
        }

        self.ui_writer.print_tool_header(&invocation.tool, Some(&invocation.args));
        let started = Instant::now();
        let result = self
            .dispatcher
            .dispatch(&invocation, DispatchOrigin::Model, turn_id)
            .await;
        self.tracker
            .record_tool(&invocation.tool, started.elapsed(), result.success);
        self.ui_writer.print_tool_result(&invocation.tool, &result);

        self.history.queue_result(result.clone());
        outcome.tool_results.push(result);
    }

    async fn finalize_round(&mut self, turn_id: TurnId, end: &RoundEnd, outcome: &mut TurnOutcome) {
        let mut commands = Vec::new();

        if let Some(turn) = self.history.get_mut(turn_id) {
            match end {
                RoundEnd::Transport(message) => {
                    turn.replace_text(format!("⚠️ {}", message));
                    self.ui_writer.print_error(message);
                }
                RoundEnd::Cancelled => {
                    let suffix = if turn.content().is_empty() {
                        "[cancelled]"
                    } else {
                        " [cancelled]"
                    };
                    turn.append_text(suffix);
                }
                RoundEnd::Completed => {
                    if let Some(grammar) = &self.grammar {
                        commands = grammar.parse(turn.content());
                        if !commands.is_empty() {
                            let stripped = grammar.strip(turn.content());
                            turn.replace_text(stripped);
                        }
                    }
                }
            }
            turn.finalize();
        }
        self.streaming_turn = None;

        for (index, command) in commands.into_iter().enumerate() {
            let invocation = ToolInvocation {
                id: format!("cmd_{}_{}", turn_id.simple(), index + 1),
                tool: command.tool.to_string(),
                args: command.args,
                origin_turn: turn_id,
                fallback: false,
            };
            debug!("Running bracket command {}", command.source);
            self.ui_writer.print_tool_header(&invocation.tool, Some(&invocation.args));
            let started = Instant::now();
            let result = self
                .dispatcher
                .dispatch(&invocation, DispatchOrigin::Internal, turn_id)
                .await;
            self.tracker
                .record_tool(&invocation.tool, started.elapsed(), result.success);
            self.ui_writer.print_tool_result(&invocation.tool, &result);
            outcome.command_results.push(result);
        }
    }
}

/// Serialized access point for hosts that drive the conversation from
/// several tasks (input loop, idle timer).
pub struct ConversationHandle<W: UiWriter> {
    inner: Arc<Mutex<Conversation<W>>>,
}

impl<W: UiWriter> Clone for ConversationHandle<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: UiWriter> ConversationHandle<W> {
    pub fn new(conversation: Conversation<W>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conversation)),
        }
    }

    /// Send unless a turn is already in flight.
    pub async fn try_send(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut conversation = self.inner.try_lock().map_err(|_| EngineError::Busy)?;
        conversation.send(text, cancel).await
    }

    /// Send, waiting for any in-flight turn to finish first.
    pub async fn send(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        self.inner.lock().await.send(text, cancel).await
    }

    /// Run an automatic turn unless a turn is already in flight.
    pub async fn try_run_automatic_turn(
        &self,
        trigger: AutoTrigger,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut conversation = self.inner.try_lock().map_err(|_| EngineError::Busy)?;
        conversation.run_automatic_turn(trigger, cancel).await
    }

    pub async fn reset_history(&self) {
        self.inner.lock().await.reset_history();
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Exclusive access for inspection between turns.
    pub async fn lock(&self) -> MutexGuard<'_, Conversation<W>> {
        self.inner.lock().await
    }
}
