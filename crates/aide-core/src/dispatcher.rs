//! Tool dispatch - routes validated invocations to capability providers.
//!
//! Every dispatch produces exactly one `ToolResult` and moves exactly one
//! status entry from in-progress to a terminal state, whatever happens.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use aide_config::EngineConfig;
use tracing::{debug, warn};

use crate::capabilities::{Capabilities, CapabilityStore};
use crate::error::{CapabilityError, ValidationError};
use crate::status::{Action, OperationKind, OperationState, StatusBoard, Target};
use crate::tool_args::{BatchItems, Change, ToolArgs};
use crate::tool_definitions::ToolRegistry;
use crate::turn::{ToolInvocation, ToolResult, TurnId};

/// Who asked for the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// A structured tool call streamed by the model
    Model,
    /// Engine-issued calls, e.g. legacy bracket-tag commands
    Internal,
}

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Upper bound on any single provider call
    pub timeout: Duration,
    /// Report "already absent" style failures of model calls as success
    pub report_soft_failures_as_success: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            report_soft_failures_as_success: true,
        }
    }
}

impl From<&EngineConfig> for DispatchPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.tool_timeout(),
            report_soft_failures_as_success: config.report_soft_failures_as_success,
        }
    }
}

#[derive(Debug)]
enum ItemError {
    Invalid(ValidationError),
    Capability(CapabilityError),
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::Invalid(e) => write!(f, "{}", e),
            ItemError::Capability(e) => write!(f, "{}", e),
        }
    }
}

enum Outcome {
    Single(Result<String, CapabilityError>),
    Batch(Vec<Result<String, ItemError>>),
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    capabilities: Capabilities,
    status: StatusBoard,
    policy: DispatchPolicy,
}

impl ToolDispatcher {
    pub fn new(capabilities: Capabilities, status: StatusBoard, policy: DispatchPolicy) -> Self {
        Self {
            registry: ToolRegistry::new(),
            capabilities,
            status,
            policy,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Execute one invocation and return the result to feed back.
    pub async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        origin: DispatchOrigin,
        turn_id: TurnId,
    ) -> ToolResult {
        let kind = self.registry.lookup(&invocation.tool).map(|spec| spec.kind);
        let entry = self.status.begin(turn_id, &invocation.id, kind);
        let started = Instant::now();
        debug!(
            "Dispatching {} ({}) from {:?}",
            invocation.tool, invocation.id, origin
        );

        let outcome = match (kind, ToolArgs::parse(&invocation.tool, &invocation.args)) {
            (Some(kind), Ok(args)) => Ok((kind, self.execute(args).await)),
            (None, _) => Err(ValidationError::UnknownTool(invocation.tool.clone())),
            (_, Err(e)) => Err(e),
        };

        let concluded = match outcome {
            Ok((kind, Outcome::Single(result))) => self.conclude_single(kind, origin, result),
            Ok((kind, Outcome::Batch(items))) => self.conclude_batch(kind, origin, items),
            Err(e) => {
                warn!("Rejected {} ({}): {}", invocation.tool, invocation.id, e);
                Concluded::failure(format!("Error: {}", e), e.to_string())
            }
        };

        let Concluded {
            mut content,
            state,
            detail,
            affected,
        } = concluded;

        if invocation.fallback {
            if state == OperationState::Success {
                content.push_str(
                    " Note: the arguments were incomplete, so placeholder values were used. \
                     Ask the user to confirm or correct them.",
                );
            } else {
                content.push_str(
                    " The arguments could not be read; retry with complete arguments.",
                );
            }
        }

        self.status.conclude(entry, state, detail, affected);
        debug!(
            "Dispatched {} ({}) -> {:?} in {:?}",
            invocation.tool,
            invocation.id,
            state,
            started.elapsed()
        );

        match state {
            OperationState::Success => ToolResult::success(&invocation.id, content),
            _ => ToolResult::failure(&invocation.id, content),
        }
    }

    fn treat_as_success(&self, origin: DispatchOrigin, error: &CapabilityError) -> bool {
        origin == DispatchOrigin::Model
            && self.policy.report_soft_failures_as_success
            && error.is_soft()
    }

    fn conclude_single(
        &self,
        kind: OperationKind,
        origin: DispatchOrigin,
        result: Result<String, CapabilityError>,
    ) -> Concluded {
        match result {
            Ok(message) => Concluded {
                content: message,
                state: OperationState::Success,
                detail: None,
                affected: 1,
            },
            Err(e) if self.treat_as_success(origin, &e) => Concluded {
                content: soft_success_message(kind, &e),
                state: OperationState::Success,
                detail: Some(format!("treated as success: {}", e)),
                affected: 0,
            },
            Err(e) => Concluded::failure(format!("Error: {}", e), e.to_string()),
        }
    }

    fn conclude_batch(
        &self,
        kind: OperationKind,
        origin: DispatchOrigin,
        items: Vec<Result<String, ItemError>>,
    ) -> Concluded {
        let total = items.len();
        let mut applied = 0;
        let mut succeeded = 0;
        let mut lines = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            let n = index + 1;
            match item {
                Ok(message) => {
                    applied += 1;
                    succeeded += 1;
                    lines.push(format!("- item {}: {}", n, message));
                }
                Err(ItemError::Capability(e)) if self.treat_as_success(origin, &e) => {
                    succeeded += 1;
                    lines.push(format!("- item {}: {}", n, soft_success_message(kind, &e)));
                }
                Err(e) => lines.push(format!("- item {} failed: {}", n, e)),
            }
        }

        let failed = total - succeeded;
        let summary = format!(
            "{} {}: {} succeeded, {} failed.",
            verb(kind.action),
            kind.target.noun(total),
            succeeded,
            failed
        );
        let content = format!("{}\n{}", summary, lines.join("\n"));

        // Partial failure still counts as success; only a batch with nothing
        // done is a failure.
        let state = if succeeded == 0 {
            OperationState::Failure
        } else {
            OperationState::Success
        };
        let detail = (failed > 0).then(|| summary.clone());

        Concluded {
            content,
            state,
            detail,
            affected: applied,
        }
    }

    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, CapabilityError> {
        match tokio::time::timeout(self.policy.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Capability call timed out after {:?}", self.policy.timeout);
                Err(CapabilityError::Timeout(self.policy.timeout))
            }
        }
    }

    async fn create<F, P, I>(
        &self,
        store: &dyn CapabilityStore<F, P, I>,
        target: Target,
        label: String,
        fields: F,
    ) -> Result<String, CapabilityError>
    where
        F: Send + 'static,
        P: Send + 'static,
    {
        let id = self.guarded(store.create(fields)).await?;
        Ok(format!("Created {} '{}' with id {}.", target.noun(1), label, id))
    }

    async fn update<F, P, I>(
        &self,
        store: &dyn CapabilityStore<F, P, I>,
        target: Target,
        change: Change<P>,
    ) -> Result<String, CapabilityError>
    where
        F: Send + 'static,
        P: Send + 'static,
    {
        self.guarded(store.update(&change.id, change.patch)).await?;
        Ok(format!("Updated {} {}.", target.noun(1), change.id))
    }

    async fn delete<F, P, I>(
        &self,
        store: &dyn CapabilityStore<F, P, I>,
        target: Target,
        id: String,
    ) -> Result<String, CapabilityError>
    where
        F: Send + 'static,
        P: Send + 'static,
    {
        self.guarded(store.delete(&id)).await?;
        Ok(format!("Deleted {} {}.", target.noun(1), id))
    }

    /// Run each valid item in order; invalid items never reach the provider.
    async fn batch<T, Fut>(
        &self,
        items: BatchItems<T>,
        mut op: impl FnMut(T) -> Fut,
    ) -> Vec<Result<String, ItemError>>
    where
        Fut: Future<Output = Result<String, CapabilityError>>,
    {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = match item {
                Ok(value) => op(value).await.map_err(ItemError::Capability),
                Err(e) => Err(ItemError::Invalid(e)),
            };
            results.push(result);
        }
        results
    }

    async fn execute(&self, args: ToolArgs) -> Outcome {
        match self.try_execute(args).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Single(Err(e)),
        }
    }

    async fn try_execute(&self, args: ToolArgs) -> Result<Outcome, CapabilityError> {
        use Target::*;
        let caps = &self.capabilities;

        let outcome = match args {
            ToolArgs::AddEvent(fields) => {
                let store = caps.calendar()?.as_ref();
                let label = fields.title.clone();
                Outcome::Single(self.create(store, CalendarEvent, label, fields).await)
            }
            ToolArgs::AddEvents(items) => {
                let store = caps.calendar()?.as_ref();
                Outcome::Batch(
                    self.batch(items, |f| self.create(store, CalendarEvent, f.title.clone(), f))
                        .await,
                )
            }
            ToolArgs::ModifyEvent(change) => {
                let store = caps.calendar()?.as_ref();
                Outcome::Single(self.update(store, CalendarEvent, change).await)
            }
            ToolArgs::ModifyEvents(items) => {
                let store = caps.calendar()?.as_ref();
                Outcome::Batch(self.batch(items, |c| self.update(store, CalendarEvent, c)).await)
            }
            ToolArgs::DeleteEvent(id) => {
                let store = caps.calendar()?.as_ref();
                Outcome::Single(self.delete(store, CalendarEvent, id).await)
            }
            ToolArgs::DeleteEvents(ids) => {
                let store = caps.calendar()?.as_ref();
                Outcome::Batch(self.batch(ids, |id| self.delete(store, CalendarEvent, id)).await)
            }
            ToolArgs::AddReminder(fields) => {
                let store = caps.reminders()?.as_ref();
                let label = fields.title.clone();
                Outcome::Single(self.create(store, Reminder, label, fields).await)
            }
            ToolArgs::AddReminders(items) => {
                let store = caps.reminders()?.as_ref();
                Outcome::Batch(
                    self.batch(items, |f| self.create(store, Reminder, f.title.clone(), f))
                        .await,
                )
            }
            ToolArgs::ModifyReminder(change) => {
                let store = caps.reminders()?.as_ref();
                Outcome::Single(self.update(store, Reminder, change).await)
            }
            ToolArgs::ModifyReminders(items) => {
                let store = caps.reminders()?.as_ref();
                Outcome::Batch(self.batch(items, |c| self.update(store, Reminder, c)).await)
            }
            ToolArgs::DeleteReminder(id) => {
                let store = caps.reminders()?.as_ref();
                Outcome::Single(self.delete(store, Reminder, id).await)
            }
            ToolArgs::DeleteReminders(ids) => {
                let store = caps.reminders()?.as_ref();
                Outcome::Batch(self.batch(ids, |id| self.delete(store, Reminder, id)).await)
            }
            ToolArgs::AddMemory(fields) => {
                let store = caps.memory()?.as_ref();
                let label = fields.content.clone();
                Outcome::Single(self.create(store, Memory, label, fields).await)
            }
            ToolArgs::AddMemories(items) => {
                let store = caps.memory()?.as_ref();
                Outcome::Batch(
                    self.batch(items, |f| self.create(store, Memory, f.content.clone(), f))
                        .await,
                )
            }
            ToolArgs::ModifyMemory(change) => {
                let store = caps.memory()?.as_ref();
                Outcome::Single(self.update(store, Memory, change).await)
            }
            ToolArgs::ModifyMemories(items) => {
                let store = caps.memory()?.as_ref();
                Outcome::Batch(self.batch(items, |c| self.update(store, Memory, c)).await)
            }
            ToolArgs::DeleteMemory(id) => {
                let store = caps.memory()?.as_ref();
                Outcome::Single(self.delete(store, Memory, id).await)
            }
            ToolArgs::DeleteMemories(ids) => {
                let store = caps.memory()?.as_ref();
                Outcome::Batch(self.batch(ids, |id| self.delete(store, Memory, id)).await)
            }
        };
        Ok(outcome)
    }
}

struct Concluded {
    content: String,
    state: OperationState,
    detail: Option<String>,
    affected: usize,
}

impl Concluded {
    fn failure(content: String, detail: String) -> Self {
        Self {
            content,
            state: OperationState::Failure,
            detail: Some(detail),
            affected: 0,
        }
    }
}

fn verb(action: Action) -> &'static str {
    match action {
        Action::Add => "add",
        Action::Modify => "modify",
        Action::Delete => "delete",
    }
}

fn soft_success_message(kind: OperationKind, error: &CapabilityError) -> String {
    let id = match error {
        CapabilityError::NotFound(id) => id.as_str(),
        _ => "",
    };
    match kind.action {
        Action::Delete => format!(
            "{} {} was already absent; nothing to delete.",
            kind.target.noun(1),
            id
        ),
        _ => format!(
            "{} {} no longer exists; nothing to change.",
            kind.target.noun(1),
            id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{InMemoryMemories, ListFilter, MemoryEntry};
    use crate::tool_args::{MemoryFields, MemoryPatch};
    use crate::tool_definitions::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn invocation(tool: &str, args: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            id: format!("toolu_{}", tool),
            tool: tool.to_string(),
            args,
            origin_turn: Uuid::new_v4(),
            fallback: false,
        }
    }

    /// A memory store whose writes never return.
    struct StalledMemories;

    #[async_trait]
    impl CapabilityStore<MemoryFields, MemoryPatch, MemoryEntry> for StalledMemories {
        async fn create(&self, _fields: MemoryFields) -> Result<String, CapabilityError> {
            std::future::pending().await
        }

        async fn update(&self, _id: &str, _patch: MemoryPatch) -> Result<(), CapabilityError> {
            std::future::pending().await
        }

        async fn delete(&self, _id: &str) -> Result<(), CapabilityError> {
            std::future::pending().await
        }

        async fn list(&self, _filter: &ListFilter) -> Result<Vec<MemoryEntry>, CapabilityError> {
            Ok(Vec::new())
        }
    }

    fn dispatcher(policy: DispatchPolicy) -> ToolDispatcher {
        let caps = Capabilities::local(Arc::new(InMemoryMemories::new()));
        ToolDispatcher::new(caps, StatusBoard::new(), policy)
    }

    #[tokio::test]
    async fn test_single_add_succeeds() {
        let d = dispatcher(DispatchPolicy::default());
        let turn = Uuid::new_v4();
        let result = d
            .dispatch(
                &invocation(ADD_REMINDER, json!({"title": "Call mom"})),
                DispatchOrigin::Model,
                turn,
            )
            .await;
        assert!(result.success);
        assert!(result.content.contains("Call mom"));

        let entries = d.status().entries_for(turn);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, OperationState::Success);
        assert_eq!(entries[0].affected, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_provider_call() {
        let d = ToolDispatcher::new(
            Capabilities::default(),
            StatusBoard::new(),
            DispatchPolicy::default(),
        );
        let turn = Uuid::new_v4();
        let result = d
            .dispatch(&invocation("send_email", json!({})), DispatchOrigin::Model, turn)
            .await;
        assert!(!result.success);
        assert!(result.content.contains("unknown tool"));
        let entries = d.status().entries_for(turn);
        assert_eq!(entries[0].state, OperationState::Failure);
        assert_eq!(entries[0].kind, None);
    }

    #[tokio::test]
    async fn test_missing_field_performs_no_mutation() {
        let d = dispatcher(DispatchPolicy::default());
        let result = d
            .dispatch(
                &invocation(ADD_CALENDAR_EVENT, json!({"title": "Dentist"})),
                DispatchOrigin::Model,
                Uuid::new_v4(),
            )
            .await;
        assert!(!result.success);
        assert!(result.content.contains("'start'"));

        let calendar = d.capabilities().calendar().unwrap();
        assert!(calendar.list(&ListFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_is_hard_failure() {
        let d = ToolDispatcher::new(
            Capabilities::default(),
            StatusBoard::new(),
            DispatchPolicy::default(),
        );
        let result = d
            .dispatch(
                &invocation(ADD_MEMORY, json!({"content": "likes tea"})),
                DispatchOrigin::Model,
                Uuid::new_v4(),
            )
            .await;
        assert!(!result.success);
        assert!(result.content.contains("memory is not available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out() {
        let caps = Capabilities::local(Arc::new(StalledMemories));
        let d = ToolDispatcher::new(caps, StatusBoard::new(), DispatchPolicy::default());
        let turn = Uuid::new_v4();

        let result = d
            .dispatch(
                &invocation(ADD_MEMORY, json!({"content": "likes tea"})),
                DispatchOrigin::Model,
                turn,
            )
            .await;
        assert!(!result.success);
        assert!(result.content.contains("timed out after 5s"));

        let entries = d.status().entries_for(turn);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, OperationState::Failure);
        assert_eq!(entries[0].detail.as_deref(), Some("timed out after 5s"));
        assert!(entries[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_soft_failure_policy_applies_to_model_calls_only() {
        let d = dispatcher(DispatchPolicy::default());
        let turn = Uuid::new_v4();

        let delete = invocation(DELETE_REMINDER, json!({"id": "r42"}));

        let model = d.dispatch(&delete, DispatchOrigin::Model, turn).await;
        assert!(model.success);
        assert!(model.content.contains("already absent"));

        let internal = d.dispatch(&delete, DispatchOrigin::Internal, turn).await;
        assert!(!internal.success);

        let states: Vec<_> = d.status().entries_for(turn).iter().map(|e| e.state).collect();
        assert_eq!(states, vec![OperationState::Success, OperationState::Failure]);
    }

    #[tokio::test]
    async fn test_soft_failure_policy_can_be_disabled() {
        let d = dispatcher(DispatchPolicy {
            report_soft_failures_as_success: false,
            ..Default::default()
        });
        let result = d
            .dispatch(
                &invocation(DELETE_MEMORY, json!({"id": "m1"})),
                DispatchOrigin::Model,
                Uuid::new_v4(),
            )
            .await;
        assert!(!result.success);
        assert!(result.content.contains("no item with id 'm1'"));
    }

    #[tokio::test]
    async fn test_fallback_invocation_is_flagged_in_result() {
        let d = dispatcher(DispatchPolicy::default());
        let mut inv = invocation(ADD_REMINDER, crate::accumulator::fallback_payload(ADD_REMINDER));
        inv.fallback = true;
        let result = d.dispatch(&inv, DispatchOrigin::Model, Uuid::new_v4()).await;
        assert!(result.success);
        assert!(result.content.contains("placeholder"));
    }
}
