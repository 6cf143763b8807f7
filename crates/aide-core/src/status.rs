//! User-visible audit trail of tool operations.
//!
//! Every dispatch opens one entry in the in-progress state and concludes it
//! exactly once. Transitions are kept per turn and broadcast to any listener
//! (the presentation layer); they are not part of the model protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

use crate::turn::TurnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    CalendarEvent,
    Reminder,
    Memory,
}

impl Target {
    pub fn noun(&self, count: usize) -> &'static str {
        match (self, count) {
            (Target::CalendarEvent, 1) => "calendar event",
            (Target::CalendarEvent, _) => "calendar events",
            (Target::Reminder, 1) => "reminder",
            (Target::Reminder, _) => "reminders",
            (Target::Memory, 1) => "memory",
            (Target::Memory, _) => "memories",
        }
    }
}

/// One of the nine add/modify/delete × event/reminder/memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKind {
    pub action: Action,
    pub target: Target,
}

impl OperationKind {
    pub const fn new(action: Action, target: Target) -> Self {
        Self { action, target }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.action {
            Action::Add => "add",
            Action::Modify => "modify",
            Action::Delete => "delete",
        };
        write!(f, "{} {}", verb, self.target.noun(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InProgress,
    Success,
    Failure,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

pub type EntryId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatusEntry {
    pub id: EntryId,
    pub turn_id: TurnId,
    pub invocation_id: String,
    /// None when the tool name is not in the catalog
    pub kind: Option<OperationKind>,
    pub state: OperationState,
    pub detail: Option<String>,
    pub affected: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single change to an entry, as broadcast to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub turn_id: TurnId,
    pub entry: OperationStatusEntry,
}

#[derive(Default)]
struct BoardInner {
    next_id: EntryId,
    entries: HashMap<TurnId, Vec<OperationStatusEntry>>,
}

/// Shared, serialized store of status entries keyed by turn.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<BoardInner>>,
    tx: broadcast::Sender<StatusTransition>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(BoardInner::default())),
            tx,
        }
    }

    /// Receive every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusTransition> {
        self.tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardInner> {
        // A poisoned board still holds consistent entries; keep using it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open an in-progress entry for a dispatch.
    pub fn begin(
        &self,
        turn_id: TurnId,
        invocation_id: &str,
        kind: Option<OperationKind>,
    ) -> EntryId {
        let entry = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let entry = OperationStatusEntry {
                id: inner.next_id,
                turn_id,
                invocation_id: invocation_id.to_string(),
                kind,
                state: OperationState::InProgress,
                detail: None,
                affected: 0,
                started_at: Utc::now(),
                finished_at: None,
            };
            inner.entries.entry(turn_id).or_default().push(entry.clone());
            entry
        };
        let id = entry.id;
        let _ = self.tx.send(StatusTransition { turn_id, entry });
        id
    }

    /// Move an entry to its terminal state. A second conclusion is refused.
    pub fn conclude(
        &self,
        entry_id: EntryId,
        state: OperationState,
        detail: Option<String>,
        affected: usize,
    ) -> bool {
        if !state.is_terminal() {
            warn!("Refusing to conclude status entry {} as in-progress", entry_id);
            return false;
        }

        let concluded = {
            let mut inner = self.lock();
            let found = inner
                .entries
                .values_mut()
                .flat_map(|entries| entries.iter_mut())
                .find(|entry| entry.id == entry_id);
            match found {
                Some(entry) if !entry.state.is_terminal() => {
                    entry.state = state;
                    entry.detail = detail;
                    entry.affected = affected;
                    entry.finished_at = Some(Utc::now());
                    Some(entry.clone())
                }
                Some(_) => {
                    warn!("Status entry {} already concluded", entry_id);
                    None
                }
                None => {
                    warn!("Status entry {} not found", entry_id);
                    None
                }
            }
        };

        match concluded {
            Some(entry) => {
                let _ = self.tx.send(StatusTransition {
                    turn_id: entry.turn_id,
                    entry,
                });
                true
            }
            None => false,
        }
    }

    pub fn entries_for(&self, turn_id: TurnId) -> Vec<OperationStatusEntry> {
        self.lock().entries.get(&turn_id).cloned().unwrap_or_default()
    }

    /// All entries, oldest first.
    pub fn all_entries(&self) -> Vec<OperationStatusEntry> {
        let mut all: Vec<OperationStatusEntry> =
            self.lock().entries.values().flatten().cloned().collect();
        all.sort_by_key(|entry| entry.id);
        all
    }

    /// Explicit user history-clear.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}
