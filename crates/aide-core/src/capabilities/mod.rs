//! Capability providers: the calendar, reminder, memory and location
//! collaborators that tool invocations act on.

mod in_memory;
mod memory_file;

pub use in_memory::{InMemoryCalendar, InMemoryMemories, InMemoryReminders};
pub use memory_file::FileMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CapabilityError;
use crate::tool_args::{
    EventFields, EventPatch, MemoryFields, MemoryPatch, ReminderFields, ReminderPatch,
};

/// Narrows what `list` returns.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub limit: Option<usize>,
    pub include_completed: bool,
}

impl ListFilter {
    pub fn upcoming(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            include_completed: false,
        }
    }
}

/// CRUD over items keyed by opaque string ids.
///
/// `F` is what `create` takes, `P` the partial update, `I` the listed item.
#[async_trait]
pub trait CapabilityStore<F, P, I>: Send + Sync
where
    F: Send + 'static,
    P: Send + 'static,
{
    async fn create(&self, fields: F) -> Result<String, CapabilityError>;
    async fn update(&self, id: &str, patch: P) -> Result<(), CapabilityError>;
    async fn delete(&self, id: &str) -> Result<(), CapabilityError>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<I>, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    pub end: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub title: String,
    pub due: Option<String>,
    pub notes: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    /// Not every backing store records this
    pub created_at: Option<DateTime<Utc>>,
}

pub type CalendarStore = dyn CapabilityStore<EventFields, EventPatch, CalendarEvent>;
pub type ReminderStore = dyn CapabilityStore<ReminderFields, ReminderPatch, Reminder>;
pub type MemoryStore = dyn CapabilityStore<MemoryFields, MemoryPatch, MemoryEntry>;

/// Where the user is, as a human-readable place name.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_location(&self) -> Result<Option<String>, CapabilityError>;
}

/// A fixed, configured location.
pub struct StaticLocation(pub String);

#[async_trait]
impl LocationSource for StaticLocation {
    async fn current_location(&self) -> Result<Option<String>, CapabilityError> {
        Ok(Some(self.0.clone()))
    }
}

/// The set of providers bound to the tool registry. A missing provider makes
/// its tools fail with `Unavailable`.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub calendar: Option<Arc<CalendarStore>>,
    pub reminders: Option<Arc<ReminderStore>>,
    pub memory: Option<Arc<MemoryStore>>,
    pub location: Option<Arc<dyn LocationSource>>,
}

impl Capabilities {
    /// In-memory calendar and reminders plus the given memory store.
    pub fn local(memory: Arc<MemoryStore>) -> Self {
        Self {
            calendar: Some(Arc::new(InMemoryCalendar::new())),
            reminders: Some(Arc::new(InMemoryReminders::new())),
            memory: Some(memory),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Arc<dyn LocationSource>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn calendar(&self) -> Result<&Arc<CalendarStore>, CapabilityError> {
        self.calendar
            .as_ref()
            .ok_or_else(|| CapabilityError::Unavailable("calendar".to_string()))
    }

    pub fn reminders(&self) -> Result<&Arc<ReminderStore>, CapabilityError> {
        self.reminders
            .as_ref()
            .ok_or_else(|| CapabilityError::Unavailable("reminders".to_string()))
    }

    pub fn memory(&self) -> Result<&Arc<MemoryStore>, CapabilityError> {
        self.memory
            .as_ref()
            .ok_or_else(|| CapabilityError::Unavailable("memory".to_string()))
    }
}
