//! Process-local stores. Useful for the CLI and for tests.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use super::{CalendarEvent, CapabilityStore, ListFilter, MemoryEntry, Reminder};
use crate::error::CapabilityError;
use crate::tool_args::{
    EventFields, EventPatch, MemoryFields, MemoryPatch, ReminderFields, ReminderPatch,
};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// One hour after `start`, when `start` is a recognisable local timestamp.
fn default_end(start: &str) -> Option<String> {
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(start, fmt)
            .ok()
            .map(|dt| (dt + Duration::hours(1)).format("%Y-%m-%dT%H:%M").to_string())
    })
}

struct Table<T> {
    prefix: &'static str,
    next_id: u64,
    items: Vec<T>,
}

impl<T> Table<T> {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next_id: 0,
            items: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}{}", self.prefix, self.next_id)
    }
}

fn lock<T>(table: &Mutex<Table<T>>) -> MutexGuard<'_, Table<T>> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

fn apply_limit<T>(mut items: Vec<T>, filter: &ListFilter) -> Vec<T> {
    if let Some(limit) = filter.limit {
        items.truncate(limit);
    }
    items
}

pub struct InMemoryCalendar {
    table: Mutex<Table<CalendarEvent>>,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::new("e")),
        }
    }
}

#[async_trait]
impl CapabilityStore<EventFields, EventPatch, CalendarEvent> for InMemoryCalendar {
    async fn create(&self, fields: EventFields) -> Result<String, CapabilityError> {
        let mut table = lock(&self.table);
        let id = table.allocate_id();
        let end = fields.end.or_else(|| default_end(&fields.start));
        table.items.push(CalendarEvent {
            id: id.clone(),
            title: fields.title,
            start: fields.start,
            end,
            location: fields.location,
            notes: fields.notes,
        });
        Ok(id)
    }

    async fn update(&self, id: &str, patch: EventPatch) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let event = table
            .items
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;
        if let Some(title) = patch.title {
            event.title = title;
        }
        if let Some(start) = patch.start {
            event.start = start;
        }
        if let Some(end) = patch.end {
            event.end = Some(end);
        }
        if let Some(location) = patch.location {
            event.location = Some(location);
        }
        if let Some(notes) = patch.notes {
            event.notes = Some(notes);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let before = table.items.len();
        table.items.retain(|e| e.id != id);
        if table.items.len() == before {
            return Err(CapabilityError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<CalendarEvent>, CapabilityError> {
        let mut events = lock(&self.table).items.clone();
        events.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(apply_limit(events, filter))
    }
}

pub struct InMemoryReminders {
    table: Mutex<Table<Reminder>>,
}

impl Default for InMemoryReminders {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReminders {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::new("r")),
        }
    }
}

#[async_trait]
impl CapabilityStore<ReminderFields, ReminderPatch, Reminder> for InMemoryReminders {
    async fn create(&self, fields: ReminderFields) -> Result<String, CapabilityError> {
        let mut table = lock(&self.table);
        let id = table.allocate_id();
        table.items.push(Reminder {
            id: id.clone(),
            title: fields.title,
            due: fields.due,
            notes: fields.notes,
            completed: false,
        });
        Ok(id)
    }

    async fn update(&self, id: &str, patch: ReminderPatch) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let reminder = table
            .items
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;
        if let Some(title) = patch.title {
            reminder.title = title;
        }
        if let Some(due) = patch.due {
            reminder.due = Some(due);
        }
        if let Some(notes) = patch.notes {
            reminder.notes = Some(notes);
        }
        if let Some(completed) = patch.completed {
            reminder.completed = completed;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let before = table.items.len();
        table.items.retain(|r| r.id != id);
        if table.items.len() == before {
            return Err(CapabilityError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Reminder>, CapabilityError> {
        let reminders: Vec<Reminder> = lock(&self.table)
            .items
            .iter()
            .filter(|r| filter.include_completed || !r.completed)
            .cloned()
            .collect();
        Ok(apply_limit(reminders, filter))
    }
}

/// Memory entries that vanish with the process.
pub struct InMemoryMemories {
    table: Mutex<Table<MemoryEntry>>,
}

impl Default for InMemoryMemories {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMemories {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::new("m")),
        }
    }
}

#[async_trait]
impl CapabilityStore<MemoryFields, MemoryPatch, MemoryEntry> for InMemoryMemories {
    async fn create(&self, fields: MemoryFields) -> Result<String, CapabilityError> {
        let mut table = lock(&self.table);
        let id = table.allocate_id();
        table.items.push(MemoryEntry {
            id: id.clone(),
            content: fields.content,
            created_at: Some(Utc::now()),
        });
        Ok(id)
    }

    async fn update(&self, id: &str, patch: MemoryPatch) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let entry = table
            .items
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;
        entry.content = patch.content;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CapabilityError> {
        let mut table = lock(&self.table);
        let before = table.items.len();
        table.items.retain(|m| m.id != id);
        if table.items.len() == before {
            return Err(CapabilityError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryEntry>, CapabilityError> {
        let entries = lock(&self.table).items.clone();
        Ok(apply_limit(entries, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str, start: &str) -> EventFields {
        EventFields {
            title: title.to_string(),
            start: start.to_string(),
            end: None,
            location: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_calendar_crud() {
        let calendar = InMemoryCalendar::new();
        let late = calendar.create(event("Lunch", "2025-03-14T12:30")).await.unwrap();
        let early = calendar.create(event("Standup", "2025-03-14T09:00")).await.unwrap();
        assert_ne!(late, early);

        let listed = calendar.list(&ListFilter::default()).await.unwrap();
        assert_eq!(listed[0].title, "Standup");
        assert_eq!(listed[0].end.as_deref(), Some("2025-03-14T10:00"));

        calendar
            .update(
                &late,
                EventPatch {
                    location: Some("Cafe".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        calendar.delete(&early).await.unwrap();

        let listed = calendar.list(&ListFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].location.as_deref(), Some("Cafe"));
    }

    #[tokio::test]
    async fn test_unparseable_start_leaves_end_open() {
        let calendar = InMemoryCalendar::new();
        calendar.create(event("New Event", "today 09:00")).await.unwrap();
        let listed = calendar.list(&ListFilter::default()).await.unwrap();
        assert_eq!(listed[0].end, None);
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let reminders = InMemoryReminders::new();
        assert_eq!(
            reminders.delete("r9").await,
            Err(CapabilityError::NotFound("r9".to_string()))
        );
        assert!(matches!(
            reminders.update("r9", ReminderPatch::default()).await,
            Err(CapabilityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_reminders_hidden_by_default() {
        let reminders = InMemoryReminders::new();
        let id = reminders
            .create(ReminderFields {
                title: "Water plants".to_string(),
                due: None,
                notes: None,
            })
            .await
            .unwrap();
        reminders
            .update(
                &id,
                ReminderPatch {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(reminders.list(&ListFilter::default()).await.unwrap().is_empty());
        let all = ListFilter {
            include_completed: true,
            ..Default::default()
        };
        assert_eq!(reminders.list(&all).await.unwrap().len(), 1);
    }
}
