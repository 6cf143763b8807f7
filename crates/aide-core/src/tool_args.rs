//! Typed tool arguments.
//!
//! Raw JSON from the model is validated once, here, into one variant per
//! tool. Nothing past the dispatcher boundary looks at untyped maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::tool_definitions::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFields {
    pub title: String,
    pub start: String,
    pub end: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFields {
    pub title: String,
    pub due: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub due: Option<String>,
    pub notes: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFields {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPatch {
    pub content: String,
}

/// An update aimed at one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<P> {
    pub id: String,
    pub patch: P,
}

/// Items of a batch are validated independently.
pub type BatchItems<T> = Vec<Result<T, ValidationError>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    AddEvent(EventFields),
    AddEvents(BatchItems<EventFields>),
    ModifyEvent(Change<EventPatch>),
    ModifyEvents(BatchItems<Change<EventPatch>>),
    DeleteEvent(String),
    DeleteEvents(BatchItems<String>),
    AddReminder(ReminderFields),
    AddReminders(BatchItems<ReminderFields>),
    ModifyReminder(Change<ReminderPatch>),
    ModifyReminders(BatchItems<Change<ReminderPatch>>),
    DeleteReminder(String),
    DeleteReminders(BatchItems<String>),
    AddMemory(MemoryFields),
    AddMemories(BatchItems<MemoryFields>),
    ModifyMemory(Change<MemoryPatch>),
    ModifyMemories(BatchItems<Change<MemoryPatch>>),
    DeleteMemory(String),
    DeleteMemories(BatchItems<String>),
}

impl ToolArgs {
    /// Validate raw arguments for the named tool.
    ///
    /// A batch only fails as a whole when its container field is missing or
    /// empty; bad items are kept as per-item errors.
    pub fn parse(tool: &str, args: &Value) -> Result<Self, ValidationError> {
        let map = args.as_object().ok_or(ValidationError::NotAnObject)?;

        let parsed = match tool {
            ADD_CALENDAR_EVENT => Self::AddEvent(event_fields(map)?),
            ADD_CALENDAR_EVENTS => Self::AddEvents(items(map, event_fields)?),
            MODIFY_CALENDAR_EVENT => Self::ModifyEvent(change(map, event_patch)?),
            MODIFY_CALENDAR_EVENTS => Self::ModifyEvents(items(map, |m| change(m, event_patch))?),
            DELETE_CALENDAR_EVENT => Self::DeleteEvent(required_str(map, "id")?),
            DELETE_CALENDAR_EVENTS => Self::DeleteEvents(ids(map)?),
            ADD_REMINDER => Self::AddReminder(reminder_fields(map)?),
            ADD_REMINDERS => Self::AddReminders(items(map, reminder_fields)?),
            MODIFY_REMINDER => Self::ModifyReminder(change(map, reminder_patch)?),
            MODIFY_REMINDERS => Self::ModifyReminders(items(map, |m| change(m, reminder_patch))?),
            DELETE_REMINDER => Self::DeleteReminder(required_str(map, "id")?),
            DELETE_REMINDERS => Self::DeleteReminders(ids(map)?),
            ADD_MEMORY => Self::AddMemory(memory_fields(map)?),
            ADD_MEMORIES => Self::AddMemories(items(map, memory_fields)?),
            MODIFY_MEMORY => Self::ModifyMemory(change(map, memory_patch)?),
            MODIFY_MEMORIES => Self::ModifyMemories(items(map, |m| change(m, memory_patch))?),
            DELETE_MEMORY => Self::DeleteMemory(required_str(map, "id")?),
            DELETE_MEMORIES => Self::DeleteMemories(ids(map)?),
            other => return Err(ValidationError::UnknownTool(other.to_string())),
        };
        Ok(parsed)
    }
}

fn required_str(map: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(ValidationError::missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::invalid(field, "must not be empty"))
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(ValidationError::wrong_type(field, "a string")),
    }
}

fn optional_str(map: &Map<String, Value>, field: &str) -> Result<Option<String>, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ValidationError::wrong_type(field, "a string")),
    }
}

fn optional_bool(map: &Map<String, Value>, field: &str) -> Result<Option<bool>, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ValidationError::wrong_type(field, "a boolean")),
    }
}

fn event_fields(map: &Map<String, Value>) -> Result<EventFields, ValidationError> {
    Ok(EventFields {
        title: required_str(map, "title")?,
        start: required_str(map, "start")?,
        end: optional_str(map, "end")?,
        location: optional_str(map, "location")?,
        notes: optional_str(map, "notes")?,
    })
}

fn event_patch(map: &Map<String, Value>) -> Result<EventPatch, ValidationError> {
    let patch = EventPatch {
        title: optional_str(map, "title")?,
        start: optional_str(map, "start")?,
        end: optional_str(map, "end")?,
        location: optional_str(map, "location")?,
        notes: optional_str(map, "notes")?,
    };
    if patch == EventPatch::default() {
        return Err(ValidationError::invalid("fields", "no fields to change"));
    }
    Ok(patch)
}

fn reminder_fields(map: &Map<String, Value>) -> Result<ReminderFields, ValidationError> {
    Ok(ReminderFields {
        title: required_str(map, "title")?,
        due: optional_str(map, "due")?,
        notes: optional_str(map, "notes")?,
    })
}

fn reminder_patch(map: &Map<String, Value>) -> Result<ReminderPatch, ValidationError> {
    let patch = ReminderPatch {
        title: optional_str(map, "title")?,
        due: optional_str(map, "due")?,
        notes: optional_str(map, "notes")?,
        completed: optional_bool(map, "completed")?,
    };
    if patch == ReminderPatch::default() {
        return Err(ValidationError::invalid("fields", "no fields to change"));
    }
    Ok(patch)
}

fn memory_fields(map: &Map<String, Value>) -> Result<MemoryFields, ValidationError> {
    Ok(MemoryFields {
        content: required_str(map, "content")?,
    })
}

fn memory_patch(map: &Map<String, Value>) -> Result<MemoryPatch, ValidationError> {
    Ok(MemoryPatch {
        content: required_str(map, "content")?,
    })
}

fn change<P>(
    map: &Map<String, Value>,
    patch: impl Fn(&Map<String, Value>) -> Result<P, ValidationError>,
) -> Result<Change<P>, ValidationError> {
    Ok(Change {
        id: required_str(map, "id")?,
        patch: patch(map)?,
    })
}

fn non_empty_array<'a>(
    map: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a Vec<Value>, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(ValidationError::missing(field)),
        Some(Value::Array(values)) if values.is_empty() => {
            Err(ValidationError::invalid(field, "must not be empty"))
        }
        Some(Value::Array(values)) => Ok(values),
        Some(_) => Err(ValidationError::wrong_type(field, "an array")),
    }
}

fn items<T>(
    map: &Map<String, Value>,
    parse: impl Fn(&Map<String, Value>) -> Result<T, ValidationError>,
) -> Result<BatchItems<T>, ValidationError> {
    let values = non_empty_array(map, "items")?;
    Ok(values
        .iter()
        .map(|value| value.as_object().ok_or(ValidationError::NotAnObject).and_then(&parse))
        .collect())
}

fn ids(map: &Map<String, Value>) -> Result<BatchItems<String>, ValidationError> {
    let values = non_empty_array(map, "ids")?;
    Ok(values
        .iter()
        .map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::String(_) => Err(ValidationError::invalid("id", "must not be empty")),
            _ => Err(ValidationError::wrong_type("id", "a string")),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_add_reminder() {
        let args =
            ToolArgs::parse(ADD_REMINDER, &json!({"title": " Call mom ", "due": ""})).unwrap();
        assert_eq!(
            args,
            ToolArgs::AddReminder(ReminderFields {
                title: "Call mom".to_string(),
                due: None,
                notes: None,
            })
        );
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        assert_eq!(
            ToolArgs::parse(ADD_CALENDAR_EVENT, &json!({"title": "Dentist"})),
            Err(ValidationError::missing("start"))
        );
        assert_eq!(
            ToolArgs::parse(ADD_REMINDER, &json!({"title": 42})),
            Err(ValidationError::wrong_type("title", "a string"))
        );
        assert_eq!(
            ToolArgs::parse(DELETE_MEMORY, &json!({})),
            Err(ValidationError::missing("id"))
        );
        assert_eq!(
            ToolArgs::parse(ADD_MEMORY, &json!("likes tea")),
            Err(ValidationError::NotAnObject)
        );
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(
            ToolArgs::parse("send_email", &json!({})),
            Err(ValidationError::UnknownTool("send_email".to_string()))
        );
    }

    #[test]
    fn test_empty_patch_is_rejected() {
        let err = ToolArgs::parse(MODIFY_REMINDER, &json!({"id": "r1"})).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));

        let ok = ToolArgs::parse(MODIFY_REMINDER, &json!({"id": "r1", "completed": true})).unwrap();
        match ok {
            ToolArgs::ModifyReminder(change) => {
                assert_eq!(change.id, "r1");
                assert_eq!(change.patch.completed, Some(true));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_batch_keeps_per_item_errors() {
        let args = ToolArgs::parse(
            ADD_REMINDERS,
            &json!({"items": [{"title": "A"}, {"due": "tomorrow"}, "oops", {"title": "D"}]}),
        )
        .unwrap();
        let ToolArgs::AddReminders(items) = args else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 4);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err(ValidationError::missing("title")));
        assert_eq!(items[2], Err(ValidationError::NotAnObject));
        assert!(items[3].is_ok());
    }

    #[test]
    fn test_batch_container_must_be_present_and_non_empty() {
        assert_eq!(
            ToolArgs::parse(ADD_MEMORIES, &json!({})),
            Err(ValidationError::missing("items"))
        );
        assert!(matches!(
            ToolArgs::parse(DELETE_REMINDERS, &json!({"ids": []})),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert_eq!(
            ToolArgs::parse(DELETE_REMINDERS, &json!({"ids": "r1"})),
            Err(ValidationError::wrong_type("ids", "an array"))
        );
    }

    #[test]
    fn test_batch_ids() {
        let args =
            ToolArgs::parse(DELETE_CALENDAR_EVENTS, &json!({"ids": ["e1", 7, " "]})).unwrap();
        let ToolArgs::DeleteEvents(ids) = args else {
            panic!("expected batch delete");
        };
        assert_eq!(ids[0], Ok("e1".to_string()));
        assert!(ids[1].is_err());
        assert!(ids[2].is_err());
    }

    #[test]
    fn test_every_catalog_tool_parses_its_fallback_or_rejects_it() {
        use crate::accumulator::fallback_payload;
        let registry = ToolRegistry::new();
        for name in registry.names() {
            let spec = registry.lookup(name).unwrap();
            let result = ToolArgs::parse(name, &fallback_payload(name));
            match spec.kind.action {
                crate::status::Action::Add => assert!(result.is_ok(), "{}", name),
                _ => assert!(result.is_err(), "{}", name),
            }
        }
    }
}
