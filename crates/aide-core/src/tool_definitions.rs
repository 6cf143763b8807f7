//! Tool definitions advertised to the model on every request.
//!
//! Each tool maps to one operation kind and is either single-item or
//! batch-shaped. Batch adds and modifies take `{"items": [...]}`, batch
//! deletes take `{"ids": [...]}`.

use aide_providers::Tool;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::status::{Action, OperationKind, Target};

pub const ADD_CALENDAR_EVENT: &str = "add_calendar_event";
pub const ADD_CALENDAR_EVENTS: &str = "add_calendar_events";
pub const MODIFY_CALENDAR_EVENT: &str = "modify_calendar_event";
pub const MODIFY_CALENDAR_EVENTS: &str = "modify_calendar_events";
pub const DELETE_CALENDAR_EVENT: &str = "delete_calendar_event";
pub const DELETE_CALENDAR_EVENTS: &str = "delete_calendar_events";
pub const ADD_REMINDER: &str = "add_reminder";
pub const ADD_REMINDERS: &str = "add_reminders";
pub const MODIFY_REMINDER: &str = "modify_reminder";
pub const MODIFY_REMINDERS: &str = "modify_reminders";
pub const DELETE_REMINDER: &str = "delete_reminder";
pub const DELETE_REMINDERS: &str = "delete_reminders";
pub const ADD_MEMORY: &str = "add_memory";
pub const ADD_MEMORIES: &str = "add_memories";
pub const MODIFY_MEMORY: &str = "modify_memory";
pub const MODIFY_MEMORIES: &str = "modify_memories";
pub const DELETE_MEMORY: &str = "delete_memory";
pub const DELETE_MEMORIES: &str = "delete_memories";

/// Catalog metadata for one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub kind: OperationKind,
    pub batch: bool,
    pub definition: Tool,
}

/// Static catalog, looked up by tool name.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let specs = create_tool_specs();
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.definition.name.clone(), i))
            .collect();
        Self { specs, index }
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// Tool definitions in catalog order, for the request body.
    pub fn definitions(&self) -> Vec<Tool> {
        self.specs.iter().map(|spec| spec.definition.clone()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.definition.name.as_str())
    }
}

fn event_properties() -> Value {
    json!({
        "title": { "type": "string", "description": "Event title" },
        "start": { "type": "string", "description": "Start time, ISO 8601 local time (e.g. 2025-03-14T09:00)" },
        "end": { "type": "string", "description": "End time, ISO 8601 local time. Defaults to one hour after start." },
        "location": { "type": "string", "description": "Where the event takes place" },
        "notes": { "type": "string", "description": "Free-form notes" }
    })
}

fn reminder_properties() -> Value {
    json!({
        "title": { "type": "string", "description": "What to be reminded about" },
        "due": { "type": "string", "description": "Optional due time, ISO 8601 local time" },
        "notes": { "type": "string", "description": "Free-form notes" }
    })
}

fn reminder_patch_properties() -> Value {
    let mut props = reminder_properties();
    props["completed"] = json!({ "type": "boolean", "description": "Mark the reminder done or not done" });
    props
}

fn memory_properties() -> Value {
    json!({
        "content": { "type": "string", "description": "The fact to remember about the user, in one sentence" }
    })
}

fn with_id(properties: Value, id_description: &str) -> Value {
    let mut props = properties;
    props["id"] = json!({ "type": "string", "description": id_description });
    props
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn items_schema(item: Value, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "items": { "type": "array", "description": description, "items": item }
        },
        "required": ["items"],
    })
}

fn ids_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "ids": { "type": "array", "description": description, "items": { "type": "string" } }
        },
        "required": ["ids"],
    })
}

fn spec(
    name: &str,
    description: &str,
    kind: OperationKind,
    batch: bool,
    input_schema: Value,
) -> ToolSpec {
    ToolSpec {
        kind,
        batch,
        definition: Tool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        },
    }
}

fn create_tool_specs() -> Vec<ToolSpec> {
    use Action::*;
    use Target::*;

    let event = object_schema(event_properties(), &["title", "start"]);
    let event_patch =
        object_schema(with_id(event_properties(), "Id of the event to change"), &["id"]);
    let reminder = object_schema(reminder_properties(), &["title"]);
    let reminder_patch = object_schema(
        with_id(reminder_patch_properties(), "Id of the reminder to change"),
        &["id"],
    );
    let memory = object_schema(memory_properties(), &["content"]);
    let memory_patch = object_schema(
        with_id(memory_properties(), "Id of the memory to rewrite"),
        &["id", "content"],
    );

    vec![
        spec(
            ADD_CALENDAR_EVENT,
            "Create a calendar event.",
            OperationKind::new(Add, CalendarEvent),
            false,
            event.clone(),
        ),
        spec(
            ADD_CALENDAR_EVENTS,
            "Create several calendar events at once. Each item is processed independently.",
            OperationKind::new(Add, CalendarEvent),
            true,
            items_schema(event, "Events to create"),
        ),
        spec(
            MODIFY_CALENDAR_EVENT,
            "Change fields of an existing calendar event. Only the given fields are updated.",
            OperationKind::new(Modify, CalendarEvent),
            false,
            event_patch.clone(),
        ),
        spec(
            MODIFY_CALENDAR_EVENTS,
            "Change several calendar events at once.",
            OperationKind::new(Modify, CalendarEvent),
            true,
            items_schema(event_patch, "Event changes, each with the event id"),
        ),
        spec(
            DELETE_CALENDAR_EVENT,
            "Delete a calendar event by id.",
            OperationKind::new(Delete, CalendarEvent),
            false,
            object_schema(
                json!({ "id": { "type": "string", "description": "Id of the event to delete" } }),
                &["id"],
            ),
        ),
        spec(
            DELETE_CALENDAR_EVENTS,
            "Delete several calendar events by id.",
            OperationKind::new(Delete, CalendarEvent),
            true,
            ids_schema("Ids of the events to delete"),
        ),
        spec(
            ADD_REMINDER,
            "Create a reminder.",
            OperationKind::new(Add, Reminder),
            false,
            reminder.clone(),
        ),
        spec(
            ADD_REMINDERS,
            "Create several reminders at once. Each item is processed independently.",
            OperationKind::new(Add, Reminder),
            true,
            items_schema(reminder, "Reminders to create"),
        ),
        spec(
            MODIFY_REMINDER,
            "Change fields of an existing reminder, or mark it completed.",
            OperationKind::new(Modify, Reminder),
            false,
            reminder_patch.clone(),
        ),
        spec(
            MODIFY_REMINDERS,
            "Change several reminders at once.",
            OperationKind::new(Modify, Reminder),
            true,
            items_schema(reminder_patch, "Reminder changes, each with the reminder id"),
        ),
        spec(
            DELETE_REMINDER,
            "Delete a reminder by id.",
            OperationKind::new(Delete, Reminder),
            false,
            object_schema(
                json!({ "id": { "type": "string", "description": "Id of the reminder to delete" } }),
                &["id"],
            ),
        ),
        spec(
            DELETE_REMINDERS,
            "Delete several reminders by id.",
            OperationKind::new(Delete, Reminder),
            true,
            ids_schema("Ids of the reminders to delete"),
        ),
        spec(
            ADD_MEMORY,
            "Remember a lasting fact about the user (preferences, people, routines).",
            OperationKind::new(Add, Memory),
            false,
            memory.clone(),
        ),
        spec(
            ADD_MEMORIES,
            "Remember several facts at once.",
            OperationKind::new(Add, Memory),
            true,
            items_schema(memory, "Facts to remember"),
        ),
        spec(
            MODIFY_MEMORY,
            "Rewrite a remembered fact.",
            OperationKind::new(Modify, Memory),
            false,
            memory_patch.clone(),
        ),
        spec(
            MODIFY_MEMORIES,
            "Rewrite several remembered facts.",
            OperationKind::new(Modify, Memory),
            true,
            items_schema(memory_patch, "Memory rewrites, each with the memory id"),
        ),
        spec(
            DELETE_MEMORY,
            "Forget a remembered fact by id.",
            OperationKind::new(Delete, Memory),
            false,
            object_schema(
                json!({ "id": { "type": "string", "description": "Id of the memory to forget" } }),
                &["id"],
            ),
        ),
        spec(
            DELETE_MEMORIES,
            "Forget several remembered facts by id.",
            OperationKind::new(Delete, Memory),
            true,
            ids_schema("Ids of the memories to forget"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_operation_in_both_shapes() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.definitions().len(), 18);

        for action in [Action::Add, Action::Modify, Action::Delete] {
            for target in [Target::CalendarEvent, Target::Reminder, Target::Memory] {
                let kind = OperationKind::new(action, target);
                let shapes: Vec<bool> = registry
                    .names()
                    .filter_map(|name| registry.lookup(name))
                    .filter(|spec| spec.kind == kind)
                    .map(|spec| spec.batch)
                    .collect();
                assert_eq!(shapes.len(), 2, "{} should have two tools", kind);
                assert!(shapes.contains(&true) && shapes.contains(&false));
            }
        }
    }

    #[test]
    fn test_schemas_are_objects_with_required_fields() {
        for tool in ToolRegistry::new().definitions() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(
                tool.input_schema["required"].as_array().is_some(),
                "{} must declare required fields",
                tool.name
            );
            assert!(!tool.description.is_empty());
        }
    }

    #[test]
    fn test_lookup() {
        let registry = ToolRegistry::new();
        let spec = registry.lookup(ADD_REMINDER).unwrap();
        assert!(!spec.batch);
        assert_eq!(spec.kind, OperationKind::new(Action::Add, Target::Reminder));
        assert!(registry.lookup("send_email").is_none());
    }
}
