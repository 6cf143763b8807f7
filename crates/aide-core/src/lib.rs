pub mod accumulator;
pub mod capabilities;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod legacy;
pub mod orchestrator;
pub mod prompts;
pub mod scheduler;
pub mod stats;
pub mod status;
pub mod tool_args;
pub mod tool_definitions;
pub mod turn;
pub mod ui_writer;

pub use capabilities::{
    Capabilities, CalendarEvent, FileMemoryStore, InMemoryCalendar, InMemoryMemories,
    InMemoryReminders, ListFilter, LocationSource, MemoryEntry, Reminder, StaticLocation,
};
pub use dispatcher::{DispatchOrigin, DispatchPolicy, ToolDispatcher};
pub use error::{CapabilityError, EngineError, ValidationError};
pub use orchestrator::{
    Conversation, ConversationHandle, ConversationSettings, TurnOutcome, TurnPhase,
};
pub use scheduler::{AutoTrigger, AutoTurnScheduler};
pub use stats::{PerformanceStats, PerformanceTracker};
pub use status::{
    OperationKind, OperationState, OperationStatusEntry, StatusBoard, StatusTransition,
};
pub use turn::{ConversationTurn, ToolInvocation, ToolResult, TurnId};
pub use ui_writer::{NullUiWriter, UiWriter};
