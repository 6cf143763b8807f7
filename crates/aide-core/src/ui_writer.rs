use crate::turn::ToolResult;

/// Interface for output operations
/// This trait abstracts where streamed text and tool activity go
/// (console, tests, a GUI) without coupling the engine to a terminal.
pub trait UiWriter: Send + Sync {
    /// Print a simple message
    fn print(&self, message: &str);

    /// Print a message with a newline
    fn println(&self, message: &str);

    /// Print the assistant prompt indicator
    fn print_agent_prompt(&self);

    /// Print agent response inline (for streaming)
    fn print_agent_response(&self, content: &str);

    /// Print a tool execution header
    fn print_tool_header(&self, tool_name: &str, tool_args: Option<&serde_json::Value>);

    /// Print the result of a tool execution
    fn print_tool_result(&self, tool_name: &str, result: &ToolResult);

    /// Print an error that replaced the assistant's reply
    fn print_error(&self, message: &str);

    /// Notify that a stream line was received
    fn notify_sse_received(&self);

    /// Called once the assistant turn is finalised.
    /// Default implementation does nothing.
    fn finish_response(&self) {}

    /// Flush any buffered output
    fn flush(&self);
}

/// A no-op implementation for when UI output is not needed
pub struct NullUiWriter;

impl UiWriter for NullUiWriter {
    fn print(&self, _message: &str) {}
    fn println(&self, _message: &str) {}
    fn print_agent_prompt(&self) {}
    fn print_agent_response(&self, _content: &str) {}
    fn print_tool_header(&self, _tool_name: &str, _tool_args: Option<&serde_json::Value>) {}
    fn print_tool_result(&self, _tool_name: &str, _result: &ToolResult) {}
    fn print_error(&self, _message: &str) {}
    fn notify_sse_received(&self) {}
    fn flush(&self) {}
}
