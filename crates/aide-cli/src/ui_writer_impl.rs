use aide_core::turn::ToolResult;
use aide_core::ui_writer::UiWriter;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::debug;

/// Console implementation of UiWriter that prints to stdout
pub struct ConsoleUiWriter {
    /// Whether assistant text has been printed since the last finish
    response_open: Mutex<bool>,
}

impl ConsoleUiWriter {
    pub fn new() -> Self {
        Self {
            response_open: Mutex::new(false),
        }
    }

    fn open_response(&self) {
        let mut open = self.response_open.lock().unwrap_or_else(|e| e.into_inner());
        if !*open {
            print!("{}aide>{} ", SetForegroundColor(Color::Cyan), ResetColor);
            *open = true;
        }
    }
}

impl Default for ConsoleUiWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Short one-line rendering of tool arguments for the header.
fn summarize_args(args: &serde_json::Value) -> String {
    let Some(object) = args.as_object() else {
        return String::new();
    };
    let important = ["title", "content", "id"]
        .iter()
        .find_map(|key| object.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .or_else(|| {
            object
                .get("items")
                .or_else(|| object.get("ids"))
                .and_then(|v| v.as_array())
                .map(|items| format!("{} items", items.len()))
        })
        .unwrap_or_default();

    if important.chars().count() > 60 {
        let truncated: String = important.chars().take(57).collect();
        format!("{}...", truncated)
    } else {
        important
    }
}

impl UiWriter for ConsoleUiWriter {
    fn print(&self, message: &str) {
        print!("{}", message);
    }

    fn println(&self, message: &str) {
        println!("{}", message);
    }

    fn print_agent_prompt(&self) {
        self.open_response();
        let _ = io::stdout().flush();
    }

    fn print_agent_response(&self, content: &str) {
        self.open_response();
        print!("{}", content);
        let _ = io::stdout().flush();
    }

    fn print_tool_header(&self, tool_name: &str, tool_args: Option<&serde_json::Value>) {
        let summary = tool_args.map(summarize_args).unwrap_or_default();
        println!();
        if summary.is_empty() {
            print!("{}┌─ {}{}", SetForegroundColor(Color::Green), tool_name, ResetColor);
        } else {
            print!(
                "{}┌─ {}{} | {}",
                SetForegroundColor(Color::Green),
                tool_name,
                ResetColor,
                summary
            );
        }
        let _ = io::stdout().flush();
    }

    fn print_tool_result(&self, tool_name: &str, result: &ToolResult) {
        let (color, mark) = if result.success {
            (Color::Green, "✓")
        } else {
            (Color::Red, "✗")
        };
        let first_line = result.content.lines().next().unwrap_or("");
        println!();
        println!(
            "{}└─ {} {}{}",
            SetForegroundColor(color),
            mark,
            first_line,
            ResetColor
        );
        debug!("{} result: {}", tool_name, result.content);
        // Whatever the model says next starts on a fresh prompt line
        *self.response_open.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    fn print_error(&self, message: &str) {
        println!();
        println!("{}⚠️ {}{}", SetForegroundColor(Color::Yellow), message, ResetColor);
    }

    fn notify_sse_received(&self) {
        // No-op for console - we don't track SSEs in console mode
    }

    fn finish_response(&self) {
        let mut open = self.response_open.lock().unwrap_or_else(|e| e.into_inner());
        if *open {
            println!();
            *open = false;
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_args_prefers_title() {
        assert_eq!(
            summarize_args(&json!({"title": "Call mom", "due": "tomorrow"})),
            "Call mom"
        );
        assert_eq!(summarize_args(&json!({"ids": ["r1", "r2"]})), "2 items");
        assert_eq!(summarize_args(&json!({})), "");
        assert_eq!(summarize_args(&json!("text")), "");
    }

    #[test]
    fn test_summarize_args_truncates() {
        let long = "x".repeat(100);
        let summary = summarize_args(&json!({ "content": long }));
        assert_eq!(summary.chars().count(), 60);
        assert!(summary.ends_with("..."));
    }
}
