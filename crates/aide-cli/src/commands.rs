//! Interactive command handlers for aide.
//!
//! Handles `/` commands in interactive mode.

use aide_core::ui_writer::UiWriter;
use aide_core::ConversationHandle;

use crate::status_feed::print_board;

/// What the input loop should do after a line was handled as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Not a command; send it as a message
    NotACommand,
    Handled,
    /// History was cleared; the host may greet
    Cleared,
    Quit,
}

/// Parse the command word, ignoring surrounding whitespace and case.
pub fn classify(input: &str) -> Option<&'static str> {
    let word = input.trim();
    if !word.starts_with('/') && !matches!(word, "exit" | "quit") {
        return None;
    }
    match word.to_lowercase().as_str() {
        "/help" => Some("/help"),
        "/clear" => Some("/clear"),
        "/status" => Some("/status"),
        "/stats" => Some("/stats"),
        "/quit" | "/exit" | "exit" | "quit" => Some("/quit"),
        _ => Some("unknown"),
    }
}

/// Handle a control command.
pub async fn handle_command<W: UiWriter>(
    input: &str,
    handle: &ConversationHandle<W>,
) -> CommandOutcome {
    let Some(command) = classify(input) else {
        return CommandOutcome::NotACommand;
    };

    match command {
        "/help" => {
            println!();
            println!("📖 Control Commands:");
            println!("  /clear     - Clear the conversation and start fresh");
            println!("  /status    - Show the outcome of every operation so far");
            println!("  /stats     - Show performance statistics");
            println!("  /help      - Show this help message");
            println!("  /quit      - Exit the interactive session");
            println!();
            CommandOutcome::Handled
        }
        "/clear" => {
            handle.reset_history().await;
            println!("🧹 Conversation cleared.");
            CommandOutcome::Cleared
        }
        "/status" => {
            let conversation = handle.lock().await;
            print_board(conversation.status());
            CommandOutcome::Handled
        }
        "/stats" => {
            let conversation = handle.lock().await;
            println!("{}", conversation.tracker().format());
            CommandOutcome::Handled
        }
        "/quit" => CommandOutcome::Quit,
        _ => {
            println!("❓ Unknown command: {} (try /help)", input.trim());
            CommandOutcome::Handled
        }
    }
}
