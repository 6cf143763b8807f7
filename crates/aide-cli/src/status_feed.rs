//! Rendering of operation status entries for the console.

use aide_core::status::{OperationState, OperationStatusEntry, StatusBoard};
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One line per entry, e.g. `✓ add reminder (1 affected)`.
pub fn format_entry(entry: &OperationStatusEntry) -> String {
    let label = entry
        .kind
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "unknown tool".to_string());
    let mark = match entry.state {
        OperationState::InProgress => "…",
        OperationState::Success => "✓",
        OperationState::Failure => "✗",
    };
    let mut line = format!("{} {}", mark, label);
    if entry.state == OperationState::Success && entry.affected != 1 {
        line.push_str(&format!(" ({} affected)", entry.affected));
    }
    if let Some(detail) = &entry.detail {
        line.push_str(&format!(": {}", detail));
    }
    line
}

fn color_for(state: OperationState) -> Color {
    match state {
        OperationState::InProgress => Color::DarkGrey,
        OperationState::Success => Color::Green,
        OperationState::Failure => Color::Red,
    }
}

/// Print every entry on the board, oldest first.
pub fn print_board(board: &StatusBoard) {
    let entries = board.all_entries();
    if entries.is_empty() {
        println!("No operations yet.");
        return;
    }
    for entry in &entries {
        println!(
            "{}{}{}",
            SetForegroundColor(color_for(entry.state)),
            format_entry(entry),
            ResetColor
        );
    }
}

/// Follow the board and report operations whose outcome the user should see
/// even when the reply does not mention them.
pub fn spawn_failure_watcher(board: &StatusBoard) -> JoinHandle<()> {
    let mut receiver = board.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(transition) => {
                    let entry = &transition.entry;
                    debug!("Status transition: {}", format_entry(entry));
                    if entry.state == OperationState::Failure {
                        println!(
                            "\r{}{}{}",
                            SetForegroundColor(Color::Red),
                            format_entry(entry),
                            ResetColor
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Status feed lagged; {} transitions skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aide_core::status::{Action, OperationKind, Target};
    use uuid::Uuid;

    #[test]
    fn test_format_entry() {
        let board = StatusBoard::new();
        let turn = Uuid::new_v4();
        let kind = OperationKind::new(Action::Delete, Target::Reminder);

        let id = board.begin(turn, "toolu_1", Some(kind));
        assert_eq!(format_entry(&board.entries_for(turn)[0]), "… delete reminder");

        board.conclude(id, OperationState::Failure, Some("no item with id 'r9'".to_string()), 0);
        assert_eq!(
            format_entry(&board.entries_for(turn)[0]),
            "✗ delete reminder: no item with id 'r9'"
        );

        let id = board.begin(turn, "toolu_2", None);
        board.conclude(id, OperationState::Success, None, 3);
        assert_eq!(
            format_entry(&board.entries_for(turn)[1]),
            "✓ unknown tool (3 affected)"
        );
    }
}
