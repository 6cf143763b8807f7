//! Interactive mode for aide.

use std::future::Future;
use std::io::Write;

use anyhow::Result;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aide_core::ui_writer::UiWriter;
use aide_core::{AutoTrigger, AutoTurnScheduler, ConversationHandle, EngineError, TurnOutcome};

use crate::commands::{handle_command, CommandOutcome};
use crate::status_feed::spawn_failure_watcher;

fn print_prompt() {
    print!("{}you>{} ", SetForegroundColor(Color::Blue), ResetColor);
    let _ = std::io::stdout().flush();
}

/// Run one turn, cancelling it on Ctrl-C. Any dispatch already under way
/// still completes before the turn returns.
pub async fn drive_turn<F>(turn: F, cancel: CancellationToken) -> Result<TurnOutcome, EngineError>
where
    F: Future<Output = Result<TurnOutcome, EngineError>>,
{
    tokio::pin!(turn);
    let mut listening = true;
    loop {
        tokio::select! {
            result = &mut turn => return result,
            signal = tokio::signal::ctrl_c(), if listening => match signal {
                Ok(()) => {
                    debug!("Ctrl-C received; cancelling turn");
                    cancel.cancel();
                }
                Err(e) => {
                    warn!("Could not listen for Ctrl-C: {}", e);
                    listening = false;
                }
            },
        }
    }
}

/// Print what the output sink did not already show and persist stats.
pub async fn report_turn<W: UiWriter>(
    handle: &ConversationHandle<W>,
    result: Result<TurnOutcome, EngineError>,
) {
    match result {
        Ok(outcome) => {
            if outcome.interrupted == Some(EngineError::Cancelled) {
                println!("{}(cancelled){}", SetForegroundColor(Color::DarkGrey), ResetColor);
            }
            debug!(
                "Turn finished: {} rounds, {} tool results, {} fallbacks",
                outcome.rounds,
                outcome.tool_results.len(),
                outcome.fallbacks
            );
        }
        Err(EngineError::Busy) => println!("⏳ Still working on the previous message."),
        Err(e) => debug!("Turn not run: {}", e),
    }

    let conversation = handle.lock().await;
    if let Err(e) = conversation.tracker().persist() {
        warn!("Failed to save statistics: {:#}", e);
    }
}

async fn run_automatic<W: UiWriter>(handle: &ConversationHandle<W>, trigger: AutoTrigger) {
    info!("Starting automatic turn ({:?})", trigger);
    let cancel = CancellationToken::new();
    let result = drive_turn(handle.try_run_automatic_turn(trigger, cancel.clone()), cancel).await;
    report_turn(handle, result).await;
}

/// Read lines from stdin until `/quit` or end of input, starting an
/// automatic check-in whenever the scheduler says the user has been idle.
pub async fn run_interactive<W: UiWriter + 'static>(
    handle: ConversationHandle<W>,
    mut scheduler: AutoTurnScheduler,
) -> Result<()> {
    let watcher = {
        let conversation = handle.lock().await;
        spawn_failure_watcher(conversation.status())
    };

    println!();
    println!("aide - your calendar, reminders and memories");
    println!("      >> what can I do for you? (/help for commands)");
    println!();
    if scheduler.is_enabled() {
        debug!("Automatic check-ins after {:?} idle", scheduler.quiescence());
    } else {
        info!("Automatic check-ins are off");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt();
        let wait = scheduler.time_until_due(Instant::now());
        let idle = async move {
            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!();
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                scheduler.note_activity();

                match handle_command(input, &handle).await {
                    CommandOutcome::Quit => break,
                    CommandOutcome::Handled => continue,
                    CommandOutcome::Cleared => {
                        run_automatic(&handle, AutoTrigger::HistoryReset).await
                    }
                    CommandOutcome::NotACommand => {
                        let cancel = CancellationToken::new();
                        let turn = handle.try_send(input, cancel.clone());
                        let result = drive_turn(turn, cancel).await;
                        report_turn(&handle, result).await;
                    }
                }
                scheduler.note_activity();
            }
            _ = idle => {
                println!();
                scheduler.mark_fired();
                run_automatic(&handle, AutoTrigger::Idle).await;
            }
        }
    }

    watcher.abort();
    println!("👋 Goodbye!");
    Ok(())
}
