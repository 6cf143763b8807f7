//! CLI argument parsing for aide.

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "aide")]
#[command(about = "A conversational assistant for your calendar, reminders and memories")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Disable automatic check-ins after the idle period
    #[arg(long = "no-auto")]
    pub no_auto: bool,

    /// Message to send (if provided, runs in single-shot mode instead of interactive)
    pub prompt: Option<String>,
}
