use const_format::concatcp;

use crate::legacy::LEGACY_COMMAND_HELP;

const ASSISTANT_IDENTITY: &str = "You are Aide, a warm and concise personal assistant. You help the user keep track of their day: calendar events, reminders, and the things they want you to remember about them.";

const TOOL_USE_GUIDELINES: &str = "
# Tools

You can change the user's calendar, reminders and long-term memory with tools. When the user asks for any of these, call the tool instead of describing what you would do.

- Prefer the batch tools (`add_reminders`, `delete_calendar_events`, ...) when acting on more than one item.
- Items are identified by the ids shown in the context below (for example `[r3]`). Never invent ids.
- Times are local ISO 8601 timestamps such as `2025-03-14T09:00`. Resolve relative expressions (\"tomorrow at nine\") against the current time in the context.
- Save a memory only for lasting facts: preferences, people, routines. Do not save one-off requests.
- After a tool result arrives, confirm briefly what changed. If a tool reports an error, explain it plainly or fix the arguments and try again.

# Style

Answer in one to three short sentences unless the user asks for detail. Do not repeat the context back to the user.
";

/// Instruction prompt for the structured tool-call protocol.
pub const SYSTEM_PROMPT: &str = concatcp!(ASSISTANT_IDENTITY, "\n", TOOL_USE_GUIDELINES);

/// Instruction prompt that also teaches the bracket-tag commands.
pub const SYSTEM_PROMPT_WITH_LEGACY_COMMANDS: &str = concatcp!(
    ASSISTANT_IDENTITY,
    "\n",
    TOOL_USE_GUIDELINES,
    "\n",
    LEGACY_COMMAND_HELP
);

/// Seed for the automatic turn run after the user has been idle.
pub const IDLE_CHECK_IN_SEED: &str = "(automatic check-in: the user has been idle for a while) Look at the context. If an event starts soon or a reminder is due, mention it in one sentence. Otherwise reply with a short, friendly check-in. Do not call tools unless something clearly needs fixing.";

/// Seed for the automatic turn run right after the history was cleared.
pub const HISTORY_RESET_SEED: &str = "(automatic greeting: the conversation was just cleared) Greet the user briefly and, if anything is scheduled today, summarise it in one sentence.";

/// Base instructions, honouring a configured override.
pub fn system_prompt(override_prompt: Option<&str>, legacy_commands: bool) -> String {
    match override_prompt {
        Some(custom) if !custom.trim().is_empty() => {
            if legacy_commands {
                format!("{}\n\n{}", custom.trim(), LEGACY_COMMAND_HELP)
            } else {
                custom.trim().to_string()
            }
        }
        _ if legacy_commands => SYSTEM_PROMPT_WITH_LEGACY_COMMANDS.to_string(),
        _ => SYSTEM_PROMPT.to_string(),
    }
}
