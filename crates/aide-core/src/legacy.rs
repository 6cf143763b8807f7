//! Bracket-tag command grammar (v1), from before structured tool calls.
//!
//! Kept separate from the tool-call path: tags are scanned from finished
//! assistant text, removed from what the user sees, and dispatched as
//! internal invocations whose results never go back to the model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::tool_definitions::*;

/// Prompt text describing the tags to the model.
pub const LEGACY_COMMAND_HELP: &str = "# Quick commands

You may also embed these commands anywhere in a reply; they are executed after the reply and hidden from the user:
- [ADD_REMINDER: title | due]
- [ADD_EVENT: title | start | end]
- [DELETE_REMINDER: id]
- [DELETE_EVENT: id]
- [REMEMBER: fact]
- [FORGET: id]
";

static BRACKET_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(ADD_REMINDER|ADD_EVENT|DELETE_REMINDER|DELETE_EVENT|REMEMBER|FORGET):([^\]]*)\]")
        .expect("bracket tag pattern is valid")
});

/// A command recognised in assistant text, mapped onto a catalog tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub tool: &'static str,
    pub args: Value,
    /// The matched text, as it appeared
    pub source: String,
}

/// An input grammar that turns free text into tool invocations.
pub trait CommandGrammar: Send + Sync {
    /// Every command found, in order of appearance.
    fn parse(&self, text: &str) -> Vec<ParsedCommand>;

    /// The text with every recognised command removed.
    fn strip(&self, text: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BracketTagGrammar;

impl BracketTagGrammar {
    pub fn new() -> Self {
        Self
    }
}

fn parts(body: &str) -> Vec<&str> {
    body.split('|').map(str::trim).collect()
}

/// Build an argument object, leaving out absent or empty values so that
/// validation reports them as missing.
fn object(fields: &[(&str, Option<&str>)]) -> Value {
    let mut map = Map::new();
    for (key, value) in fields {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            map.insert(key.to_string(), json!(value));
        }
    }
    Value::Object(map)
}

impl CommandGrammar for BracketTagGrammar {
    fn parse(&self, text: &str) -> Vec<ParsedCommand> {
        BRACKET_TAG
            .captures_iter(text)
            .map(|caps| {
                let tag = caps.get(1).map_or("", |m| m.as_str());
                let body = caps.get(2).map_or("", |m| m.as_str());
                let p = parts(body);
                let at = |i: usize| p.get(i).copied();

                let (tool, args) = match tag {
                    "ADD_REMINDER" => (ADD_REMINDER, object(&[("title", at(0)), ("due", at(1))])),
                    "ADD_EVENT" => (
                        ADD_CALENDAR_EVENT,
                        object(&[("title", at(0)), ("start", at(1)), ("end", at(2))]),
                    ),
                    "DELETE_REMINDER" => (DELETE_REMINDER, object(&[("id", at(0))])),
                    "DELETE_EVENT" => (DELETE_CALENDAR_EVENT, object(&[("id", at(0))])),
                    // A remembered fact may itself contain '|'
                    "REMEMBER" => (ADD_MEMORY, object(&[("content", Some(body.trim()))])),
                    _ => (DELETE_MEMORY, object(&[("id", at(0))])),
                };

                ParsedCommand {
                    tool,
                    args,
                    source: caps.get(0).map_or("", |m| m.as_str()).to_string(),
                }
            })
            .collect()
    }

    fn strip(&self, text: &str) -> String {
        let stripped = BRACKET_TAG.replace_all(text, "");
        stripped
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}
