//! End-to-end conversation tests driven by the mock provider.
//!
//! Each test scripts the protocol lines the service would stream and checks
//! what the engine did with them: turns, tool results, status entries and the
//! requests that went back out.

use std::sync::Arc;

use aide_core::capabilities::{Capabilities, InMemoryMemories, ListFilter};
use aide_core::prompts::IDLE_CHECK_IN_SEED;
use aide_core::status::OperationState;
use aide_core::ui_writer::NullUiWriter;
use aide_core::{AutoTrigger, Conversation, ConversationSettings, EngineError, PerformanceTracker};
use aide_providers::mock::{sse, MockProvider, MockScript};
use aide_providers::MessageRole;
use tokio_util::sync::CancellationToken;

struct Harness {
    provider: MockProvider,
    capabilities: Capabilities,
    tracker: Arc<PerformanceTracker>,
    conversation: Conversation<NullUiWriter>,
}

fn harness(scripts: Vec<MockScript>) -> Harness {
    harness_with(scripts, ConversationSettings::default())
}

fn harness_with(scripts: Vec<MockScript>, settings: ConversationSettings) -> Harness {
    let provider = MockProvider::new().with_scripts(scripts);
    let capabilities = Capabilities::local(Arc::new(InMemoryMemories::new()));
    let tracker = Arc::new(PerformanceTracker::in_memory());
    let conversation = Conversation::new(
        Arc::new(provider.clone()),
        capabilities.clone(),
        NullUiWriter,
        settings,
        tracker.clone(),
    );
    Harness {
        provider,
        capabilities,
        tracker,
        conversation,
    }
}

async fn reminder_titles(capabilities: &Capabilities) -> Vec<String> {
    capabilities
        .reminders()
        .unwrap()
        .list(&ListFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect()
}

#[tokio::test]
async fn test_tool_call_with_arguments_is_dispatched_and_paired() {
    let mut h = harness(vec![
        MockScript::tool_call(
            "toolu_1",
            "add_reminder",
            Some(r#"{"title":"Call mom","due":"2025-03-14T18:00"}"#),
        ),
        MockScript::text("Done, I added it."),
    ]);

    let outcome = h
        .conversation
        .send("remind me to call mom tomorrow at 6", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.fallbacks, 0);
    assert_eq!(outcome.dropped_results, 0);
    assert!(outcome.interrupted.is_none());
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(outcome.tool_results[0].success);
    assert_eq!(outcome.tool_results[0].invocation_id, "toolu_1");
    assert_eq!(outcome.text, "Done, I added it.");
    assert_eq!(reminder_titles(&h.capabilities).await, vec!["Call mom"]);

    // The second request carries the call and its result as adjacent messages
    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    let messages = &requests[1].messages;
    let n = messages.len();
    assert_eq!(messages[n - 2].role, MessageRole::Assistant);
    assert_eq!(messages[n - 2].tool_use_ids(), vec!["toolu_1"]);
    assert_eq!(messages[n - 1].role, MessageRole::User);
    assert_eq!(messages[n - 1].tool_result_ids(), vec!["toolu_1"]);

    // Exactly one terminal status entry, attributed to the issuing turn
    let entries = h.conversation.status().entries_for(outcome.assistant_turns[0]);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, OperationState::Success);
    assert_eq!(entries[0].affected, 1);
    assert!(entries[0].finished_at.is_some());
    assert!(h
        .conversation
        .status()
        .entries_for(outcome.assistant_turns[1])
        .is_empty());

    assert!(h.conversation.history().turns().iter().all(|t| t.is_complete()));
    assert!(h.conversation.history().pending().is_empty());
    assert_eq!(h.tracker.snapshot().tools["add_reminder"].succeeded, 1);
}

#[tokio::test]
async fn test_text_after_tool_use_stop_is_kept() {
    let mut h = harness(vec![
        MockScript::raw(vec![
            r#"data: {"type":"content_block_start","content_block":{"type":"tool_use","name":"add_reminder","id":"t1"}}"#.to_string(),
            r#"data: {"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"title\":\"Call mom\"}"}}"#.to_string(),
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#.to_string(),
            sse::text_delta(" trailing"),
            "data: [DONE]".to_string(),
        ]),
        MockScript::text("done"),
    ]);

    let outcome = h
        .conversation
        .send("remind me to call mom", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.fallbacks, 0);
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(outcome.tool_results[0].success);
    assert_eq!(outcome.text, "trailing\n\ndone");
    assert_eq!(reminder_titles(&h.capabilities).await, vec!["Call mom"]);

    let first = h.conversation.history().get(outcome.assistant_turns[0]).unwrap();
    assert_eq!(first.content().trim(), "trailing");
    assert_eq!(first.invocations.len(), 1);
    assert_eq!(first.invocations[0].tool, "add_reminder");
    assert!(!first.invocations[0].fallback);

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    let messages = &requests[1].messages;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text().trim(), "trailing");
    assert_eq!(messages[1].tool_use_ids(), vec!["t1"]);
    assert_eq!(messages[2].tool_result_ids(), vec!["t1"]);
}

#[tokio::test]
async fn test_missing_arguments_use_fallback_payload() {
    let mut h = harness(vec![
        MockScript::tool_call("toolu_2", "add_reminder", None),
        MockScript::text("I added a placeholder reminder."),
    ]);

    let outcome = h
        .conversation
        .send("remind me", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.fallbacks, 1);
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(outcome.tool_results[0].success);
    assert!(outcome.tool_results[0].content.contains("placeholder"));
    assert_eq!(reminder_titles(&h.capabilities).await, vec!["New Reminder"]);

    let turn = h.conversation.history().get(outcome.assistant_turns[0]).unwrap();
    assert!(turn.invocations[0].fallback);
    assert_eq!(h.tracker.snapshot().fallback_arguments, 1);
}

#[tokio::test]
async fn test_unsent_result_is_dropped_after_new_user_turn() {
    let settings = ConversationSettings {
        max_tool_rounds: 1,
        ..ConversationSettings::default()
    };
    let mut h = harness_with(
        vec![
            MockScript::tool_call("toolu_3", "add_memory", Some(r#"{"content":"Likes tea"}"#)),
            MockScript::text("Noted."),
        ],
        settings,
    );

    let first = h
        .conversation
        .send("remember that I like tea", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.rounds, 1);
    assert_eq!(h.conversation.history().pending().len(), 1);

    let second = h
        .conversation
        .send("thanks", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.dropped_results, 1);
    assert!(h.conversation.history().pending().is_empty());

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .messages
        .iter()
        .all(|m| m.tool_result_ids().is_empty()));
    assert_eq!(requests[1].messages.last().unwrap().text(), "thanks");
    assert_eq!(h.tracker.snapshot().dropped_results, 1);
}

#[tokio::test]
async fn test_batch_with_invalid_item_reports_partial_success() {
    let mut h = harness(vec![
        MockScript::text_then_fragmented_tool(
            "Adding both.",
            "toolu_4",
            "add_reminders",
            &[r#"{"items":[{"title":"#, r#""Buy milk"},{"title":""}]}"#],
        ),
        MockScript::text("One of them was missing a title."),
    ]);

    let outcome = h
        .conversation
        .send("remind me to buy milk and something", CancellationToken::new())
        .await
        .unwrap();

    let result = &outcome.tool_results[0];
    assert!(result.success);
    assert!(result.content.contains("1 succeeded, 1 failed"));
    assert_eq!(reminder_titles(&h.capabilities).await, vec!["Buy milk"]);

    let entries = h.conversation.status().entries_for(outcome.assistant_turns[0]);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, OperationState::Success);
    assert_eq!(entries[0].affected, 1);

    // Text streamed before the call stays with the call in the next request
    let requests = h.provider.requests();
    let messages = &requests[1].messages;
    let call = &messages[messages.len() - 2];
    assert_eq!(call.text(), "Adding both.");
    assert_eq!(call.tool_use_ids(), vec!["toolu_4"]);
}

#[tokio::test]
async fn test_soft_failure_of_model_delete_is_success() {
    let mut h = harness(vec![
        MockScript::tool_call("toolu_5", "delete_reminder", Some(r#"{"id":"r99"}"#)),
        MockScript::text("It was already gone."),
    ]);

    let outcome = h
        .conversation
        .send("delete that reminder", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.tool_results[0].success);
    let entries = h.conversation.status().entries_for(outcome.assistant_turns[0]);
    assert_eq!(entries[0].state, OperationState::Success);
    assert_eq!(entries[0].affected, 0);
    assert!(entries[0]
        .detail
        .as_deref()
        .unwrap_or_default()
        .starts_with("treated as success"));
}

#[tokio::test]
async fn test_http_error_finalizes_turn_with_warning() {
    let mut h = harness(vec![MockScript::http_error(500, "internal error")]);

    let outcome = h
        .conversation
        .send("hello", CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome.interrupted, Some(EngineError::Transport(_))));
    assert!(outcome.text.starts_with("⚠️"));
    assert!(outcome.text.contains("HTTP 500"));

    let turn = h.conversation.history().get(outcome.assistant_turns[0]).unwrap();
    assert!(turn.is_complete());
    assert_eq!(h.tracker.snapshot().transport_errors, 1);
}

#[tokio::test]
async fn test_interrupted_stream_replaces_partial_text() {
    let mut h = harness(vec![MockScript::Interrupted(vec![
        sse::text_block_start(),
        sse::text_delta("Hel"),
    ])]);

    let outcome = h
        .conversation
        .send("hello", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.text,
        "⚠️ The response was interrupted: connection reset"
    );
    assert!(h.conversation.history().turns().iter().all(|t| t.is_complete()));
}

#[tokio::test]
async fn test_stream_without_done_sentinel_still_finishes() {
    let mut h = harness(vec![MockScript::raw(vec![
        sse::text_block_start(),
        sse::text_delta("Hi "),
        sse::text_delta("there"),
        sse::message_delta("end_turn"),
    ])]);

    let outcome = h
        .conversation
        .send("hello", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hi there");
    assert!(outcome.interrupted.is_none());
}

#[tokio::test]
async fn test_bracket_commands_run_when_enabled() {
    let settings = ConversationSettings {
        legacy_commands: true,
        ..ConversationSettings::default()
    };
    let mut h = harness_with(
        vec![MockScript::text("Sure! [ADD_REMINDER: Buy milk | 2025-03-14T18:00]")],
        settings,
    );

    let outcome = h
        .conversation
        .send("remind me to buy milk", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Sure!");
    assert_eq!(outcome.command_results.len(), 1);
    assert!(outcome.command_results[0].success);
    assert!(outcome.tool_results.is_empty());
    assert_eq!(reminder_titles(&h.capabilities).await, vec!["Buy milk"]);
    // Command results are never sent back, so there is no second round
    assert_eq!(h.provider.requests().len(), 1);
    assert!(h.conversation.history().pending().is_empty());
}

#[tokio::test]
async fn test_bracket_commands_ignored_by_default() {
    let mut h = harness(vec![MockScript::text("Sure! [ADD_REMINDER: Buy milk]")]);

    let outcome = h
        .conversation
        .send("remind me to buy milk", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Sure! [ADD_REMINDER: Buy milk]");
    assert!(outcome.command_results.is_empty());
    assert!(reminder_titles(&h.capabilities).await.is_empty());
}

#[tokio::test]
async fn test_automatic_turn_uses_seed() {
    let mut h = harness(vec![MockScript::text("Nothing urgent today.")]);

    let outcome = h
        .conversation
        .run_automatic_turn(AutoTrigger::Idle, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Nothing urgent today.");
    let requests = h.provider.requests();
    assert_eq!(requests[0].messages[0].text(), IDLE_CHECK_IN_SEED);
    assert!(h.conversation.history().turns()[0].automatic);
    assert_eq!(h.tracker.snapshot().automatic_turns, 1);
}

#[tokio::test]
async fn test_system_text_carries_context() {
    let mut h = harness(vec![MockScript::text("Hi!"), MockScript::text("Bye!")]);

    h.conversation
        .send("first message", CancellationToken::new())
        .await
        .unwrap();
    h.conversation
        .send("second message", CancellationToken::new())
        .await
        .unwrap();

    let requests = h.provider.requests();
    assert!(requests[0].system.contains("# Context"));
    assert!(!requests[0].tools.is_empty());
    // Earlier exchanges move into the preamble; messages hold the current one
    assert!(requests[1].system.contains("User: first message"));
    assert_eq!(requests[1].messages.len(), 1);
    assert_eq!(requests[1].messages[0].text(), "second message");
}

#[tokio::test]
async fn test_cancelled_token_rejects_turn() {
    let mut h = harness(vec![MockScript::text("unused")]);
    let token = CancellationToken::new();
    token.cancel();

    let result = h.conversation.send("hello", token).await;

    assert_eq!(result.unwrap_err(), EngineError::Cancelled);
    assert!(h.provider.requests().is_empty());
    assert!(h.conversation.history().is_empty());
}

#[tokio::test]
async fn test_reset_history_clears_turns_and_status() {
    let mut h = harness(vec![
        MockScript::tool_call("toolu_6", "add_memory", Some(r#"{"content":"Has a cat"}"#)),
        MockScript::text("Noted."),
    ]);

    h.conversation
        .send("I have a cat", CancellationToken::new())
        .await
        .unwrap();
    assert!(!h.conversation.status().all_entries().is_empty());

    h.conversation.reset_history();

    assert!(h.conversation.history().is_empty());
    assert!(h.conversation.status().all_entries().is_empty());
    // Stored data is not part of the conversation history
    let memories = h
        .capabilities
        .memory()
        .unwrap()
        .list(&ListFilter::default())
        .await
        .unwrap();
    assert_eq!(memories.len(), 1);
}
