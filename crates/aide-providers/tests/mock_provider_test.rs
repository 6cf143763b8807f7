//! The mock provider's scripts decoded through the real stream decoder.

use aide_providers::mock::{sse, MockProvider, MockScript};
use aide_providers::{
    CompletionRequest, LLMProvider, LineOutcome, Message, ProviderError, StopReason, StreamDecoder,
    StreamEventHandler,
};
use tokio_stream::StreamExt;

#[derive(Debug, Default)]
struct Collected {
    text: String,
    blocks: Vec<(Option<String>, Option<String>)>,
    arguments: String,
    stops: Vec<StopReason>,
}

impl StreamEventHandler for Collected {
    fn on_block_start(&mut self, id: Option<&str>, name: Option<&str>) {
        self.blocks
            .push((id.map(str::to_string), name.map(str::to_string)));
    }

    fn on_argument_fragment(&mut self, fragment: &str) {
        self.arguments.push_str(fragment);
    }

    fn on_turn_stop(&mut self, reason: &StopReason) {
        self.stops.push(reason.clone());
    }

    fn on_text_delta(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        system: "You are a test.".to_string(),
        messages: vec![Message::user(text)],
        tools: Vec::new(),
        max_tokens: None,
    }
}

/// Drain the stream through a decoder; `Err` if the stream failed.
async fn decode(provider: &MockProvider, text: &str) -> anyhow::Result<(Collected, StreamDecoder)> {
    let mut stream = provider.stream(request(text)).await?;
    let mut decoder = StreamDecoder::new();
    let mut collected = Collected::default();
    while let Some(line) = stream.next().await {
        if decoder.feed(&line?, &mut collected) == LineOutcome::Finished {
            break;
        }
    }
    Ok((collected, decoder))
}

#[tokio::test]
async fn test_fragmented_tool_call_reassembles() {
    let provider = MockProvider::new().with_script(MockScript::text_then_fragmented_tool(
        "Let me add that.",
        "toolu_1",
        "add_reminder",
        &[r#"{"title":"#, r#""Call mom"}"#],
    ));

    let (collected, decoder) = decode(&provider, "remind me").await.unwrap();

    assert_eq!(collected.text, "Let me add that.");
    assert!(collected
        .blocks
        .contains(&(Some("toolu_1".to_string()), Some("add_reminder".to_string()))));
    assert_eq!(collected.arguments, r#"{"title":"Call mom"}"#);
    assert_eq!(collected.stops, vec![StopReason::ToolUse]);
    assert!(decoder.is_finished());
}

#[tokio::test]
async fn test_requests_are_recorded_in_order() {
    let provider =
        MockProvider::new().with_scripts(vec![MockScript::text("one"), MockScript::text("two")]);

    let (first, _) = decode(&provider, "a").await.unwrap();
    let (second, _) = decode(&provider, "b").await.unwrap();

    assert_eq!(first.text, "one");
    assert_eq!(second.text, "two");
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages[0].text(), "b");
    assert_eq!(provider.remaining_scripts(), 0);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let provider = MockProvider::new().with_script(MockScript::raw(vec![
        "event: content_block_delta".to_string(),
        "data: {not json".to_string(),
        String::new(),
        sse::text_delta("still here"),
        sse::done(),
    ]));

    let (collected, decoder) = decode(&provider, "hi").await.unwrap();

    assert_eq!(collected.text, "still here");
    assert_eq!(decoder.events_emitted(), 1);
}

#[tokio::test]
async fn test_http_error_fails_before_streaming() {
    let provider = MockProvider::new().with_script(MockScript::http_error(401, "bad key"));

    let err = decode(&provider, "hi").await.unwrap_err();

    match err.downcast_ref::<ProviderError>() {
        Some(ProviderError::Http { status, .. }) => assert_eq!(*status, 401),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_interrupted_stream_yields_error_item() {
    let provider = MockProvider::new().with_script(MockScript::Interrupted(vec![
        sse::text_block_start(),
        sse::text_delta("partial"),
    ]));

    let err = decode(&provider, "hi").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::Stream(_))
    ));
}
