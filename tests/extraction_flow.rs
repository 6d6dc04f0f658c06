//! End-to-end extraction against a scripted host page, public API only.

use std::sync::Mutex;

use pretty_assertions::assert_eq;
use scrollscribe::{
    extract_conversation, ExtractorConfig, HttpResourceFetcher, ProgressUpdate, Role,
    ScrollEffect, SelectorRegistry, SyntheticPage,
};

const URL: &str = "https://host.example/chat/77aa88bb-1122";

const INLINE_PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

/// The page as first rendered: only the newest exchange is mounted.
fn newest_history() -> String {
    r#"<html><head><title>Week planning</title></head><body>
        <main data-testid="chat-scroll-region">
          <div data-testid="conversation-turn">
            <div data-message-author="user">And what about tomorrow?</div>
            <div data-message-author="assistant">
              <div data-testid="reasoning-panel">checking the calendar</div>
              <p>Tomorrow is free. A reminder script:</p>
              <pre><code class="language-python">print(1)</code></pre>
            </div>
          </div>
        </main></body></html>"#
        .to_string()
}

/// The exchange the host lazily mounts once scrolled back.
fn older_history() -> String {
    format!(
        r#"<div data-testid="conversation-turn">
             <div data-message-author="user">Plan my week <img src="blob:https://host.example/expired"></div>
             <div data-message-author="assistant"><p>Here is a plan.</p><img src="{INLINE_PNG}"></div>
           </div>"#
    )
}

fn quick_config() -> ExtractorConfig {
    let mut config = ExtractorConfig::default();
    config.scroll.step_px = 100.0;
    config.scroll.settle_delay_ms = 1;
    config.scroll.indicator_poll_ms = 1;
    config.scroll.indicator_wait_max_ms = 20;
    config.scroll.max_iterations = 30;
    config
}

#[tokio::test]
async fn lazy_loaded_history_is_extracted_in_document_order() {
    let page = SyntheticPage::new(newest_history(), URL)
        .with_scroll_region(100.0)
        .queue_scroll_effect(
            ScrollEffect::mutations(2)
                .with_prepended(older_history())
                .with_loading_polls(1),
        )
        .with_resource("blob:https://host.example/expired", 404, None, vec![]);
    let registry = SelectorRegistry::default();
    let config = quick_config();
    let fetcher = HttpResourceFetcher::new();

    let events: Mutex<Vec<ProgressUpdate>> = Mutex::new(Vec::new());
    let record = |update: ProgressUpdate| events.lock().unwrap().push(update);

    let response =
        extract_conversation(&page, &fetcher, &registry, &config, Some(&record)).await;

    assert!(response.success, "error: {:?}", response.error);
    let transcript = response.data.expect("transcript");

    // Older exchange first: turns follow document order after the lazy load.
    assert_eq!(transcript.metadata.message_count, 4);
    let roles: Vec<Role> = transcript.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    for (i, message) in transcript.messages.iter().enumerate() {
        assert_eq!(message.index, i);
    }
    assert!(transcript.messages[0].content.starts_with("Plan my week"));
    assert_eq!(transcript.messages[2].content, "And what about tomorrow?");

    // Code fence with its language label, body verbatim, fences in order.
    let fenced = &transcript.messages[3].content;
    let open = fenced.find("```python").expect("opening fence");
    let body = fenced.find("print(1)").expect("body");
    let close = fenced.rfind("```").expect("closing fence");
    assert!(open < body && body < close);
    assert_eq!(
        transcript.messages[3].reasoning.as_deref(),
        Some("checking the calendar")
    );

    // One expired handle failed, one inline payload succeeded; the batch
    // stayed fail-open and the numbering counts successes only.
    assert!(transcript.metadata.partial_success);
    assert_eq!(transcript.metadata.image_count, 1);
    assert_eq!(transcript.metadata.extraction_errors.len(), 1);
    assert!(transcript.metadata.extraction_errors[0].contains("404"));
    let images = response.images.expect("images");
    assert!(images.contains_key("image_001.png"));

    let failed = &transcript.messages[0].attachments[0];
    assert!(failed.filename.is_none());
    assert!(failed.error.as_deref().unwrap().contains("404"));
    let resolved = &transcript.messages[1].attachments[0];
    assert_eq!(resolved.filename.as_deref(), Some("image_001.png"));
    assert!(resolved.error.is_none());

    // Scroll metadata reflects the extra pass forced by the mutation.
    assert!(transcript.metadata.scroll_info.scroll_attempts >= 3);
    assert_eq!(transcript.metadata.scroll_info.messages_loaded, 4);

    // Progress stream ends with the unconditional final update.
    let events = events.lock().unwrap();
    assert_eq!(events.last(), Some(&ProgressUpdate::Finished));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressUpdate::ScrollingHistory { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressUpdate::FetchingImages { .. })));

    // The mutation subscription never leaks across the call.
    assert_eq!(page.subscription_count(), 0);
}

#[tokio::test]
async fn rerunning_against_unchanged_page_is_idempotent() {
    let page = SyntheticPage::new(newest_history(), URL).with_scroll_region(10.0);
    let registry = SelectorRegistry::default();
    let config = quick_config();
    let fetcher = HttpResourceFetcher::new();

    let first = extract_conversation(&page, &fetcher, &registry, &config, None).await;
    let second = extract_conversation(&page, &fetcher, &registry, &config, None).await;

    let first = first.data.expect("first transcript");
    let second = second.data.expect("second transcript");
    assert_eq!(first.messages, second.messages);
    assert_eq!(first.metadata.title, second.metadata.title);
}

#[tokio::test]
async fn internal_failure_still_answers_the_request() {
    // Registry whose container pattern is syntactically broken: the engine
    // must still answer with a single failure envelope.
    let registry = SelectorRegistry {
        turn_container: "[unterminated".into(),
        ..SelectorRegistry::default()
    };
    let page = SyntheticPage::new(newest_history(), URL).with_scroll_region(10.0);
    let config = quick_config();
    let fetcher = HttpResourceFetcher::new();

    let response = extract_conversation(&page, &fetcher, &registry, &config, None).await;

    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response.error.unwrap().contains("invalid selector"));
}
