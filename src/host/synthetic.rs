//! Scripted in-memory host page for deterministic tests.
//!
//! Models exactly the host behaviors the engine depends on: a scrollable
//! history region, lazy-load effects triggered by scroll dispatch (structural
//! mutations, prepended history, a transient loading indicator), scripted
//! resources for ephemeral locators, and a live subscription count so tests
//! can assert the mutation subscription is released on every exit path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::host::fetch::{FetchError, FetchedResource};
use crate::host::{HostError, HostPage, MutationSubscription};

/// Indicator snippet injected while a scripted loading window is open.
/// Matches the default registry's `loading_indicator` pattern.
const LOADING_SNIPPET: &str = r#"<div data-testid="history-loading" class="history-spinner"></div>"#;

/// One lazy-load response, consumed by a single scroll dispatch.
#[derive(Debug, Clone, Default)]
pub struct ScrollEffect {
    /// Structural mutations recorded in the region's subtree.
    pub mutations: u64,
    /// Older history inserted at the top of the document body.
    pub prepend_html: Option<String>,
    /// Visibility polls the loading indicator survives before vanishing.
    pub loading_polls: u32,
}

impl ScrollEffect {
    /// No mutations, no new content, no indicator.
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn mutations(count: u64) -> Self {
        Self {
            mutations: count,
            ..Self::default()
        }
    }

    pub fn with_prepended(mut self, html: impl Into<String>) -> Self {
        self.prepend_html = Some(html.into());
        self
    }

    pub fn with_loading_polls(mut self, polls: u32) -> Self {
        self.loading_polls = polls;
        self
    }
}

#[derive(Debug, Clone)]
enum ScriptedResource {
    Payload {
        status: u16,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
    TransportError(String),
}

#[derive(Debug)]
struct PageState {
    url: String,
    html: String,
    scroll_offset: Option<f64>,
    scroll_script: VecDeque<ScrollEffect>,
    loading_polls: u32,
    pending_mutations: u64,
    active_subscriptions: usize,
    expand_calls: usize,
    resources: HashMap<String, ScriptedResource>,
    fail_scroll_top_at_read: Option<usize>,
    scroll_top_reads: usize,
}

/// In-memory [`HostPage`] whose lazy-load behavior is scripted up front.
#[derive(Clone)]
pub struct SyntheticPage {
    state: Arc<Mutex<PageState>>,
}

impl SyntheticPage {
    pub fn new(html: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: url.into(),
                html: html.into(),
                scroll_offset: None,
                scroll_script: VecDeque::new(),
                loading_polls: 0,
                pending_mutations: 0,
                active_subscriptions: 0,
                expand_calls: 0,
                resources: HashMap::new(),
                fail_scroll_top_at_read: None,
                scroll_top_reads: 0,
            })),
        }
    }

    /// Give the page a scrollable history region starting at `offset`.
    pub fn with_scroll_region(self, offset: f64) -> Self {
        self.lock().scroll_offset = Some(offset.max(0.0));
        self
    }

    /// Queue the lazy-load effect consumed by the next scroll dispatch.
    /// Dispatches beyond the script are quiet.
    pub fn queue_scroll_effect(self, effect: ScrollEffect) -> Self {
        self.lock().scroll_script.push_back(effect);
        self
    }

    /// Script a payload for an ephemeral locator.
    pub fn with_resource(
        self,
        locator: impl Into<String>,
        status: u16,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        self.lock().resources.insert(
            locator.into(),
            ScriptedResource::Payload {
                status,
                content_type: content_type.map(str::to_owned),
                bytes,
            },
        );
        self
    }

    /// Script a transport failure for an ephemeral locator.
    pub fn with_failing_resource(
        self,
        locator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.lock()
            .resources
            .insert(locator.into(), ScriptedResource::TransportError(message.into()));
        self
    }

    /// Fail the N-th scroll-offset read (0-based) with a scripting error.
    /// Used to exercise the loader's error exit path.
    pub fn fail_scroll_top_at_read(self, read_index: usize) -> Self {
        self.lock().fail_scroll_top_at_read = Some(read_index);
        self
    }

    /// Mutation subscriptions currently held open.
    pub fn subscription_count(&self) -> usize {
        self.lock().active_subscriptions
    }

    /// Times the content-expansion hook was invoked.
    pub fn expand_calls(&self) -> usize {
        self.lock().expand_calls
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().expect("synthetic page state poisoned")
    }

    fn effective_html(state: &PageState) -> String {
        if state.loading_polls > 0 {
            insert_after_body_open(&state.html, LOADING_SNIPPET)
        } else {
            state.html.clone()
        }
    }

    fn count_matches(html: &str, selector: &str) -> Result<usize, HostError> {
        let parsed = Selector::parse(selector)
            .map_err(|e| HostError::Query(format!("invalid selector `{selector}`: {e}")))?;
        let document = Html::parse_document(html);
        Ok(document.select(&parsed).count())
    }

    fn selector_targets_loading_indicator(selector: &str) -> bool {
        Self::count_matches(LOADING_SNIPPET, selector).is_ok_and(|count| count > 0)
    }
}

fn insert_after_body_open(html: &str, snippet: &str) -> String {
    if let Some(body_start) = html.find("<body") {
        if let Some(close) = html[body_start..].find('>') {
            let insert_at = body_start + close + 1;
            let mut out = String::with_capacity(html.len() + snippet.len());
            out.push_str(&html[..insert_at]);
            out.push_str(snippet);
            out.push_str(&html[insert_at..]);
            return out;
        }
    }
    format!("{snippet}{html}")
}

#[async_trait]
impl HostPage for SyntheticPage {
    async fn page_url(&self) -> Result<String, HostError> {
        Ok(self.lock().url.clone())
    }

    async fn document_html(&self) -> Result<String, HostError> {
        let state = self.lock();
        Ok(Self::effective_html(&state))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, HostError> {
        let mut state = self.lock();
        let html = Self::effective_html(&state);
        let visible = Self::count_matches(&html, selector)? > 0;
        // A visibility poll against the indicator consumes one scripted window.
        if visible && state.loading_polls > 0 && Self::selector_targets_loading_indicator(selector)
        {
            state.loading_polls -= 1;
        }
        Ok(visible)
    }

    async fn matching_count(&self, selector: &str) -> Result<usize, HostError> {
        let state = self.lock();
        let html = Self::effective_html(&state);
        Self::count_matches(&html, selector)
    }

    async fn scroll_top(&self, _selector: &str) -> Result<Option<f64>, HostError> {
        let mut state = self.lock();
        let read_index = state.scroll_top_reads;
        state.scroll_top_reads += 1;
        if state.fail_scroll_top_at_read == Some(read_index) {
            return Err(HostError::Scripting("scripted scroll-offset failure".into()));
        }
        Ok(state.scroll_offset)
    }

    async fn set_scroll_top(&self, _selector: &str, offset: f64) -> Result<(), HostError> {
        let mut state = self.lock();
        if let Some(current) = state.scroll_offset.as_mut() {
            *current = offset.max(0.0);
        }
        Ok(())
    }

    async fn dispatch_scroll_event(&self, _selector: &str) -> Result<(), HostError> {
        let mut state = self.lock();
        if let Some(effect) = state.scroll_script.pop_front() {
            state.pending_mutations += effect.mutations;
            state.loading_polls = effect.loading_polls;
            if let Some(snippet) = effect.prepend_html {
                state.html = insert_after_body_open(&state.html, &snippet);
            }
        }
        Ok(())
    }

    async fn observe_mutations(
        &self,
        _selector: &str,
    ) -> Result<Box<dyn MutationSubscription>, HostError> {
        let mut state = self.lock();
        state.active_subscriptions += 1;
        Ok(Box::new(SyntheticSubscription {
            state: Arc::clone(&self.state),
        }))
    }

    async fn fetch_resource(&self, locator: &str) -> Result<FetchedResource, FetchError> {
        let state = self.lock();
        match state.resources.get(locator) {
            Some(ScriptedResource::Payload {
                status,
                content_type,
                bytes,
            }) => Ok(FetchedResource {
                status: *status,
                content_type: content_type.clone(),
                bytes: bytes.clone(),
            }),
            Some(ScriptedResource::TransportError(message)) => {
                Err(FetchError::Transport(message.clone()))
            }
            None => Err(FetchError::Transport(format!(
                "no scripted resource for {locator}"
            ))),
        }
    }

    async fn expand_collapsed_content(&self) -> Result<(), HostError> {
        self.lock().expand_calls += 1;
        Ok(())
    }
}

struct SyntheticSubscription {
    state: Arc<Mutex<PageState>>,
}

impl MutationSubscription for SyntheticSubscription {
    fn take_activity(&mut self) -> u64 {
        let mut state = self.state.lock().expect("synthetic page state poisoned");
        std::mem::take(&mut state.pending_mutations)
    }
}

impl Drop for SyntheticSubscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.active_subscriptions = state.active_subscriptions.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><div data-testid="conversation-turn"></div></body></html>"#;

    #[tokio::test]
    async fn scroll_region_defaults_to_absent() {
        let page = SyntheticPage::new(PAGE, "https://host.example/chat/abc");
        assert_eq!(page.scroll_top("main").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scroll_offset_clamps_at_zero() {
        let page = SyntheticPage::new(PAGE, "u").with_scroll_region(100.0);
        page.set_scroll_top("main", -50.0).await.unwrap();
        assert_eq!(page.scroll_top("main").await.unwrap(), Some(0.0));
    }

    #[tokio::test]
    async fn dispatch_consumes_script_and_records_mutations() {
        let page = SyntheticPage::new(PAGE, "u")
            .with_scroll_region(100.0)
            .queue_scroll_effect(
                ScrollEffect::mutations(3).with_prepended(r#"<p id="older">old</p>"#),
            );
        let mut sub = page.observe_mutations("main").await.unwrap();
        page.dispatch_scroll_event("main").await.unwrap();
        assert_eq!(sub.take_activity(), 3);
        assert_eq!(sub.take_activity(), 0);
        assert_eq!(page.matching_count("#older").await.unwrap(), 1);
        // Past the script: quiet.
        page.dispatch_scroll_event("main").await.unwrap();
        assert_eq!(sub.take_activity(), 0);
    }

    #[tokio::test]
    async fn loading_indicator_survives_scripted_polls() {
        let page = SyntheticPage::new(PAGE, "u")
            .with_scroll_region(100.0)
            .queue_scroll_effect(ScrollEffect::quiet().with_loading_polls(2));
        page.dispatch_scroll_event("main").await.unwrap();
        let indicator = r#"[data-testid="history-loading"]"#;
        assert!(page.is_visible(indicator).await.unwrap());
        assert!(page.is_visible(indicator).await.unwrap());
        assert!(!page.is_visible(indicator).await.unwrap());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_it() {
        let page = SyntheticPage::new(PAGE, "u");
        let sub = page.observe_mutations("main").await.unwrap();
        assert_eq!(page.subscription_count(), 1);
        drop(sub);
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn scripted_resources_resolve_and_fail() {
        let page = SyntheticPage::new(PAGE, "u")
            .with_resource("blob:abc", 200, Some("image/png"), vec![1, 2])
            .with_failing_resource("blob:bad", "socket closed");
        let ok = page.fetch_resource("blob:abc").await.unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.bytes, vec![1, 2]);
        let err = page.fetch_resource("blob:bad").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(m) if m.contains("socket closed")));
    }
}
