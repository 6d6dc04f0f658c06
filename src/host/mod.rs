//! Host-document abstraction.
//!
//! The engine never reads ambient document state: every component receives
//! an explicit [`HostPage`] handle together with the selector registry. The
//! trait is object-safe so orchestration code works against `&dyn HostPage`,
//! and the in-memory [`synthetic::SyntheticPage`] implementation drives the
//! whole pipeline deterministically in tests.

pub mod fetch;
pub mod synthetic;

use async_trait::async_trait;
use thiserror::Error;

use crate::host::fetch::{FetchError, FetchedResource};

/// Failures raised by the host document itself (not by per-image fetches).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("selector query failed: {0}")]
    Query(String),
    #[error("host scripting call failed: {0}")]
    Scripting(String),
    #[error("mutation subscription failed: {0}")]
    Subscription(String),
}

/// Handle onto the rendered chat document.
///
/// Selector arguments are the registry's locator patterns; the host resolves
/// them against its live document. Scroll-region operations report a missing
/// region as `Ok(None)` — the loader treats that as a soft failure, never as
/// an abort.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Current page URL.
    async fn page_url(&self) -> Result<String, HostError>;

    /// Serialized snapshot of the rendered document. Parsing the snapshot is
    /// the extraction-side clone; the live document is never mutated.
    async fn document_html(&self) -> Result<String, HostError>;

    /// Whether at least one element matching `selector` is currently visible.
    async fn is_visible(&self, selector: &str) -> Result<bool, HostError>;

    /// Number of elements currently matching `selector`.
    async fn matching_count(&self, selector: &str) -> Result<usize, HostError>;

    /// Scroll offset of the region, or `None` when no region matches.
    async fn scroll_top(&self, selector: &str) -> Result<Option<f64>, HostError>;

    /// Set the region's scroll offset (clamped by the host).
    async fn set_scroll_top(&self, selector: &str, offset: f64) -> Result<(), HostError>;

    /// Synthetically dispatch a scroll notification on the region. Direct
    /// offset mutation alone does not reliably reach reactive host listeners.
    async fn dispatch_scroll_event(&self, selector: &str) -> Result<(), HostError>;

    /// Subscribe to structural mutations (insert/remove) under the region's
    /// subtree. The returned handle is singly owned and unsubscribes on drop,
    /// so the subscription is released on every exit path.
    async fn observe_mutations(
        &self,
        selector: &str,
    ) -> Result<Box<dyn MutationSubscription>, HostError>;

    /// Resolve an ephemeral in-page handle (for example a `blob:` locator)
    /// that only the host context can read.
    async fn fetch_resource(&self, locator: &str) -> Result<FetchedResource, FetchError>;

    /// Hook for the content-expansion collaborator (unfolding collapsed
    /// sections before extraction). Default is a no-op.
    async fn expand_collapsed_content(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Owned mutation-subscription handle.
///
/// [`take_activity`](Self::take_activity) drains the count of structural
/// mutations recorded since the previous drain. Dropping the handle cancels
/// the subscription.
pub trait MutationSubscription: Send {
    fn take_activity(&mut self) -> u64;
}
