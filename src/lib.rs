//! Scrollscribe — transcript extraction from virtualized chat interfaces.
//!
//! The engine drives a host chat document backward through its lazily
//! loaded history, reconstructs the ordered turn sequence (roles, text,
//! reasoning, code fences), resolves image attachments fail-open, and
//! answers a single extract request with one portable response envelope.
//!
//! Document access is abstracted behind [`host::HostPage`]; markup coupling
//! lives entirely in [`selectors::SelectorRegistry`]. The scripted
//! [`host::synthetic::SyntheticPage`] exercises the whole pipeline without a
//! browser.

pub mod config;
pub mod host;
pub mod logging;
pub mod pipeline;
pub mod selectors;

pub use config::{ExtractorConfig, ImageConfig, ScrollConfig};
pub use host::fetch::{FetchError, FetchedResource, HttpResourceFetcher, ResourceFetcher};
pub use host::synthetic::{ScrollEffect, SyntheticPage};
pub use host::{HostError, HostPage, MutationSubscription};
pub use pipeline::runner::{extract_conversation, ConversationExtractor};
pub use pipeline::types::{
    Attachment, AttachmentKind, ExtractResponse, ExtractionDiagnostics, FetchFailure,
    ImagePayload, ProgressFn, ProgressUpdate, Role, ScrollInfo, ScrollOutcome, Transcript,
    TranscriptMetadata, Turn,
};
pub use pipeline::ExtractionError;
pub use selectors::SelectorRegistry;
