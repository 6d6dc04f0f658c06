//! Fatal-error taxonomy for the extraction pipeline.
//!
//! Only precondition failures and host faults surface here. Scroll
//! incompleteness is advisory (`ScrollOutcome`), and per-image failures are
//! recorded on their attachments — neither aborts a run.

use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The host is still generating a response; extraction must not start.
    #[error("a response is still being generated; retry once it finishes")]
    GenerationInProgress,

    /// Zero elements matched the container pattern or either role pattern.
    #[error("no conversation structure matched the selector registry")]
    NoConversationStructure,

    /// A registry pattern failed to compile.
    #[error("invalid selector pattern `{pattern}`: {message}")]
    InvalidSelector { pattern: String, message: String },

    /// The host document handle itself failed.
    #[error("host page error: {0}")]
    Host(#[from] HostError),
}
