//! Conversation extraction pipeline.
//!
//! Four stages connected by the orchestrator, data flowing downward only:
//! ```text
//! ScrollLoader → TurnExtractor → ImagePipeline → assembly
//! ```
//!
//! Failure semantics by stage:
//! - preconditions and missing structure: fatal, fail-closed
//! - scroll incompleteness: advisory, result marked partial
//! - per-image failures: fail-open, recorded on the attachment
//! - anything unexpected: converted to the fatal response at the boundary

pub mod error;
pub mod images;
pub mod runner;
pub mod scroll;
pub mod turns;
pub mod types;

pub use error::ExtractionError;
pub use images::{ImagePipeline, ImageReport, NamedImage};
pub use runner::{extract_conversation, ConversationExtractor, ExtractionOutput};
pub use scroll::ScrollLoader;
pub use turns::{ExtractedConversation, TurnExtractor};
pub use types::*;
