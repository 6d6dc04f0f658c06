//! Core types for the extraction pipeline.
//!
//! The transcript structs double as the export contract: their serialized
//! field names are consumed bit-exactly by the packaging collaborator, so
//! renames here are breaking changes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

// ──────────────────────────────────────────────
// Roles and turns
// ──────────────────────────────────────────────

/// Author of a message section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reconstructed message, in document order.
///
/// `index` is contiguous and 0-based for the lifetime of a single extraction
/// call. Reasoning is assistant-only and exported under the `thinking` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub role: Role,
    pub content: String,
    #[serde(rename = "thinking", skip_serializing_if = "Option::is_none", default)]
    pub reasoning: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Attachment reference gathered during turn extraction.
///
/// Exactly one of `filename` (set by the image pipeline at success time) and
/// `error` (set on fetch failure) may be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
    #[serde(rename = "originalSrc")]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Attachment {
    pub fn image(source: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            filename: None,
            source: source.into(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

// ──────────────────────────────────────────────
// Scroll diagnostics
// ──────────────────────────────────────────────

/// What the scroll loader observed. Diagnostic only — turn extraction runs
/// against whatever is rendered regardless of these values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollOutcome {
    /// True when start-of-history was reached and the document went quiet.
    pub completed: bool,
    /// Message sections visible when scrolling stopped.
    pub turns_visible_estimate: usize,
    /// Scroll iterations performed.
    pub iterations_performed: usize,
    /// Non-fatal note (iteration ceiling, missing scroll region).
    pub advisory: Option<String>,
}

// ──────────────────────────────────────────────
// Failure records
// ──────────────────────────────────────────────

/// One per-attachment acquisition failure. Recorded, never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub locator: String,
    pub reason: String,
    pub turn_index: usize,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "turn {}: {} ({})",
            self.turn_index,
            self.reason,
            truncate_locator(&self.locator)
        )
    }
}

/// Everything non-fatal that went wrong during one extraction call.
#[derive(Debug, Clone, Default)]
pub struct ExtractionDiagnostics {
    pub fetch_failures: Vec<FetchFailure>,
    pub structural: Vec<String>,
}

impl ExtractionDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.fetch_failures.is_empty() && self.structural.is_empty()
    }

    /// Flatten into the transcript's `extractionErrors` strings.
    pub fn render(&self) -> Vec<String> {
        self.fetch_failures
            .iter()
            .map(ToString::to_string)
            .chain(self.structural.iter().cloned())
            .collect()
    }
}

fn truncate_locator(locator: &str) -> String {
    const MAX: usize = 96;
    if locator.len() <= MAX {
        return locator.to_string();
    }
    let cut = locator
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(locator.len());
    format!("{}…", &locator[..cut])
}

// ──────────────────────────────────────────────
// Export contract
// ──────────────────────────────────────────────

/// The portable transcript, shaped exactly as the packaging collaborator
/// expects it.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub metadata: TranscriptMetadata,
    pub messages: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMetadata {
    pub conversation_id: String,
    pub title: String,
    pub extracted_at: String,
    pub url: String,
    pub message_count: usize,
    pub image_count: usize,
    pub extraction_errors: Vec<String>,
    pub partial_success: bool,
    pub scroll_info: ScrollInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollInfo {
    pub messages_loaded: usize,
    pub scroll_attempts: usize,
}

/// Image bytes crossing the response boundary, serialized as base64.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload(pub Vec<u8>);

impl Serialize for ImagePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

/// The single response answering an extract request. Produced on every path,
/// including internal failure — the caller cannot retry a dropped channel.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Transcript>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<BTreeMap<String, ImagePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            images: None,
            warnings: None,
            error: Some(error.into()),
        }
    }
}

// ──────────────────────────────────────────────
// Progress channel
// ──────────────────────────────────────────────

/// Best-effort status update; delivery failure never affects correctness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressUpdate {
    ScrollingHistory { iteration: usize },
    HistoryLoaded { turns_visible: usize },
    ExtractingTurns,
    FetchingImages { completed: usize, total: usize },
    Finished,
}

impl std::fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScrollingHistory { iteration } => {
                write!(f, "Loading earlier messages (pass {iteration})…")
            }
            Self::HistoryLoaded { turns_visible } => {
                write!(f, "History loaded, {turns_visible} messages visible")
            }
            Self::ExtractingTurns => write!(f, "Reading conversation…"),
            Self::FetchingImages { completed, total } => {
                write!(f, "Fetching images ({completed}/{total})…")
            }
            Self::Finished => write!(f, "Done"),
        }
    }
}

/// Optional fire-and-forget progress callback.
pub type ProgressFn<'a> = Option<&'a (dyn Fn(ProgressUpdate) + Send + Sync)>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn turn_serializes_reasoning_as_thinking() {
        let turn = Turn {
            index: 0,
            role: Role::Assistant,
            content: "hello".into(),
            reasoning: Some("pondering".into()),
            attachments: vec![],
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["thinking"], "pondering");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("reasoning").is_none());
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let turn = Turn {
            index: 1,
            role: Role::User,
            content: String::new(),
            reasoning: None,
            attachments: vec![Attachment::image("https://x/img.png")],
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert!(json.get("thinking").is_none());
        let attachment = &json["attachments"][0];
        assert_eq!(attachment["type"], "image");
        assert_eq!(attachment["originalSrc"], "https://x/img.png");
        assert!(attachment.get("filename").is_none());
        assert!(attachment.get("error").is_none());
    }

    #[test]
    fn image_payload_serializes_as_base64() {
        let payload = ImagePayload(vec![0x89, 0x50, 0x4e, 0x47]);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, "iVBORw==");
    }

    #[test]
    fn fetch_failure_display_names_turn_and_reason() {
        let failure = FetchFailure {
            locator: "https://cdn.example/a.png".into(),
            reason: "HTTP 404".into(),
            turn_index: 3,
            timestamp: Utc::now(),
        };
        let rendered = failure.to_string();
        assert!(rendered.contains("turn 3"));
        assert!(rendered.contains("HTTP 404"));
    }

    #[test]
    fn long_locators_are_truncated_in_display() {
        let failure = FetchFailure {
            locator: format!("https://cdn.example/{}", "a".repeat(200)),
            reason: "HTTP 500".into(),
            turn_index: 0,
            timestamp: Utc::now(),
        };
        assert!(failure.to_string().contains('…'));
    }

    #[test]
    fn progress_updates_render_as_status_strings() {
        let update = ProgressUpdate::FetchingImages {
            completed: 2,
            total: 5,
        };
        assert_eq!(update.to_string(), "Fetching images (2/5)…");
    }
}
