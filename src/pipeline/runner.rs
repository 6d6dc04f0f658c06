//! Extraction orchestrator — sequences the full pipeline.
//!
//! One call: precondition check → scroll loader → content-expansion hook →
//! turn extraction → image acquisition → assembly. Data flows downward only;
//! turn extraction finishes entirely before the first image is fetched. The
//! boundary method answers the single extract request with exactly one
//! response envelope, on every path — the caller cannot retry a dropped
//! channel.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::config::ExtractorConfig;
use crate::host::fetch::ResourceFetcher;
use crate::host::HostPage;
use crate::pipeline::error::ExtractionError;
use crate::pipeline::images::{ImagePipeline, NamedImage};
use crate::pipeline::scroll::ScrollLoader;
use crate::pipeline::turns::{ExtractedConversation, TurnExtractor};
use crate::pipeline::types::{
    ExtractResponse, ExtractionDiagnostics, ImagePayload, ProgressFn, ProgressUpdate, Role,
    ScrollInfo, Transcript, TranscriptMetadata, Turn,
};
use crate::selectors::SelectorRegistry;

/// Successful run, before it is folded into the response envelope.
#[derive(Debug)]
pub struct ExtractionOutput {
    pub transcript: Transcript,
    pub images: Vec<NamedImage>,
    pub warnings: Vec<String>,
}

pub struct ConversationExtractor<'a> {
    page: &'a dyn HostPage,
    fetcher: &'a dyn ResourceFetcher,
    registry: &'a SelectorRegistry,
    config: &'a ExtractorConfig,
}

impl<'a> ConversationExtractor<'a> {
    pub fn new(
        page: &'a dyn HostPage,
        fetcher: &'a dyn ResourceFetcher,
        registry: &'a SelectorRegistry,
        config: &'a ExtractorConfig,
    ) -> Self {
        Self {
            page,
            fetcher,
            registry,
            config,
        }
    }

    /// Answer the extract request. Never fails: internal errors become the
    /// fatal response variant, and the final progress update is delivered
    /// unconditionally on both paths.
    pub async fn extract(&self, progress: ProgressFn<'_>) -> ExtractResponse {
        let outcome = self.run(progress).await;
        if let Some(report) = progress {
            report(ProgressUpdate::Finished);
        }
        match outcome {
            Ok(output) => {
                let images: BTreeMap<String, ImagePayload> = output
                    .images
                    .into_iter()
                    .map(|image| (image.filename, ImagePayload(image.bytes)))
                    .collect();
                ExtractResponse {
                    success: true,
                    data: Some(output.transcript),
                    images: (!images.is_empty()).then_some(images),
                    warnings: (!output.warnings.is_empty()).then_some(output.warnings),
                    error: None,
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "extraction failed");
                ExtractResponse::failure(error.to_string())
            }
        }
    }

    async fn run(&self, progress: ProgressFn<'_>) -> Result<ExtractionOutput, ExtractionError> {
        // Fail closed before any side effects: a half-generated response
        // would export as silently truncated text.
        if self
            .page
            .is_visible(&self.registry.generation_indicator)
            .await?
        {
            return Err(ExtractionError::GenerationInProgress);
        }
        // A malformed registry is also caught before the page is touched.
        let extractor = TurnExtractor::new(self.registry)?;

        let scroll = ScrollLoader::new(self.page, self.registry, &self.config.scroll)
            .load_history(progress)
            .await?;
        if let Some(report) = progress {
            report(ProgressUpdate::HistoryLoaded {
                turns_visible: scroll.turns_visible_estimate,
            });
        }

        let mut warnings = Vec::new();
        if let Some(advisory) = scroll.advisory.clone() {
            warnings.push(advisory);
        }
        if let Err(error) = self.page.expand_collapsed_content().await {
            tracing::warn!(error = %error, "content expansion failed, extracting as rendered");
            warnings.push(format!("content expansion failed: {error}"));
        }

        if let Some(report) = progress {
            report(ProgressUpdate::ExtractingTurns);
        }
        let snapshot = self.page.document_html().await?;
        let ExtractedConversation { title, mut turns } = extractor.extract(&snapshot)?;

        let image_report = ImagePipeline::new(self.page, self.fetcher, &self.config.images)
            .resolve_attachments(&mut turns, progress)
            .await;

        let diagnostics = ExtractionDiagnostics {
            fetch_failures: image_report.failures,
            structural: validate_turns(&turns),
        };
        let partial_success = !diagnostics.is_empty() || !scroll.completed;

        let url = self.page.page_url().await?;
        let metadata = TranscriptMetadata {
            conversation_id: derive_conversation_id(&url, &self.registry.conversation_id_pattern),
            title: title.unwrap_or_else(|| fallback_title(&turns)),
            extracted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            url,
            message_count: turns.len(),
            image_count: image_report.images.len(),
            extraction_errors: diagnostics.render(),
            partial_success,
            scroll_info: ScrollInfo {
                messages_loaded: scroll.turns_visible_estimate,
                scroll_attempts: scroll.iterations_performed,
            },
        };

        tracing::info!(
            messages = metadata.message_count,
            images = metadata.image_count,
            partial = metadata.partial_success,
            "extraction assembled"
        );

        Ok(ExtractionOutput {
            transcript: Transcript {
                metadata,
                messages: turns,
            },
            images: image_report.images,
            warnings,
        })
    }
}

/// One-shot convenience wrapper around [`ConversationExtractor`].
pub async fn extract_conversation(
    page: &dyn HostPage,
    fetcher: &dyn ResourceFetcher,
    registry: &SelectorRegistry,
    config: &ExtractorConfig,
    progress: ProgressFn<'_>,
) -> ExtractResponse {
    ConversationExtractor::new(page, fetcher, registry, config)
        .extract(progress)
        .await
}

/// Check the invariants the export contract relies on. Violations are
/// recorded as diagnostics rather than trusted silently.
fn validate_turns(turns: &[Turn]) -> Vec<String> {
    let mut problems = Vec::new();
    for (expected, turn) in turns.iter().enumerate() {
        if turn.index != expected {
            problems.push(format!(
                "turn index {} out of sequence (expected {expected})",
                turn.index
            ));
        }
        for attachment in &turn.attachments {
            if attachment.filename.is_some() && attachment.error.is_some() {
                problems.push(format!(
                    "attachment in turn {} carries both a filename and an error",
                    turn.index
                ));
            }
        }
    }
    problems
}

fn derive_conversation_id(url: &str, pattern: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        Err(error) => {
            tracing::warn!(%error, "invalid conversation id pattern, using generated id");
            Uuid::new_v4().to_string()
        }
    }
}

/// Title of last resort: the first line of the first non-empty user message,
/// truncated at 50 characters on a UTF-8 boundary.
fn fallback_title(turns: &[Turn]) -> String {
    let first_line = turns
        .iter()
        .find(|turn| turn.role == Role::User && !turn.content.trim().is_empty())
        .and_then(|turn| turn.content.trim().lines().next())
        .map(str::trim);
    match first_line {
        Some(line) if !line.is_empty() => {
            let boundary = line
                .char_indices()
                .take_while(|(i, _)| *i < 50)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(line.len());
            if boundary >= line.len() {
                line.to_string()
            } else {
                format!("{}...", &line[..boundary])
            }
        }
        _ => "Untitled conversation".to_string(),
    }
}
