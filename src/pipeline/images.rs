//! Image acquisition pipeline — resolves attachment locators to bytes.
//!
//! Strictly fail-open: every locator resolves to either bytes or a failure
//! record, a single bad attachment never aborts the batch, and nothing is
//! retried. Attachments are processed in fixed-size batches purely to bound
//! memory and connections; batching never affects which images succeed.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures_util::future::join_all;
use regex::Regex;

use crate::config::ImageConfig;
use crate::host::fetch::{FetchedResource, ResourceFetcher};
use crate::host::HostPage;
use crate::pipeline::types::{FetchFailure, ProgressFn, ProgressUpdate, Turn};

/// File-extension suffix recognized in a locator path or query boundary.
static LOCATOR_EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(png|jpe?g|gif|webp|svg|bmp|avif)(?:[?#]|$)").expect("valid regex")
});

/// One resolved image, named at success time.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Batch result: resolved images plus per-attachment failure records.
#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    pub images: Vec<NamedImage>,
    pub failures: Vec<FetchFailure>,
}

struct ImageJob {
    turn_index: usize,
    attachment_index: usize,
    locator: String,
}

pub struct ImagePipeline<'a> {
    page: &'a dyn HostPage,
    fetcher: &'a dyn ResourceFetcher,
    config: &'a ImageConfig,
}

impl<'a> ImagePipeline<'a> {
    pub fn new(
        page: &'a dyn HostPage,
        fetcher: &'a dyn ResourceFetcher,
        config: &'a ImageConfig,
    ) -> Self {
        Self {
            page,
            fetcher,
            config,
        }
    }

    /// Resolve every attachment gathered during turn extraction, writing the
    /// resolved filename or the failure reason back onto each attachment.
    pub async fn resolve_attachments(
        &self,
        turns: &mut [Turn],
        progress: ProgressFn<'_>,
    ) -> ImageReport {
        let jobs: Vec<ImageJob> = turns
            .iter()
            .flat_map(|turn| {
                turn.attachments
                    .iter()
                    .enumerate()
                    .map(move |(attachment_index, attachment)| ImageJob {
                        turn_index: turn.index,
                        attachment_index,
                        locator: attachment.source.clone(),
                    })
            })
            .collect();

        let total = jobs.len();
        let mut report = ImageReport::default();
        if total == 0 {
            return report;
        }

        let mut completed = 0usize;
        let mut next_sequence = 0usize;

        for batch in jobs.chunks(self.config.batch_size.max(1)) {
            let outcomes = join_all(batch.iter().map(|job| self.resolve_one(&job.locator))).await;

            for (job, outcome) in batch.iter().zip(outcomes) {
                completed += 1;
                let attachment = &mut turns[job.turn_index].attachments[job.attachment_index];
                match outcome {
                    Ok((bytes, content_type)) => {
                        next_sequence += 1;
                        let extension = self.infer_extension(content_type.as_deref(), &job.locator);
                        let filename = format!("image_{next_sequence:03}.{extension}");
                        attachment.filename = Some(filename.clone());
                        report.images.push(NamedImage { filename, bytes });
                    }
                    Err(reason) => {
                        tracing::warn!(
                            turn = job.turn_index,
                            reason = %reason,
                            "image acquisition failed"
                        );
                        attachment.error = Some(reason.clone());
                        report.failures.push(FetchFailure {
                            locator: job.locator.clone(),
                            reason,
                            turn_index: job.turn_index,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }

            if let Some(report_progress) = progress {
                report_progress(ProgressUpdate::FetchingImages { completed, total });
            }
        }

        tracing::info!(
            resolved = report.images.len(),
            failed = report.failures.len(),
            "image acquisition finished"
        );
        report
    }

    async fn resolve_one(&self, locator: &str) -> Result<(Vec<u8>, Option<String>), String> {
        if locator.starts_with("data:") {
            return decode_inline_payload(locator);
        }
        let resource = if locator.starts_with("blob:") {
            // Ephemeral handles only resolve inside the host context.
            self.page.fetch_resource(locator).await
        } else {
            self.fetcher.fetch(locator).await
        };
        match resource {
            Ok(resource) if resource.is_success() => {
                let FetchedResource {
                    content_type,
                    bytes,
                    ..
                } = resource;
                Ok((bytes, content_type))
            }
            Ok(resource) => Err(format!("HTTP {}", resource.status)),
            Err(error) => Err(error.to_string()),
        }
    }

    /// Media type of the payload wins; a recognizable locator suffix is next;
    /// otherwise the configured safe default.
    fn infer_extension(&self, content_type: Option<&str>, locator: &str) -> String {
        if let Some(extension) = content_type.and_then(extension_for_media_type) {
            return extension.to_string();
        }
        if let Some(captures) = LOCATOR_EXTENSION_RE.captures(locator) {
            return captures[1].to_ascii_lowercase();
        }
        self.config.default_extension.clone()
    }
}

fn extension_for_media_type(content_type: &str) -> Option<&'static str> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match media_type.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

/// Decode a `data:` locator in place. Malformed payloads are failures, not
/// panics or errors that could abort the batch.
fn decode_inline_payload(locator: &str) -> Result<(Vec<u8>, Option<String>), String> {
    let rest = locator
        .strip_prefix("data:")
        .ok_or_else(|| "not an inline payload".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "malformed inline payload: missing data separator".to_string())?;

    let media_type = meta.split(';').next().unwrap_or_default().trim();
    let is_base64 = meta
        .split(';')
        .any(|segment| segment.trim().eq_ignore_ascii_case("base64"));
    if !is_base64 {
        return Err("unsupported inline encoding (expected base64)".to_string());
    }

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| format!("malformed base64 payload: {e}"))?;

    let content_type = (!media_type.is_empty()).then(|| media_type.to_string());
    Ok((bytes, content_type))
}
