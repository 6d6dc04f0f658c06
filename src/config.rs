//! Engine tuning knobs with serde-loadable overrides.
//!
//! Defaults are conservative enough for slow hosts; all values can be
//! overridden from JSON the same way the selector registry is.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration threaded into the extraction orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub scroll: ScrollConfig,
    pub images: ImageConfig,
}

impl ExtractorConfig {
    /// Load a configuration from JSON, filling unspecified fields from defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Scroll loader pacing and termination limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Pixels subtracted from the scroll offset each iteration.
    pub step_px: f64,
    /// Fixed wait after each scroll command before re-checking state.
    pub settle_delay_ms: u64,
    /// Iteration ceiling; hitting it is advisory, never fatal.
    pub max_iterations: usize,
    /// Consecutive quiet rounds at start-of-history required to finish.
    pub quiet_rounds_required: u32,
    /// Poll interval while the loading indicator stays visible.
    pub indicator_poll_ms: u64,
    /// Ceiling on waiting for the loading indicator to vanish.
    pub indicator_wait_max_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            step_px: 2400.0,
            settle_delay_ms: 500,
            max_iterations: 120,
            quiet_rounds_required: 2,
            indicator_poll_ms: 200,
            indicator_wait_max_ms: 8_000,
        }
    }
}

impl ScrollConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn indicator_poll(&self) -> Duration {
        Duration::from_millis(self.indicator_poll_ms)
    }

    pub fn indicator_wait_max(&self) -> Duration {
        Duration::from_millis(self.indicator_wait_max_ms)
    }
}

/// Image acquisition batching and naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Attachments resolved concurrently per batch; batch N+1 waits for N.
    pub batch_size: usize,
    /// Extension used when neither payload type nor locator suffix helps.
    pub default_extension: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            default_extension: "png".into(),
        }
    }
}
