//! Scroll loader — drives the host's history region back to its beginning.
//!
//! Completion cannot be judged from element counts: a virtualized host
//! recycles its rendered nodes, so the count stays flat while content
//! changes entirely. The loader instead subscribes to structural mutations
//! under the region's subtree and treats any insertion or removal as
//! activity. It finishes only at start-of-history after the configured
//! number of consecutive quiet rounds.

use tokio::time::{sleep, Instant};

use crate::config::ScrollConfig;
use crate::host::{HostError, HostPage};
use crate::pipeline::types::{ProgressFn, ProgressUpdate, ScrollOutcome};
use crate::selectors::SelectorRegistry;

pub struct ScrollLoader<'a> {
    page: &'a dyn HostPage,
    selectors: &'a SelectorRegistry,
    config: &'a ScrollConfig,
}

impl<'a> ScrollLoader<'a> {
    pub fn new(
        page: &'a dyn HostPage,
        selectors: &'a SelectorRegistry,
        config: &'a ScrollConfig,
    ) -> Self {
        Self {
            page,
            selectors,
            config,
        }
    }

    /// Scroll backward until history is fully loaded, the iteration ceiling
    /// is hit, or no scrollable region exists. Never fatal: every outcome is
    /// reported through [`ScrollOutcome`] and extraction proceeds against
    /// whatever is rendered.
    pub async fn load_history(&self, progress: ProgressFn<'_>) -> Result<ScrollOutcome, HostError> {
        let region = &self.selectors.scroll_region;

        let Some(start_offset) = self.page.scroll_top(region).await? else {
            tracing::warn!(selector = %region, "no scrollable region found, using rendered content as-is");
            return Ok(ScrollOutcome {
                completed: false,
                turns_visible_estimate: self.visible_turns().await?,
                iterations_performed: 0,
                advisory: Some("no scrollable region found; extracted currently rendered content".into()),
            });
        };

        // Held for the whole loop and dropped on every exit path, including
        // errors propagated with `?`.
        let mut subscription = self.page.observe_mutations(region).await?;

        let mut last_offset = start_offset;
        let mut quiet_rounds: u32 = 0;
        let mut iterations = 0usize;
        let mut completed = false;

        while iterations < self.config.max_iterations {
            iterations += 1;
            if let Some(report) = progress {
                report(ProgressUpdate::ScrollingHistory {
                    iteration: iterations,
                });
            }

            let target = (last_offset - self.config.step_px).max(0.0);
            self.page.set_scroll_top(region, target).await?;
            self.page.dispatch_scroll_event(region).await?;
            sleep(self.config.settle_delay()).await;
            self.wait_for_indicator_clear().await?;

            let offset = self.page.scroll_top(region).await?.unwrap_or(0.0);
            let moved = (offset - last_offset).abs() > f64::EPSILON;
            let at_start = offset <= 0.0;
            last_offset = offset;

            let mutated = subscription.take_activity() > 0;
            if mutated {
                // New or removed nodes mean the host is still loading; any
                // progress toward completion is reset.
                quiet_rounds = 0;
                continue;
            }

            if at_start && !moved {
                quiet_rounds += 1;
                if quiet_rounds >= self.config.quiet_rounds_required {
                    completed = true;
                    break;
                }
            } else {
                quiet_rounds = 0;
            }
        }

        drop(subscription);

        let advisory = if completed {
            None
        } else {
            tracing::warn!(
                iterations,
                "scroll iteration ceiling reached before history settled"
            );
            Some(format!(
                "scroll stopped after {iterations} iterations without reaching start of history"
            ))
        };

        let turns_visible_estimate = self.visible_turns().await?;
        tracing::info!(
            completed,
            iterations,
            turns_visible = turns_visible_estimate,
            "history scroll finished"
        );

        Ok(ScrollOutcome {
            completed,
            turns_visible_estimate,
            iterations_performed: iterations,
            advisory,
        })
    }

    /// Poll the loading indicator until it vanishes or the wait ceiling
    /// elapses. The ceiling is a pacing bound, not a failure.
    async fn wait_for_indicator_clear(&self) -> Result<(), HostError> {
        let deadline = Instant::now() + self.config.indicator_wait_max();
        while self
            .page
            .is_visible(&self.selectors.loading_indicator)
            .await?
        {
            if Instant::now() >= deadline {
                tracing::debug!("loading indicator still visible at wait ceiling, continuing");
                break;
            }
            sleep(self.config.indicator_poll()).await;
        }
        Ok(())
    }

    async fn visible_turns(&self) -> Result<usize, HostError> {
        self.page.matching_count(&self.selectors.role_union()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::synthetic::{ScrollEffect, SyntheticPage};

    const PAGE: &str = concat!(
        r#"<html><body><div data-message-author="user">hi</div>"#,
        r#"<div data-message-author="assistant">hello</div></body></html>"#,
    );

    fn fast_config(max_iterations: usize) -> ScrollConfig {
        ScrollConfig {
            step_px: 100.0,
            settle_delay_ms: 1,
            max_iterations,
            quiet_rounds_required: 2,
            indicator_poll_ms: 1,
            indicator_wait_max_ms: 20,
        }
    }

    fn registry() -> SelectorRegistry {
        SelectorRegistry::default()
    }

    #[tokio::test]
    async fn completes_after_two_quiet_rounds_at_start() {
        let page = SyntheticPage::new(PAGE, "u").with_scroll_region(250.0);
        let config = fast_config(50);
        let registry = registry();
        let loader = ScrollLoader::new(&page, &registry, &config);

        let outcome = loader.load_history(None).await.unwrap();

        assert!(outcome.completed);
        assert!(outcome.advisory.is_none());
        // 250 → 150 → 50 → 0 (moved), then two quiet rounds.
        assert_eq!(outcome.iterations_performed, 5);
        assert_eq!(outcome.turns_visible_estimate, 2);
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn mutation_resets_quiet_counter() {
        // Virtualization probe: a net-zero insert+remove still counts as
        // activity and must force at least one extra iteration.
        let baseline_page = SyntheticPage::new(PAGE, "u").with_scroll_region(100.0);
        let config = fast_config(50);
        let registry = registry();
        let baseline = ScrollLoader::new(&baseline_page, &registry, &config)
            .load_history(None)
            .await
            .unwrap();

        let page = SyntheticPage::new(PAGE, "u")
            .with_scroll_region(100.0)
            .queue_scroll_effect(ScrollEffect::quiet())
            // Arrives while already at start-of-history.
            .queue_scroll_effect(ScrollEffect::mutations(2));
        let outcome = ScrollLoader::new(&page, &registry, &config)
            .load_history(None)
            .await
            .unwrap();

        assert!(outcome.completed);
        assert!(outcome.iterations_performed > baseline.iterations_performed);
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn iteration_ceiling_is_advisory_not_fatal() {
        let page = SyntheticPage::new(PAGE, "u").with_scroll_region(1_000_000.0);
        let config = ScrollConfig {
            step_px: 1.0,
            ..fast_config(4)
        };
        let registry = registry();
        let outcome = ScrollLoader::new(&page, &registry, &config)
            .load_history(None)
            .await
            .unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.iterations_performed, 4);
        let advisory = outcome.advisory.unwrap();
        assert!(advisory.contains("4 iterations"));
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn missing_scroll_region_is_soft() {
        let page = SyntheticPage::new(PAGE, "u");
        let config = fast_config(10);
        let registry = registry();
        let outcome = ScrollLoader::new(&page, &registry, &config)
            .load_history(None)
            .await
            .unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.iterations_performed, 0);
        assert!(outcome.advisory.unwrap().contains("no scrollable region"));
        // Content is still countable for the estimate.
        assert_eq!(outcome.turns_visible_estimate, 2);
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn loading_indicator_delays_settling() {
        let page = SyntheticPage::new(PAGE, "u")
            .with_scroll_region(50.0)
            .queue_scroll_effect(ScrollEffect::quiet().with_loading_polls(3));
        let config = fast_config(50);
        let registry = registry();
        let outcome = ScrollLoader::new(&page, &registry, &config)
            .load_history(None)
            .await
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn subscription_released_when_host_errors_mid_loop() {
        // Read 0 succeeds (initial offset), read 1 fails inside the loop.
        let page = SyntheticPage::new(PAGE, "u")
            .with_scroll_region(500.0)
            .fail_scroll_top_at_read(1);
        let config = fast_config(10);
        let registry = registry();
        let result = ScrollLoader::new(&page, &registry, &config)
            .load_history(None)
            .await;

        assert!(result.is_err());
        assert_eq!(page.subscription_count(), 0);
    }

    #[tokio::test]
    async fn reports_scroll_progress() {
        use std::sync::Mutex;
        let events: Mutex<Vec<ProgressUpdate>> = Mutex::new(Vec::new());
        let record = |update: ProgressUpdate| events.lock().unwrap().push(update);

        let page = SyntheticPage::new(PAGE, "u").with_scroll_region(150.0);
        let config = fast_config(50);
        let registry = registry();
        ScrollLoader::new(&page, &registry, &config)
            .load_history(Some(&record))
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(ProgressUpdate::ScrollingHistory { iteration: 1 })
        ));
    }
}
