//! Sequential batch driver.
//!
//! One product at a time, in candidate order:
//! skip if already completed, generate, record, wait, repeat.
//! Cancellation is checked between items and raced against the in-flight
//! generation and the inter-item delay.

use crate::checkpoint::CheckpointStore;
use crate::generate::Generator;
use crate::models::{ProductRecord, ScribeError};
use indicatif::ProgressBar;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one pass over a candidate batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Generation calls started (including one dropped by cancellation)
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Candidates that already had content
    pub skipped: usize,
    pub persist_failures: usize,
    pub interrupted: bool,
    pub runtime: Duration,
}

/// Drives a generator over candidates and records results.
pub struct BatchDriver<'a, G: Generator> {
    generator: &'a G,
    delay: Duration,
    cancel: CancellationToken,
}

impl<'a, G: Generator> BatchDriver<'a, G> {
    pub fn new(generator: &'a G, delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            generator,
            delay,
            cancel,
        }
    }

    /// Process `candidates` in order, recording each success in `store`.
    ///
    /// Generation failures are logged and counted; the product stays
    /// unprocessed so a later run picks it up again.
    pub async fn run(
        &self,
        candidates: &[ProductRecord],
        store: &mut CheckpointStore,
        progress: &ProgressBar,
    ) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::default();

        for product in candidates {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            if store.is_completed(&product.key) {
                debug!(key = %product.key, "Already completed, skipping");
                report.skipped += 1;
                progress.inc(1);
                continue;
            }

            if report.attempted > 0 && !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }

            progress.set_message(product.display_name.clone());
            report.attempted += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.generator.generate(product) => Some(result),
            };

            match outcome {
                None => {
                    info!(key = %product.key, "Interrupted, in-flight generation dropped");
                    report.interrupted = true;
                    break;
                }
                Some(Ok(content)) => {
                    // No await between the mutation and its persist.
                    if store.record(&product.key, content).is_err() {
                        report.persist_failures += 1;
                    }
                    report.completed += 1;
                    debug!(key = %product.key, "Recorded");
                }
                Some(Err(source)) => {
                    let err = ScribeError::Generation {
                        key: product.key.clone(),
                        source,
                    };
                    warn!(error = %err, "Skipping product");
                    report.failed += 1;
                }
            }
            progress.inc(1);
        }

        report.runtime = start.elapsed();
        info!(
            attempted = report.attempted,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            interrupted = report.interrupted,
            "Batch finished"
        );
        report
    }
}
