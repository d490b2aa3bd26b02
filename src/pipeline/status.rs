//! Progress report for a source table and its checkpoint.

use crate::catalog::CatalogReader;
use crate::checkpoint::CheckpointStore;
use crate::models::{Config, Result};
use std::path::Path;

/// Where a catalog stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub total_rows: usize,
    pub unique_products: usize,
    pub completed: usize,
    pub processed: usize,
    /// Processed keys without content
    pub stale: Vec<String>,
    /// Products not yet processed
    pub remaining: usize,
    /// The next products a run would pick, in file order
    pub next: Vec<String>,
}

impl StatusReport {
    /// Survey `input` against the checkpoint at `checkpoint`.
    pub fn gather(config: &Config, input: &Path, checkpoint: &Path, show: usize) -> Result<Self> {
        let store = CheckpointStore::open(checkpoint);
        let state = store.state();
        let survey = CatalogReader::new(input, config.catalog.clone()).survey()?;

        Ok(Self {
            total_rows: survey.total_rows,
            unique_products: survey.product_keys.len(),
            completed: state.completed_count(),
            processed: state.processed_keys.len(),
            stale: state.stale_keys().map(str::to_string).collect(),
            remaining: survey.remaining(&state.processed_keys).count(),
            next: survey
                .remaining(&state.processed_keys)
                .take(show)
                .map(str::to_string)
                .collect(),
        })
    }

    /// Completed share of unique products, in percent.
    pub fn percent_complete(&self) -> f64 {
        if self.unique_products == 0 {
            0.0
        } else {
            self.completed as f64 / self.unique_products as f64 * 100.0
        }
    }
}
