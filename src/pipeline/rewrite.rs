//! Description rewrite pipeline.
//!
//! Pipeline flow:
//! Source table → candidates (minus processed keys) → batch driver →
//! checkpoint → output table (or partial export on interrupt)

use crate::catalog::{CatalogReader, CatalogWriter, WriteSummary};
use crate::checkpoint::{CheckpointStore, with_suffix};
use crate::generate::Generator;
use crate::models::{Config, Result, RunStats, delay_from_secs};
use crate::pipeline::BatchDriver;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Paths and limits for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    /// Where the source is rewritten if the run is interrupted
    pub partial_output: PathBuf,
    pub limit: Option<usize>,
    pub delay: Duration,
}

impl RunOptions {
    /// Options with default checkpoint and partial-export paths.
    pub fn new(input: &Path, output: &Path, config: &Config) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            checkpoint: CheckpointStore::default_path_for(input),
            partial_output: default_partial_path(input),
            limit: config.batch.limit,
            delay: delay_from_secs(config.batch.delay_secs),
        }
    }
}

/// Default partial-export location: `<input>_partial_export.csv`.
pub fn default_partial_path(input: &Path) -> PathBuf {
    with_suffix(input, "_partial_export.csv")
}

/// Rewrites product descriptions with a generator.
pub struct RewritePipeline<G: Generator> {
    config: Config,
    generator: G,
}

impl<G: Generator> RewritePipeline<G> {
    pub fn new(config: Config, generator: G) -> Self {
        Self { config, generator }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    fn writer(&self) -> CatalogWriter {
        CatalogWriter::new(
            &self.config.catalog.key_column,
            &self.config.catalog.description_column,
            self.config.output.quote_style,
        )
    }

    /// Run one batch.
    ///
    /// An unreadable source table fails before any product is processed.
    /// On cancellation the checkpoint is flushed and the partial export is
    /// written instead of the output table; the returned stats say so.
    pub async fn run(&self, options: &RunOptions, cancel: CancellationToken) -> Result<RunStats> {
        let reader = CatalogReader::new(&options.input, self.config.catalog.clone());
        let mut store = CheckpointStore::open(&options.checkpoint);

        let candidates = reader.candidates(&store.state().processed_keys, options.limit)?;
        info!(
            candidates = candidates.len(),
            completed = store.state().completed_count(),
            limit = ?options.limit,
            "Starting rewrite"
        );

        let pb = ProgressBar::new(candidates.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }

        let driver = BatchDriver::new(&self.generator, options.delay, cancel);
        let mut report = driver.run(&candidates, &mut store, &pb).await;

        if report.interrupted {
            pb.abandon_with_message("interrupted");
            // Failure is already logged by the store.
            if store.persist().is_err() {
                report.persist_failures += 1;
            }
            let summary = self
                .writer()
                .write_rewritten(&options.input, &options.partial_output, &store.state().completed)?;
            warn!(
                completed = store.state().completed_count(),
                rewritten_rows = summary.rows_rewritten,
                path = %options.partial_output.display(),
                "Interrupted, partial export written"
            );
        } else {
            pb.finish_with_message("done");
            self.writer()
                .write_rewritten(&options.input, &options.output, &store.state().completed)?;
        }

        let mut stats = RunStats {
            total_candidates: candidates.len(),
            total_attempted: report.attempted,
            total_completed: report.completed,
            total_failed: report.failed,
            total_skipped: report.skipped,
            persist_failures: report.persist_failures,
            checkpoint_completed: store.state().completed_count(),
            interrupted: report.interrupted,
            cost_usd: self.generator.cost_usd(),
            runtime_secs: report.runtime.as_secs_f64(),
            ..Default::default()
        };
        stats.finalize();
        Ok(stats)
    }
}

/// Write the output table from the checkpoint alone.
pub fn export_checkpoint(
    config: &Config,
    input: &Path,
    output: &Path,
    checkpoint: &Path,
) -> Result<WriteSummary> {
    let store = CheckpointStore::open(checkpoint);
    CatalogWriter::new(
        &config.catalog.key_column,
        &config.catalog.description_column,
        config.output.quote_style,
    )
    .write_rewritten(input, output, &store.state().completed)
}

/// Write every row of the next `limit` unprocessed products to `output`.
///
/// Returns the selected keys in file order.
pub fn extract_next(
    config: &Config,
    input: &Path,
    output: &Path,
    checkpoint: &Path,
    limit: usize,
) -> Result<Vec<String>> {
    let store = CheckpointStore::open(checkpoint);
    let reader = CatalogReader::new(input, config.catalog.clone());
    let keys: Vec<String> = reader
        .candidates(&store.state().processed_keys, Some(limit))?
        .into_iter()
        .map(|p| p.key)
        .collect();

    let selected: HashSet<String> = keys.iter().cloned().collect();
    CatalogWriter::new(
        &config.catalog.key_column,
        &config.catalog.description_column,
        config.output.quote_style,
    )
    .write_extract(input, output, &selected)?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationError, ProductRecord};
    use std::fs;
    use tempfile::TempDir;

    struct Upcase;

    impl Generator for Upcase {
        async fn generate(&self, product: &ProductRecord) -> std::result::Result<String, GenerationError> {
            Ok(product.description.to_uppercase())
        }
    }

    /// Upper-cases descriptions and cancels the run after the first one.
    struct UpcaseOnce {
        cancel: CancellationToken,
    }

    impl Generator for UpcaseOnce {
        async fn generate(&self, product: &ProductRecord) -> std::result::Result<String, GenerationError> {
            self.cancel.cancel();
            Ok(product.description.to_uppercase())
        }
    }

    const SOURCE: &str = "Handle,Title,Body (HTML)\n\
a,A,<p>a</p>\n\
b,B,<p>b</p>\n\
b,,\n\
c,C,<p>c</p>\n";

    fn setup() -> (TempDir, RunOptions) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("products.csv");
        fs::write(&input, SOURCE).unwrap();
        let mut config = Config::default();
        config.batch.delay_secs = 0.0;
        let options = RunOptions::new(&input, &dir.path().join("out.csv"), &config);
        (dir, options)
    }

    fn necessary_quotes() -> Config {
        let mut config = Config::default();
        config.output.quote_style = crate::models::QuoteStyle::Necessary;
        config
    }

    #[test]
    fn test_default_paths() {
        let (dir, options) = setup();
        assert_eq!(options.checkpoint, dir.path().join("products.csv.progress.json"));
        assert_eq!(
            options.partial_output,
            dir.path().join("products.csv_partial_export.csv")
        );
    }

    #[tokio::test]
    async fn test_run_writes_output_and_checkpoint() {
        let (_dir, mut options) = setup();
        options.limit = Some(2);
        let pipeline = RewritePipeline::new(necessary_quotes(), Upcase);

        let stats = pipeline.run(&options, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.total_completed, 2);
        assert!(!stats.interrupted);
        assert_eq!(
            fs::read_to_string(&options.output).unwrap(),
            "Handle,Title,Body (HTML)\na,A,<P>A</P>\nb,B,<P>B</P>\nb,,<P>B</P>\nc,C,<p>c</p>\n"
        );

        // Second run only picks up what is left.
        let stats = pipeline.run(&options, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.total_candidates, 1);
        assert_eq!(stats.checkpoint_completed, 3);
    }

    #[tokio::test]
    async fn test_interrupted_run_writes_partial_export() {
        let (_dir, options) = setup();
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = RewritePipeline::new(necessary_quotes(), Upcase);

        let stats = pipeline.run(&options, token).await.unwrap();
        assert!(stats.interrupted);
        assert!(!options.output.exists());
        assert_eq!(fs::read_to_string(&options.partial_output).unwrap(), SOURCE);
    }

    #[tokio::test]
    async fn test_interrupt_after_first_product_exports_it() {
        let (_dir, options) = setup();
        let token = CancellationToken::new();
        let generator = UpcaseOnce {
            cancel: token.clone(),
        };
        let pipeline = RewritePipeline::new(necessary_quotes(), generator);

        let stats = pipeline.run(&options, token).await.unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.checkpoint_completed, 1);
        assert!(!options.output.exists());
        assert_eq!(
            fs::read_to_string(&options.partial_output).unwrap(),
            "Handle,Title,Body (HTML)\na,A,<P>A</P>\nb,B,<p>b</p>\nb,,\nc,C,<p>c</p>\n"
        );

        let store = CheckpointStore::open(&options.checkpoint);
        assert_eq!(store.state().completed.get("a").map(String::as_str), Some("<P>A</P>"));
    }

    #[tokio::test]
    async fn test_final_persist_failure_is_counted() {
        let (dir, mut options) = setup();
        options.checkpoint = dir.path().join("missing").join("products.progress.json");
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = RewritePipeline::new(necessary_quotes(), Upcase);

        let stats = pipeline.run(&options, token).await.unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.persist_failures, 1);
        assert!(options.partial_output.exists());
    }

    #[test]
    fn test_extract_next_skips_processed() {
        let (dir, options) = setup();
        let mut store = CheckpointStore::open(&options.checkpoint);
        store.record("a", "<p>A</p>".to_string()).unwrap();

        let extract = dir.path().join("next.csv");
        let keys = extract_next(
            &Config::default(),
            &options.input,
            &extract,
            &options.checkpoint,
            1,
        )
        .unwrap();

        assert_eq!(keys, vec!["b"]);
        assert_eq!(
            fs::read_to_string(&extract).unwrap(),
            "Handle,Title,Body (HTML)\nb,B,<p>b</p>\nb,,\n"
        );
    }

    #[test]
    fn test_export_from_checkpoint() {
        let (_dir, options) = setup();
        let mut store = CheckpointStore::open(&options.checkpoint);
        store.record("c", "<p>C!</p>".to_string()).unwrap();

        let summary =
            export_checkpoint(&necessary_quotes(), &options.input, &options.output, &options.checkpoint)
                .unwrap();
        assert_eq!(summary.rows_rewritten, 1);
        assert!(fs::read_to_string(&options.output).unwrap().ends_with("c,C,<p>C!</p>\n"));
    }
}
