//! catalog-scribe CLI - resumable LLM rewriting of Shopify product descriptions.

use anyhow::{Context, Result, bail};
use catalog_scribe::models::check_delay;
use catalog_scribe::pipeline::{StatusReport, export_checkpoint, extract_next};
use catalog_scribe::{
    CheckpointStore, Config, LlmClient, ProductDescriber, RewritePipeline, RunOptions, RunStats,
};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "catalog-scribe")]
#[command(version)]
#[command(about = "Resumable LLM rewriting of product descriptions in a Shopify export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults are used when it does not exist)
    #[arg(short, long, global = true, default_value = "catalog-scribe.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite descriptions for the next batch of unprocessed products
    Run {
        /// Source product export (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Output table with rewritten descriptions
        #[arg(short, long)]
        output: PathBuf,

        /// Maximum number of products to process in this run
        #[arg(short, long)]
        limit: Option<usize>,

        /// Checkpoint file [default: <input>.progress.json]
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Partial export written on interrupt [default: <input>_partial_export.csv]
        #[arg(long)]
        partial_output: Option<PathBuf>,

        /// Seconds to wait between products
        #[arg(long)]
        delay_secs: Option<f64>,
    },

    /// Show progress against a source table
    Status {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Number of upcoming products to list
        #[arg(long, default_value = "10")]
        show: usize,
    },

    /// Delete the checkpoint and start over
    Reset {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Drop processed keys that have no generated content
    Reconcile {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Write the output table from the checkpoint alone
    Export {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Copy every row of the next unprocessed products to a separate table
    Extract {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

const EXAMPLE_CONFIG: &str = r#"# catalog-scribe configuration file

[llm]
# API key (can also use the variable named by api_key_env)
# api_key = "${OPENAI_API_KEY}"
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 120
max_retries = 3

[research]
id = "gpt-4o-2024-11-20"
max_tokens = 1500
temperature = 0.7
input_price_per_1m = 2.5
output_price_per_1m = 10.0

[writer]
id = "gpt-4o-2024-11-20"
max_tokens = 2000
temperature = 0.8
input_price_per_1m = 2.5
output_price_per_1m = 10.0

[catalog]
key_column = "Handle"
name_column = "Title"
description_column = "Body (HTML)"
vendor_column = "Vendor"
tags_column = "Tags"
metafields = [
    { label = "longevity", column = "Longevity" },
    { label = "sillage", column = "Sillage" },
]

[batch]
delay_secs = 2.0
# limit = 10
fallback_on_error = false

[community]
enabled = true
base_url = "https://www.reddit.com"
subreddit = "fragrance"
keywords = ["perfume", "fragrance", "cologne", "eau de", "parfum", "oil", "scent"]
min_upvotes = 5
max_quotes = 5
request_delay_secs = 1.0

[output]
quote_style = "always"  # or "necessary"
store_url = "https://example.com"
"#;

fn print_example_config() {
    println!("{EXAMPLE_CONFIG}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_or_default(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn checkpoint_path(input: Option<&Path>, checkpoint: Option<PathBuf>) -> Result<PathBuf> {
    match (checkpoint, input) {
        (Some(path), _) => Ok(path),
        (None, Some(input)) => Ok(CheckpointStore::default_path_for(input)),
        (None, None) => bail!("Pass --input or --checkpoint"),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Received shutdown signal, finishing up");
    token.cancel();
}

fn print_run_summary(stats: &RunStats, destination: &Path) {
    if stats.interrupted {
        println!("\n=== Rewrite Interrupted ===");
    } else {
        println!("\n=== Rewrite Complete ===");
    }
    println!("Candidates:  {}", stats.total_candidates);
    println!("Attempted:   {}", stats.total_attempted);
    println!("Completed:   {}", stats.total_completed);
    println!("Failed:      {}", stats.total_failed);
    println!("Skipped:     {}", stats.total_skipped);
    if stats.persist_failures > 0 {
        println!("Unsaved:     {} checkpoint writes failed", stats.persist_failures);
    }
    println!("Success:     {:.1}%", stats.success_rate * 100.0);
    println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
    println!("Cost:        ${:.4}", stats.cost_usd);
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    println!("In total:    {} products rewritten", stats.checkpoint_completed);
    println!("Output:      {destination:?}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Endpoint: {}", config.llm.base_url);
            info!("  Research model: {}", config.research.id);
            info!("  Writer model: {}", config.writer.id);
            info!(
                "  Community quotes: {}",
                if config.community.enabled {
                    format!("r/{}", config.community.subreddit)
                } else {
                    "disabled".to_string()
                }
            );
            info!("  Delay: {}s", config.batch.delay_secs);
        }

        Commands::Run {
            input,
            output,
            limit,
            checkpoint,
            partial_output,
            delay_secs,
        } => {
            let config = load_config(&cli.config)?;
            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let mut options = RunOptions::new(&input, &output, &config);
            if let Some(limit) = limit {
                if limit == 0 {
                    bail!("--limit must be at least 1");
                }
                options.limit = Some(limit);
            }
            if let Some(path) = checkpoint {
                options.checkpoint = path;
            }
            if let Some(path) = partial_output {
                options.partial_output = path;
            }
            if let Some(secs) = delay_secs {
                check_delay("--delay-secs", secs)?;
                options.delay = Duration::from_secs_f64(secs);
            }

            let client = LlmClient::new(&config.llm, api_key).context("Failed to build client")?;
            let describer =
                ProductDescriber::new(&config, client).context("Failed to build describer")?;
            let pipeline = RewritePipeline::new(config, describer);

            let cancel = CancellationToken::new();
            let listener = tokio::spawn(shutdown_signal(cancel.clone()));

            let result = pipeline.run(&options, cancel).await;
            listener.abort();
            let stats = result.with_context(|| format!("Rewrite of {input:?} failed"))?;

            let (tokens_in, tokens_out) = pipeline.generator().client().total_tokens();
            info!(tokens_in, tokens_out, "Token usage");

            let destination = if stats.interrupted {
                &options.partial_output
            } else {
                &options.output
            };
            print_run_summary(&stats, destination);
        }

        Commands::Status {
            input,
            checkpoint,
            show,
        } => {
            let config = load_config(&cli.config)?;
            let checkpoint = checkpoint_path(Some(&input), checkpoint)?;
            let report = StatusReport::gather(&config, &input, &checkpoint, show)
                .with_context(|| format!("Failed to read {input:?}"))?;

            println!("\n=== Status ===");
            println!("Rows:        {}", report.total_rows);
            println!("Products:    {}", report.unique_products);
            println!(
                "Completed:   {} ({:.1}%)",
                report.completed,
                report.percent_complete()
            );
            println!("Processed:   {}", report.processed);
            println!("Stale:       {}", report.stale.len());
            println!("Remaining:   {}", report.remaining);
            println!("Checkpoint:  {checkpoint:?}");
            if !report.stale.is_empty() {
                println!("\nStale keys (run `reconcile` to repair):");
                for key in &report.stale {
                    println!("  {key}");
                }
            }
            if !report.next.is_empty() {
                println!("\nNext {}:", report.next.len());
                for (i, key) in report.next.iter().enumerate() {
                    println!("  {:>3}. {key}", i + 1);
                }
            }
        }

        Commands::Reset {
            input,
            checkpoint,
            yes,
        } => {
            let path = checkpoint_path(input.as_deref(), checkpoint)?;
            let mut store = CheckpointStore::open(&path);
            let completed = store.state().completed_count();

            if !yes && !confirm(&format!("Delete {completed} generated descriptions in {path:?}?"))? {
                println!("Aborted");
                return Ok(());
            }
            store.reset().context("Failed to reset checkpoint")?;
            println!("Checkpoint reset: {path:?}");
        }

        Commands::Reconcile { input, checkpoint } => {
            let path = checkpoint_path(input.as_deref(), checkpoint)?;
            let mut store = CheckpointStore::open(&path);
            let removed = store.reconcile().context("Failed to save reconciled checkpoint")?;

            if removed.is_empty() {
                println!("Checkpoint is consistent, nothing to repair");
            } else {
                println!("Removed {} stale processed keys:", removed.len());
                for key in &removed {
                    println!("  {key}");
                }
            }
            println!(
                "Completed: {}, processed: {}",
                store.state().completed_count(),
                store.state().processed_keys.len()
            );
        }

        Commands::Export {
            input,
            output,
            checkpoint,
        } => {
            let config = load_config(&cli.config)?;
            let checkpoint = checkpoint_path(Some(&input), checkpoint)?;
            let summary = export_checkpoint(&config, &input, &output, &checkpoint)
                .with_context(|| format!("Failed to export {input:?}"))?;
            println!(
                "Exported {} rows ({} rewritten) to {output:?}",
                summary.rows_written, summary.rows_rewritten
            );
        }

        Commands::Extract {
            input,
            output,
            limit,
            checkpoint,
        } => {
            if limit == 0 {
                bail!("--limit must be at least 1");
            }
            let config = load_config(&cli.config)?;
            let checkpoint = checkpoint_path(Some(&input), checkpoint)?;
            let keys = extract_next(&config, &input, &output, &checkpoint, limit)
                .with_context(|| format!("Failed to extract from {input:?}"))?;

            println!("Extracted {} products to {output:?}:", keys.len());
            for (i, key) in keys.iter().enumerate() {
                println!("  {:>3}. {key}", i + 1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.catalog.metafields.len(), 2);
        assert!(config.community.enabled);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "catalog-scribe",
            "run",
            "--input",
            "products.csv",
            "--output",
            "out.csv",
            "--limit",
            "10",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run { limit: Some(10), .. }));
    }

    #[test]
    fn test_checkpoint_path_resolution() {
        let path = checkpoint_path(Some(Path::new("products.csv")), None).unwrap();
        assert_eq!(path, PathBuf::from("products.csv.progress.json"));
        assert!(checkpoint_path(None, None).is_err());
    }
}
