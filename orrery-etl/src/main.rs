//! orrery - pipeline command-line interface
//!
//! `ingest` loads NDJSON batches (a file or a directory of files),
//! `report` prints segments, top customers, and recent alerts, and
//! `generate` writes a synthetic batch for demos.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use orrery_etl::db::queries::Queries;
use orrery_etl::gen::GeneratorOptions;
use orrery_etl::ingest::pipeline;
use orrery_etl::{IngestOutcome, PipelineConfig, PipelineContext};

#[derive(Parser)]
#[command(name = "orrery", version, about = "E-commerce event analytics pipeline")]
struct Cli {
    /// Configuration file (falls back to ORRERY_CONFIG, then the
    /// platform default location)
    #[arg(long, global = true)]
    config: Option<String>,

    /// SQLite database file
    #[arg(long, global = true, env = "ORRERY_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest an NDJSON file or a directory of batch files
    Ingest {
        /// File or directory to load
        path: PathBuf,
    },
    /// Print segment distribution, top customers, and recent alerts
    Report {
        /// Number of top customers to show
        #[arg(long, default_value_t = 10)]
        top: i64,
    },
    /// Write a synthetic order batch
    Generate {
        /// Output NDJSON file
        output: PathBuf,
        #[arg(long, default_value_t = 1000)]
        orders: usize,
        #[arg(long, default_value_t = 100)]
        customers: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fraction of deliberately broken records
        #[arg(long, default_value_t = 0.0)]
        invalid_fraction: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("orrery {}", env!("CARGO_PKG_VERSION"));

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| orrery_common::config::default_data_dir().join("orrery.db"));

    match cli.command {
        Command::Ingest { path } => {
            let config = PipelineConfig::load(cli.config.as_deref())?;
            let pool = orrery_etl::db::init_database_pool(&db_path).await?;
            let ctx = PipelineContext::new(pool, config)?;

            // Ctrl-C aborts in-flight work before commit
            let cancel = ctx.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling");
                    cancel.cancel();
                }
            });

            let outcomes = if path.is_dir() {
                pipeline::ingest_directory(Arc::clone(&ctx), &path).await?
            } else {
                vec![pipeline::ingest_file(&ctx, &path).await?]
            };

            for outcome in &outcomes {
                match outcome {
                    IngestOutcome::Loaded(summary) => println!(
                        "{}  {:?}  loaded={} failed={}",
                        summary.source_id, summary.status, summary.rows_loaded, summary.rows_failed
                    ),
                    IngestOutcome::Skipped {
                        source_id,
                        prior_attempt,
                        ..
                    } => println!("{}  skipped (already loaded as {})", source_id, prior_attempt),
                }
            }
        }

        Command::Report { top } => {
            let pool = orrery_etl::db::init_database_pool(&db_path).await?;
            let queries = Queries::new(pool);

            println!("Segments:");
            for row in queries.segment_distribution().await? {
                println!(
                    "  {:<10} {:>6} customers  avg LTV {:>10.2}",
                    row.segment, row.customer_count, row.avg_lifetime_value
                );
            }

            println!("\nTop {} customers by lifetime value:", top);
            for row in queries.top_customers_by_ltv(top).await? {
                println!(
                    "  {:<16} {:<10} LTV {:>10.2}  orders {}",
                    row.customer_key, row.segment, row.lifetime_value, row.frequency_count
                );
            }

            println!("\nRecent alerts:");
            for row in queries.recent_alerts(20).await? {
                println!(
                    "  {}  {:<18} value {:>12.2}  score {:>6.2}  ({})",
                    row.observed_at.format("%Y-%m-%d"),
                    row.series_key,
                    row.value,
                    row.score,
                    row.method
                );
            }
        }

        Command::Generate {
            output,
            orders,
            customers,
            seed,
            invalid_fraction,
        } => {
            let options = GeneratorOptions {
                orders,
                customers,
                seed,
                invalid_fraction,
                ..GeneratorOptions::default()
            };
            let written = orrery_etl::gen::write_batch_file(&output, &options, Utc::now()).await?;
            println!("Wrote {} orders to {}", written, output.display());
        }
    }

    Ok(())
}
