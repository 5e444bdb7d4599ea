//! Register Importer Main Entry Point
//!
//! This is the main binary for the register importer. It downloads a
//! register feed, stages and normalizes its rows, and loads them into
//! Postgres inside a single transaction, recording the run in the
//! `import_runs` table.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use register_importer::{Dependencies, ImportError};
use register_importer::feeds::{self, FeedName};
use register_importer_pipeline::orchestrator::{ImportOptions, Orchestrator};
use register_importer_repository::RunLogRepository;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "register-importer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one feed and load it into the database.
    Import {
        /// The feed to import.
        #[arg(value_enum)]
        feed: FeedName,
        /// Import only the first N distinct entities, for development
        /// against a small database.
        #[arg(long)]
        sample: Option<usize>,
        /// Bypass the download cache and fetch fresh files.
        #[arg(long)]
        no_cache: bool,
    },
    /// Mark runs stuck in `running` status as failed.
    CleanRuns {
        /// Age in hours after which a running run counts as stuck.
        #[arg(long, default_value_t = 24)]
        stale_hours: i64,
    },
}

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "register_importer=info,register_importer_pipeline=info,register_importer_repository=info,feedfetch=info",
        )
    });

    if env::var("LOG_JSON").is_ok() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    info!(
        service_name = "register-importer",
        service_version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
}

#[tokio::main]
async fn main() -> Result<(), ImportError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let dependencies = Dependencies::new().await?;

    match cli.command {
        Command::Import {
            feed,
            sample,
            no_cache,
        } => import(&dependencies, feed, sample, no_cache).await,
        Command::CleanRuns { stale_hours } => {
            let swept = dependencies.run_log.sweep_stale(stale_hours).await?;
            info!(swept, stale_hours, "swept stale runs");
            Ok(())
        }
    }
}

async fn import(
    dependencies: &Dependencies,
    feed: FeedName,
    sample: Option<usize>,
    no_cache: bool,
) -> Result<(), ImportError> {
    let cmd_options = format!(
        "feed={} sample={} no_cache={}",
        feed.as_str(),
        sample.map_or_else(|| "none".to_string(), |n| n.to_string()),
        no_cache
    );
    let run = dependencies.run_log.start_run("import", &cmd_options).await?;
    info!(run_id = run.id, feed = feed.as_str(), "run started");

    let mut handler = feeds::handler(feed, dependencies);
    let fetcher = dependencies.fetcher(handler.spec(), feed.insecure_fallback(), no_cache);
    let orchestrator = Orchestrator::new(&dependencies.register, fetcher.as_ref());
    let options = ImportOptions { sample };

    match orchestrator.run(handler.as_mut(), &options).await {
        Ok(summary) => {
            let run_log = &dependencies.run_log;
            run_log
                .append_log(
                    run.id,
                    &format!(
                        "files={} rows={} sampled_out={} skipped_stale={}",
                        summary.files,
                        summary.rows_read,
                        summary.rows_sampled_out,
                        summary.skipped_stale
                    ),
                )
                .await?;
            let mut tables: Vec<_> = summary.written.iter().collect();
            tables.sort();
            for (table, written) in tables {
                let restored = summary.restored_stale.get(table).copied().unwrap_or(0);
                run_log
                    .append_log(run.id, &format!("{table}: written={written} restored_stale={restored}"))
                    .await?;
            }
            run_log.complete_run(run.id).await?;
            info!(run_id = run.id, feed = feed.as_str(), "run completed");
            Ok(())
        }
        Err(e) => {
            error!(run_id = run.id, feed = feed.as_str(), error = %e, "run failed");
            dependencies.run_log.fail_run(run.id, &e.to_string()).await?;
            Err(e.into())
        }
    }
}
