use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cptrack_adapters::{extractor_for_source, ExtractContext};
use cptrack_core::{normalize_identifier, Source};
use cptrack_storage::{CaptureStore, HttpFetcher, PgStudentStore, StudentStore};
use cptrack_sync::{load_source_settings, normalize, Refresher, Scheduler, SyncConfig, TickMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cptrack")]
#[command(about = "Competitive-programming profile tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh one student's record for one source.
    Refresh { roll_number: String, source: Source },
    /// Run a single scheduler tick for a source.
    Tick {
        source: Source,
        /// Ignore the cadence filter.
        #[arg(long)]
        full: bool,
    },
    /// Start the per-source loops and the daily full refresh.
    Run,
    /// Apply database migrations.
    Migrate,
    /// Print the canonical handle and URL for a username or profile link.
    Identify { source: Source, input: String },
    /// Fetch one profile, storing every raw body under the capture directory.
    Capture {
        source: Source,
        input: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CPTRACK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn StudentStore>> {
    let store = PgStudentStore::connect(&config.database_url)
        .await
        .context("connecting to the student store")?;
    Ok(Arc::new(store))
}

async fn build_scheduler(config: &SyncConfig) -> Result<Arc<Scheduler>> {
    let settings = load_source_settings(&config.sources_file).await?;
    let store = connect_store(config).await?;
    let refresher = Refresher::from_config(config, store, &settings)?;
    Ok(Arc::new(Scheduler::new(Arc::new(refresher), settings)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Refresh { roll_number, source } => {
            let settings = load_source_settings(&config.sources_file).await?;
            let store = connect_store(&config).await?;
            let refresher = Refresher::from_config(&config, store, &settings)?;
            let outcome = refresher
                .refresh(&roll_number, source)
                .await
                .with_context(|| format!("refreshing {roll_number} on {source}"))?;
            println!("{roll_number} {source}: {outcome:?}");
        }
        Commands::Tick { source, full } => {
            let scheduler = build_scheduler(&config).await?;
            let mode = if full { TickMode::Full } else { TickMode::Cadence };
            let summary = scheduler.tick(source, mode).await?;
            println!(
                "tick complete: run_id={} source={} mode={} eligible={} refreshed={} stale={} failed={}",
                summary.run_id, summary.source, summary.mode, summary.eligible, summary.refreshed, summary.stale, summary.failed
            );
        }
        Commands::Run => {
            let scheduler = build_scheduler(&config).await?;
            let loops = scheduler.spawn();
            let cron = if config.scheduler_enabled {
                let (hour, minute) = config.daily_refresh_time()?;
                let cron = scheduler.daily_job(hour, minute).await?;
                cron.start().await.context("starting daily refresh job")?;
                info!(hour, minute, "daily full refresh scheduled");
                Some(cron)
            } else {
                None
            };

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down");
            scheduler.shutdown();
            if let Some(mut cron) = cron {
                cron.shutdown().await.context("stopping daily refresh job")?;
            }
            for handle in loops {
                let _ = handle.await;
            }
        }
        Commands::Migrate => {
            let store = PgStudentStore::connect(&config.database_url)
                .await
                .context("connecting to the student store")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Identify { source, input } => {
            let id = normalize_identifier(source, &input)?;
            println!("{}\t{}", id.handle, id.canonical_url);
        }
        Commands::Capture { source, input, dir } => {
            let dir = dir
                .or_else(|| config.capture_dir.clone())
                .unwrap_or_else(|| PathBuf::from("captures"));
            let http = HttpFetcher::new(config.http_config()).context("building http client")?;
            let mut ctx = ExtractContext::new(Arc::new(http));
            ctx.browser = config.browser_config();
            ctx.github_token = config.github_token.clone();
            ctx.capture = Some(CaptureStore::new(&dir));

            let options = config.extract_options();
            let draft = extractor_for_source(source)
                .extract_input(&ctx, &input, &options)
                .await
                .with_context(|| format!("extracting {source} profile {input}"))?;
            let record = normalize(draft, &options, chrono::Utc::now());
            let fields = record.to_fields().context("serializing record")?;
            println!("{}", serde_json::to_string_pretty(&fields)?);
            eprintln!("raw bodies stored under {}", dir.display());
        }
    }

    Ok(())
}
