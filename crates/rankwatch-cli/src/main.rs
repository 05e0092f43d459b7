use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rankwatch_ingest::IngestConfig;
use rankwatch_provider::{BackoffPolicy, HttpRankProvider, ProviderConfig, RankProvider, TokenBucket};
use rankwatch_storage::{PgStore, RankStore};
use rankwatch_web::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rankwatch")]
#[command(about = "Keyword ranking ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ranking ingestion pass and print the summary.
    Ingest,
    /// Run one search-volume refresh pass.
    Volume,
    /// Serve the HTTP API (and the cron scheduler when enabled).
    Serve,
    /// Apply the Postgres schema.
    Migrate,
}

fn build_provider(config: &IngestConfig) -> Result<Arc<dyn RankProvider>> {
    let provider = HttpRankProvider::new(ProviderConfig {
        base_url: config.provider_base_url.clone(),
        login: config.provider_login.clone(),
        password: config.provider_password.clone(),
        depth: config.serp_depth,
        timeout: Duration::from_secs(config.http_timeout_secs),
        backoff: BackoffPolicy::default(),
    })
    .context("building provider client")?
    .with_rate_limiter(Arc::new(TokenBucket::new(10, Duration::from_secs(1))));
    Ok(Arc::new(provider))
}

async fn connect_store(config: &IngestConfig) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Ingest => {
            let store = connect_store(&config).await?;
            let provider = build_provider(&config)?;
            let summary =
                rankwatch_ingest::run_rankings_once(store.as_ref(), provider.as_ref(), &config)
                    .await?;
            println!(
                "ingestion complete: run_id={} trackers={} keywords={} rankings={} errors={}",
                summary.run_id,
                summary.trackers_processed,
                summary.total_keywords,
                summary.rankings_recorded,
                summary.errors.len()
            );
            for error in &summary.errors {
                eprintln!("  {error}");
            }
        }
        Commands::Volume => {
            let store = connect_store(&config).await?;
            let provider = build_provider(&config)?;
            let summary =
                rankwatch_ingest::run_volume_once(store.as_ref(), provider.as_ref(), &config)
                    .await?;
            println!(
                "volume refresh complete: run_id={} trackers={} updated={} errors={}",
                summary.run_id,
                summary.trackers_processed,
                summary.updated_keywords,
                summary.errors.len()
            );
            for error in &summary.errors {
                eprintln!("  {error}");
            }
        }
        Commands::Serve => {
            let store = connect_store(&config).await?;
            let provider = build_provider(&config)?;

            let store_dyn: Arc<dyn RankStore> = store;
            let mut scheduler = rankwatch_ingest::build_scheduler(
                store_dyn.clone(),
                provider.clone(),
                config.clone(),
            )
            .await?;
            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.start().await.context("starting scheduler")?;
            }

            let state = AppState {
                store: store_dyn,
                provider,
                ingest: config,
                cron_secret: std::env::var("CRON_SECRET").ok(),
            };
            rankwatch_web::serve_from_env(state).await?;
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("applying schema")?;
            println!("schema applied");
        }
    }

    Ok(())
}
