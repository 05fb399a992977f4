//! # Local News Aggregator
//!
//! Scrapes local news from RSS/Atom feeds, static HTML listing pages and a
//! text mirror of a social network, normalizes every item into one article
//! shape, deduplicates by URL and serves the result as JSON.
//!
//! ## Features
//!
//! - Three extractors behind one [`scrapers::Extractor`] enum, chosen per source
//! - Polite fetching: fixed bot identity, hard timeout, mandatory post-fetch delay
//! - Keyword categories and place-name/hashtag tags
//! - Idempotent upsert by URL into SQLite
//! - Single-flight runs: full, selected (with timeout and article cap) or single
//! - HTTP read API and run triggers, plus calendar-scheduled runs
//!
//! ## Usage
//!
//! ```sh
//! local_news_aggregator --config config.yaml run
//! local_news_aggregator serve --bind 0.0.0.0:3000
//! ```
//!
//! ## Architecture
//!
//! Data flows one way: registry → orchestrator → extractor (via fetcher) →
//! normalizer → store → run ledger. The HTTP layer and the scheduler only call
//! into the orchestrator and read from the store.

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod fetcher;
mod ledger;
mod models;
mod normalize;
mod orchestrator;
mod scheduler;
mod scrapers;
mod server;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use cli::{Cli, Command};
use config::Config;
use fetcher::polite_http_fetcher;
use models::{ArticleFilter, Category};
use orchestrator::{Orchestrator, RunOptions};
use server::AppState;
use store::{SqliteStore, Store, sync_registry};
use utils::{ensure_parent_dir, retention_cutoff};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("local_news_aggregator starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), command = ?args.command, "Parsed CLI arguments");

    let mut config = Config::load(&args.config)?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    ensure_parent_dir(&config.database_path).await?;
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    sync_registry(store.as_ref(), &config.sources).await?;

    let fetcher = Arc::new(polite_http_fetcher(&config.fetch)?);
    let orchestrator = Orchestrator::new(
        fetcher,
        store.clone(),
        config.mirror_instances.clone(),
        config.ledger_capacity,
    );

    match args.command {
        Command::Run => print_json(&orchestrator.run_all().await?)?,
        Command::RunSelected {
            source_ids,
            timeout_secs,
            max_articles,
        } => {
            let options = RunOptions {
                timeout: timeout_secs.map(Duration::from_secs),
                max_articles,
            };
            let result = orchestrator.run_selected(&source_ids, options).await?;
            print_json(&result)?;
            if result.timed_out {
                // Give the in-flight source its chance to land before the runtime exits.
                while orchestrator.is_running() {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
        Command::RunSingle { source_id } => print_json(&orchestrator.run_single(source_id).await?)?,
        Command::Sources => print_json(&store.list_sources().await?)?,
        Command::Articles {
            category,
            tag,
            limit,
        } => {
            let filter = ArticleFilter {
                category: category.map(|c| c.parse::<Category>()).transpose()?,
                tag,
                limit: Some(limit),
                ..ArticleFilter::default()
            };
            print_json(&store.query_articles(&filter).await?)?;
        }
        Command::Purge { days } => {
            let days = days.unwrap_or(config.retention_days);
            let cutoff = retention_cutoff(Utc::now(), days)
                .ok_or_else(|| format!("retention of {days} days is out of range"))?;
            let removed = store.purge_articles_older_than(cutoff).await?;
            info!(removed, days, %cutoff, "Retention sweep finished");
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let scheduler =
                scheduler::build_scheduler(orchestrator.clone(), &config.schedule).await?;
            scheduler.start().await?;
            info!("Scheduler started");

            let state = Arc::new(AppState {
                orchestrator,
                store,
            });
            server::serve(state, &bind).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Execution complete"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
