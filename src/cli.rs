//! Command-line interface definitions for the local news aggregator.
//!
//! Global options can come from flags or environment variables; each
//! subcommand maps to one orchestrator or store operation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the local news aggregator.
///
/// # Examples
///
/// ```sh
/// # Scrape every enabled source once and print the run result
/// local_news_aggregator run
///
/// # Bounded run over two sources
/// local_news_aggregator run-selected --source-id 1 --source-id 4 --timeout-secs 60
///
/// # HTTP API plus scheduled runs
/// local_news_aggregator --config /etc/news/config.yaml serve --bind 0.0.0.0:3000
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.yaml (missing file means defaults)
    #[arg(short, long, env = "NEWS_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Override the SQLite database path from the config file
    #[arg(long, env = "NEWS_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Scrape every enabled source
    Run,

    /// Scrape the given sources, optionally bounded by time or article count
    RunSelected {
        /// Source id; repeat for more than one
        #[arg(long = "source-id", required = true)]
        source_ids: Vec<i64>,

        /// Return a partial result after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Stop after the run has stored this many new articles
        #[arg(long)]
        max_articles: Option<usize>,
    },

    /// Scrape one source
    RunSingle {
        #[arg(long)]
        source_id: i64,
    },

    /// Print the source registry with run bookkeeping
    Sources,

    /// Print stored articles, newest first
    Articles {
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Delete articles older than the retention window
    Purge {
        /// Retention in days (defaults to `retention_days` from the config)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Serve the HTTP API and run the scheduler
    Serve {
        /// Override `server.bind` from the config file
        #[arg(long, env = "NEWS_BIND")]
        bind: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["local_news_aggregator", "run"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(cli.database.is_none());
        assert_eq!(cli.command, Command::Run);
    }

    #[test]
    fn test_run_selected_collects_repeated_ids() {
        let cli = Cli::parse_from([
            "local_news_aggregator",
            "-c",
            "/tmp/news.yaml",
            "run-selected",
            "--source-id",
            "3",
            "--source-id",
            "1",
            "--max-articles",
            "25",
        ]);

        assert_eq!(cli.config, PathBuf::from("/tmp/news.yaml"));
        assert_eq!(
            cli.command,
            Command::RunSelected {
                source_ids: vec![3, 1],
                timeout_secs: None,
                max_articles: Some(25),
            }
        );
    }

    #[test]
    fn test_run_selected_requires_a_source() {
        assert!(Cli::try_parse_from(["local_news_aggregator", "run-selected"]).is_err());
    }

    #[test]
    fn test_articles_filters() {
        let cli = Cli::parse_from([
            "local_news_aggregator",
            "--database",
            "/tmp/test.db",
            "articles",
            "--category",
            "weather",
            "--limit",
            "5",
        ]);

        assert_eq!(cli.database, Some(PathBuf::from("/tmp/test.db")));
        assert_eq!(
            cli.command,
            Command::Articles {
                category: Some("weather".to_string()),
                tag: None,
                limit: 5,
            }
        );
    }
}
