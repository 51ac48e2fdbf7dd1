//! CLI module for Meridian
//!
//! Provides command-line interface parsing for the meridian binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, Lines};

/// Meridian - intent routing for supply-chain analytics
///
/// Routes questions to the delay, analytics, forecasting and data-query
/// handlers, runs them, and merges their answers.
#[derive(Parser, Debug)]
#[command(
    name = "meridian",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "Meridian - intent routing, decomposition and aggregation",
    long_about = "Routes supply-chain analytics questions to specialist handlers,\n\
                  runs them concurrently and merges their answers with cross-handler insights.\n\n\
                  Pass a question to answer it once, or run without one to read questions from stdin.",
    after_help = "EXAMPLES:\n    \
                  meridian \"what is the delay rate\"                  # Answer one question\n    \
                  meridian --route-only \"delay rate and forecast\"    # Print the routing decision\n    \
                  meridian --config my.toml                           # Read questions from stdin"
)]
pub struct Cli {
    /// Question to answer; reads from stdin when omitted
    pub query: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "meridian.toml")]
    pub config: PathBuf,

    /// Print the routing decision as JSON instead of answering
    #[arg(long)]
    pub route_only: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Reads the next interactive line.
///
/// Returns `None` at end of input or when `interrupt` resolves before a
/// full line arrives.
pub async fn read_line<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_parse_single_query() {
        let cli = Cli::parse_from(["meridian", "what is the delay rate"]);
        assert_eq!(cli.query.as_deref(), Some("what is the delay rate"));
        assert_eq!(cli.config, PathBuf::from("meridian.toml"));
        assert!(!cli.route_only);
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "meridian",
            "--route-only",
            "--no-color",
            "-v",
            "--config",
            "custom.toml",
            "forecast demand",
        ]);
        assert!(cli.route_only && cli.no_color && cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
    }

    #[test]
    fn test_parse_without_query() {
        let cli = Cli::parse_from(["meridian"]);
        assert!(cli.query.is_none());
    }

    #[tokio::test]
    async fn test_read_line_returns_input() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"what is the delay rate\n").await.unwrap();
        let mut lines = BufReader::new(rx).lines();

        let line = read_line(&mut lines, std::future::pending()).await.unwrap();
        assert_eq!(line.as_deref(), Some("what is the delay rate"));
    }

    #[tokio::test]
    async fn test_read_line_stops_on_interrupt() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut lines = BufReader::new(rx).lines();

        let line = read_line(&mut lines, async {}).await.unwrap();
        assert!(line.is_none());
    }

    #[tokio::test]
    async fn test_read_line_stops_at_end_of_input() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut lines = BufReader::new(rx).lines();

        let line = read_line(&mut lines, std::future::pending()).await.unwrap();
        assert!(line.is_none());
    }
}
