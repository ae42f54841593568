//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// ew - inspect a console's live event channel and streamed chat
#[derive(Parser)]
#[command(
    name = "ew",
    about = "Live event channel, streamed chat and rate-limit guard client",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the event stream and print events until Ctrl-C
    Listen {
        /// Topics to subscribe to (all events when omitted)
        #[arg(value_name = "TOPIC")]
        topics: Vec<String>,
    },

    /// Send a chat message and print the streamed response
    Chat {
        /// Message text
        message: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Print every frame instead of only tokens
        #[arg(short, long)]
        frames: bool,
    },

    /// Guarded JSON GET against the API
    Get {
        /// Path relative to the base URL
        path: String,

        /// Guard key (defaults to the path)
        #[arg(short, long)]
        key: Option<String>,

        /// Retries on throttling (defaults to guard.max-retries)
        #[arg(short, long)]
        retries: Option<u32>,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventwire")
        .join("logs")
        .join("eventwire.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}
