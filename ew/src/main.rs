//! ew - eventwire inspection tool
//!
//! CLI entry point for watching the live event channel, streaming chat
//! responses and issuing guarded API calls.

use std::fs;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use eventwire::bus::{ConnectionState, ConnectionStatus, NamedEvent};
use eventwire::cli::{Cli, Command};
use eventwire::config::Config;
use eventwire::stream::{ChatRequest, StreamFrame};
use eventwire::{ApiClient, ChatClient, Session};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventwire")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("eventwire.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Listen { topics } => cmd_listen(&config, topics).await,
        Command::Chat {
            message,
            conversation,
            frames,
        } => cmd_chat(&config, message, conversation, frames).await,
        Command::Get { path, key, retries } => cmd_get(&config, &path, key, retries).await,
        Command::Config => cmd_config(&config),
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_event(event: &NamedEvent) {
    println!("{} {} {}", timestamp().dimmed(), event.topic.cyan().bold(), event.payload);
}

fn print_status(status: &ConnectionStatus) {
    let label = status.state.to_string();
    let label = match status.state {
        ConnectionState::Connected => label.green(),
        ConnectionState::Connecting | ConnectionState::Reconnecting => label.yellow(),
        ConnectionState::Disconnected => label.red(),
    };
    match status.reason {
        Some(reason) => println!("{} [{}] ({:?})", timestamp().dimmed(), label, reason),
        None => println!("{} [{}]", timestamp().dimmed(), label),
    }
}

async fn cmd_listen(config: &Config, topics: Vec<String>) -> Result<()> {
    debug!(?topics, "cmd_listen: called");
    let session = Session::from_config(config).context("Failed to create session")?;
    info!(session_id = %session.id(), "cmd_listen: session started");
    let bus = session.bus();

    let mut tap = bus.tap();
    let all = topics.is_empty();
    for topic in &topics {
        bus.subscribe(topic, print_event);
    }
    bus.connect();

    let mut status = bus.watch_status();
    print_status(&status.borrow_and_update());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("cmd_listen: ctrl-c");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                print_status(&current);
                if current.is_terminal() {
                    session.teardown();
                    return Err(eyre::eyre!("Event stream rejected our credentials (set {})", config.server.token_env));
                }
            }
            event = tap.recv(), if all => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{}", format!("skipped {} events", n).yellow());
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.teardown();
    Ok(())
}

async fn cmd_chat(config: &Config, message: String, conversation: Option<String>, frames: bool) -> Result<()> {
    debug!(%message, ?conversation, frames, "cmd_chat: called");
    let client = ChatClient::from_config(&config.server).context("Failed to create chat client")?;
    let request = ChatRequest {
        message,
        conversation_id: conversation,
    };

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                StreamFrame::Token { content } if !frames => {
                    print!("{}", content);
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                }
                StreamFrame::Error { message } => eprintln!("\n{} {}", "error:".red().bold(), message),
                other if frames => println!("{}", serde_json::to_string(&other).unwrap_or_else(|_| format!("{:?}", other))),
                _ => {}
            }
        }
    });

    let summary = client.stream(&request, tx).await.context("Chat request failed")?;
    printer.await.context("Printer task failed")?;
    println!();

    if !summary.decode_errors.is_empty() {
        eprintln!("{}", format!("{} undecodable lines skipped", summary.decode_errors.len()).yellow());
    }
    if !summary.sentinel_seen {
        eprintln!("{}", "stream ended without [DONE]".yellow());
    }
    Ok(())
}

async fn cmd_get(config: &Config, path: &str, key: Option<String>, retries: Option<u32>) -> Result<()> {
    debug!(%path, ?key, ?retries, "cmd_get: called");
    let session = Session::from_config(config).context("Failed to create session")?;
    let client = ApiClient::from_config(&config.server).context("Failed to create API client")?;
    let key = key.unwrap_or_else(|| path.to_string());
    let retries = retries.unwrap_or(session.max_retries());

    let value: serde_json::Value = session
        .guard()
        .guard_cached(&key, retries, || client.get_json(path))
        .await
        .context(format!("GET {} failed", path))?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
    Ok(())
}
