//! Telehook CLI entry point.
//!
//! Subcommands:
//! - `start`: run the relay until Ctrl+C or SIGTERM
//! - `discover`: list chats visible to the bot, with an example whitelist
//! - `check`: validate configuration and print a summary

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use telehook::config::{self, Config};
use telehook::logging;
use telehook::relay::Dispatcher;
use telehook::telegram::directory::{render_report, BotDirectory, ChatDirectory};
use telehook::telegram::events::spawn_event_listener;
use telehook::webhook::{DeliveryClient, HttpTransport};

/// Relay Telegram messages from whitelisted chats to an HTTP webhook.
#[derive(Debug, Parser)]
#[command(name = "telehook", version, about)]
struct Cli {
    /// Path to the TOML config file (default: ./telehook.toml if present).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for messages and forward them to the webhook.
    Start,
    /// List chats visible to the bot and print an example whitelist.
    Discover,
    /// Validate configuration and print the effective settings.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dotenv_path = config::load_dotenv();

    match cli.command {
        Command::Start => start(cli.config.as_deref(), dotenv_path).await,
        Command::Discover => discover(cli.config.as_deref()).await,
        Command::Check => check(cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

async fn start(config_path: Option<&Path>, dotenv_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::init_cli();
            error!(error = %e, "invalid configuration");
            return Err(e).context("failed to load configuration");
        }
    };

    let _log_guard = match &config.logs_dir {
        Some(dir) => Some(logging::init_production(dir)?),
        None => {
            logging::init_cli();
            None
        }
    };

    info!("starting telegram to webhook relay");
    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "loaded environment file");
    }

    let token = config.require_bot_token()?.to_owned();
    config.log_startup();

    let transport = HttpTransport::new(
        config.webhook_url.clone(),
        config.request_timeout,
        config.connect_timeout,
    )
    .context("failed to build webhook client")?;
    let client = DeliveryClient::new(Arc::new(transport), config.retry);
    let dispatcher = Dispatcher::new(
        Arc::new(config.whitelist.clone()),
        client,
        config.dispatcher,
    );

    let (event_tx, event_rx) = mpsc::channel(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = spawn_event_listener(Bot::new(token), event_tx);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!("listening for messages (press Ctrl+C to stop)");
    let summary = dispatcher.run(event_rx, shutdown_rx).await;

    listener.abort();
    info!(
        delivered = summary.delivered,
        dropped = summary.finished().saturating_sub(summary.delivered),
        "relay stopped"
    );
    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C, shutting down");
    } else {
        info!("received Ctrl+C, shutting down");
    }
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

async fn discover(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli();

    let token = config::load_bot_token(config_path)?;
    let directory = BotDirectory::new(Bot::new(token));
    let chats = directory
        .list_chats()
        .await
        .context("failed to list chats")?;

    print!("{}", render_report(&chats));
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli();

    let config = Config::load(config_path).context("failed to load configuration")?;

    println!("webhook:         {}", config.webhook_url);
    if config.whitelist.is_empty() {
        println!("whitelist:       (empty) ALL chats will be forwarded");
    } else {
        println!(
            "whitelist:       {} chats [{}]",
            config.whitelist.len(),
            config.whitelist
        );
    }
    println!("timeout:         {}s", config.request_timeout.as_secs());
    println!(
        "retry:           {} attempts, {}ms base, {}ms cap",
        config.retry.max_attempts,
        config.retry.base_delay.as_millis(),
        config.retry.max_delay.as_millis()
    );
    println!(
        "concurrency:     {} (queue {})",
        config.dispatcher.max_concurrency, config.queue_capacity
    );
    println!(
        "bot token:       {}",
        if config.bot_token().is_some() {
            "set"
        } else {
            "missing"
        }
    );
    println!("configuration OK");
    Ok(())
}
