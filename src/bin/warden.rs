//! Warden bot binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden::config::DiscordConfig;
use warden::diagnostics::init_tracing;
use warden::events::CommunityEvent;
use warden::ids::MemberId;
use warden::platform::discord::DiscordGate;
use warden::platform::gateway::run_gateway;
use warden::runtime::{EVENT_QUEUE_CAPACITY, Runtime};
use warden::{PlatformGate, WardenConfig};

/// Delay before reconnecting after the gateway session drops.
const GATEWAY_BACKOFF: Duration = Duration::from_secs(5);

/// Warden: community bot with timed grants, moderation, leveling and giveaways.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to Discord and run the bot (default).
    Run,

    /// Write a default configuration file and exit.
    InitConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .unwrap_or_else(WardenConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig => {
            WardenConfig::default().save_to_file(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Run => run(path).await,
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = WardenConfig::load(&path)?;
    let _log_guard = init_tracing(&config.logging)?;
    if config.discord.bot_token.trim().is_empty() {
        anyhow::bail!(
            "no bot token: set discord.bot_token in {} or {}",
            path.display(),
            warden::config::TOKEN_ENV_VAR
        );
    }

    info!("warden v{} starting", env!("CARGO_PKG_VERSION"));
    let gate = Arc::new(DiscordGate::new(&config.discord));
    let bot = gate.bot_id();
    let runtime = Runtime::open(config.clone(), gate)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c.cancel();
        }
    });

    let scheduler = runtime.scheduler().run(cancel.clone());
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let pump = tokio::spawn(pump_gateway(config.discord.clone(), bot, tx, cancel.clone()));

    runtime.run_events(rx, cancel.clone()).await;
    cancel.cancel();

    if let Err(e) = scheduler.await {
        error!("scheduler task failed: {e}");
    }
    if let Err(e) = pump.await {
        error!("gateway task failed: {e}");
    }
    info!("warden shut down cleanly");
    Ok(())
}

/// Keep a gateway session alive, reconnecting after a fixed delay.
async fn pump_gateway(
    config: DiscordConfig,
    bot: MemberId,
    tx: mpsc::Sender<CommunityEvent>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match run_gateway(&config, bot, tx.clone(), cancel.clone()).await {
            Ok(()) => break,
            Err(e) => warn!("gateway session ended: {e:#}"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(GATEWAY_BACKOFF) => {}
        }
    }
}
