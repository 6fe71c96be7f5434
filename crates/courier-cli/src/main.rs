use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use courier_channels::{DiscordIdentity, EVENT_QUEUE_SIZE, ListenerChannel, spawn_gateway};
use courier_core::routing::token_prefix;
use courier_core::{
    ChatTranslator, ContentFilter, DiscordRest, Forwarder, IdentityRegistry, Normalizer,
    OutboundIdentity, Relay, RoutingTable, Translate,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::CourierConfig;

/// Pause between bot logins to stay clear of the platform's auth rate limits
const LOGIN_PAUSE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "courier")]
#[command(version)]
#[command(about = "Courier - relays watched channels to bot-owned channels")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay daemon (default)
    Start,

    /// Initialize config directory and default config
    Init,

    /// Validate the config and print the routing summary
    Check,

    /// Show current configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Init => cmd_init().await,
        Commands::Check => cmd_check(&cli.config),
        Commands::Config => cmd_config(&cli.config),
        Commands::Start => cmd_start(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let default_config = include_str!("../../../config/default.toml");
    tokio::fs::write(&config_path, default_config).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    info!("Created default config at {}", config_path.display());

    println!("Courier initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure tokens and channel mappings.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CourierConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

fn cmd_check(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CourierConfig::load(config_path)?;
    let routing = cfg.routing_table()?;

    println!("Config OK");
    println!("  bots: {}", cfg.bots.len());
    println!(
        "  translation: {}",
        if cfg.translation_key().is_some() {
            "configured"
        } else {
            "no API key"
        }
    );
    print!("{}", routing_summary(&routing));
    Ok(())
}

fn routing_summary(routing: &RoutingTable) -> String {
    let mut mappings: Vec<_> = routing.mappings().collect();
    mappings.sort_by_key(|m| m.source_channel_id);

    let mut out = format!("  mappings: {}\n", mappings.len());
    for mapping in mappings {
        let owner = routing
            .owner_of(mapping.target_channel_id)
            .map(|e| e.remark.as_str())
            .unwrap_or("(no owning bot)");
        let translate = mapping
            .active_translation()
            .map(|t| format!(" [translate → {} via {}]", t.target_language, t.model))
            .unwrap_or_default();
        out.push_str(&format!(
            "    {} → {} ({}){}\n",
            mapping.source_channel_id, mapping.target_channel_id, owner, translate
        ));
    }
    out
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CourierConfig::load(config_path)?;
    info!("Starting courier...");

    let routing = Arc::new(cfg.routing_table()?);
    let cancel = CancellationToken::new();

    // Log in every bot, one at a time
    let mut registry = IdentityRegistry::new();
    let mut gateways = Vec::new();
    for (i, bot) in cfg.bots.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(LOGIN_PAUSE).await;
        }
        let label = bot.label();
        match DiscordIdentity::login(&bot.token, &label).await {
            Ok(identity) => {
                info!(
                    "Bot '{}' logged in (token {})",
                    label,
                    token_prefix(&bot.token)
                );
                gateways.push((bot.token.clone(), identity.identity_id(), label));
                registry.register(&bot.token, identity.identity_id(), Arc::new(identity));
            }
            Err(e) => error!(
                "Bot '{}' (token {}) failed to log in: {:#}",
                label,
                token_prefix(&bot.token),
                e
            ),
        }
    }
    if registry.is_empty() && !cfg.bots.is_empty() {
        bail!("No bot could log in; nothing can be delivered");
    }
    info!("{} of {} bot(s) logged in", registry.len(), cfg.bots.len());

    check_targets(&routing, &registry).await;

    let gateway_handles: Vec<_> = gateways
        .into_iter()
        .map(|(token, id, label)| spawn_gateway(token, id, label))
        .collect();

    let latest = Arc::new(DiscordRest::new(
        cfg.listener_token.clone(),
        cfg.discord_api_base.clone(),
    ));
    let translator: Option<Arc<dyn Translate>> = match cfg.translation_key() {
        Some(key) => Some(Arc::new(ChatTranslator::new(
            key,
            cfg.translation.base_url.clone(),
        ))),
        None => {
            info!("No translation API key configured; translation disabled");
            None
        }
    };
    let relay = Relay::new(
        routing.clone(),
        Normalizer::new(latest),
        ContentFilter::new(&cfg.keyword_filter, &cfg.user_filter, &cfg.keyword_replace),
        translator,
        Forwarder::new(routing, registry),
    );

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let listener = ListenerChannel::new(cfg.listener_token.clone(), cfg.source_channels()?);
    listener
        .start(tx)
        .await
        .context("Failed to start the listener")?;

    println!("Courier is running. Press Ctrl+C to stop.");

    // Events are handled one at a time, preserving per-channel order
    let cancel_clone = cancel.clone();
    let relay_loop = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_clone.cancelled() => {
                    info!("Relay loop shutting down");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => relay.handle(event).await,
                        None => {
                            warn!("Listener queue closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();

    join_logged("relay loop", relay_loop).await;
    for handle in gateway_handles {
        handle.abort();
    }

    println!("Courier stopped.");
    Ok(())
}

/// Wait for a background task, reporting a panic or cancellation. Returns true on a clean exit.
async fn join_logged(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            error!("{} panicked: {}", name, e);
            false
        }
        Err(e) => {
            error!("{} did not finish: {}", name, e);
            false
        }
    }
}

/// Log every mapped destination its owning bot cannot see.
async fn check_targets(routing: &RoutingTable, registry: &IdentityRegistry) {
    let mut targets: Vec<u64> = routing.mappings().map(|m| m.target_channel_id).collect();
    targets.sort_unstable();
    targets.dedup();

    for target in targets {
        let Some(entry) = routing.owner_of(target) else {
            warn!("Target channel {} has no owning bot", target);
            continue;
        };
        let Some(identity) = registry.resolve(&entry.owning_token) else {
            warn!(
                "Target channel {} belongs to '{}', which is not logged in",
                target, entry.remark
            );
            continue;
        };
        match identity.get_channel(target).await {
            Ok(Some(channel)) => info!(
                "Target channel {} ({}) reachable via '{}'",
                target,
                channel.name.as_deref().unwrap_or("unnamed"),
                identity.label()
            ),
            Ok(None) => warn!(
                "Target channel {} is not reachable via '{}'",
                target,
                identity.label()
            ),
            Err(e) => warn!("Could not check target channel {}: {:#}", target, e),
        }
    }
}
