use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duet::chat_bridge::{ChatBridge, ConsolePlatform};
use duet::config::{
    BackendKind, ChatConfig, FileConfig, GenerationConfig, RelayConfig, RouterConfig,
    read_config,
};
use duet::generation::AnyBackend;
use duet::prompt::PromptBuilder;
use duet::relay::{self, RelayState};
use duet::router::{Router, spawn_endpoint};
use duet_protocol::{Speaker, ViewerChat};
use futures::SinkExt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Turn-synchronized dialogue router for two virtual characters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true, default_value = "duet.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the room relay
    Relay(RelayArgs),

    /// Run the turn router against the relay
    Router(RouterArgs),

    /// Inject one viewer chat frame into the relay
    Say(SayArgs),
}

#[derive(Parser)]
struct RelayArgs {
    /// Host to bind to (overrides relay.host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides relay.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Parser)]
struct RouterArgs {
    /// Generation backend (overrides generation.backend)
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Read viewer messages from stdin through the chat bridge
    #[arg(long)]
    stdin_chat: bool,
}

#[derive(Parser)]
struct SayArgs {
    /// Character the message is addressed to
    #[arg(short, long)]
    source: Speaker,

    /// Relay path to connect to
    #[arg(long, default_value = "/AB")]
    path: String,

    /// Message text
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "duet=debug,tower_http=debug,info"
    } else {
        "duet=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let file_config = read_config(&cli.config)?;

    match cli.command {
        Commands::Relay(args) => run_relay(file_config, args).await,
        Commands::Router(args) => run_router(file_config, args).await,
        Commands::Say(args) => say(file_config, args).await,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

async fn run_relay(mut fc: FileConfig, args: RelayArgs) -> Result<()> {
    if let Some(host) = args.host {
        fc.relay.host = host;
    }
    if let Some(port) = args.port {
        fc.relay.port = port;
    }
    let config = RelayConfig::from_file(&fc.relay)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    relay::serve(listener, RelayState::new(config), shutdown_signal()).await
}

async fn run_router(mut fc: FileConfig, args: RouterArgs) -> Result<()> {
    if let Some(backend) = args.backend {
        fc.generation.backend = backend;
    }
    let router_config = RouterConfig::from_file(&fc.router);
    let generation = GenerationConfig::from_file(&fc.generation)?;
    let chat_config = ChatConfig::from_file(&fc.chat);

    let backend = AnyBackend::from_config(&generation)?;
    let prompt = PromptBuilder::new(generation.system_prompt.clone(), generation.reply_char_limit)
        .with_tags(generation.tags.clone());

    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(router_config.inbound_capacity);

    let spawn = |speaker: Speaker| {
        spawn_endpoint(
            speaker,
            router_config.endpoint_url(speaker).to_string(),
            router_config.reconnect_delay,
            inbound_tx.clone(),
            cancel.clone(),
        )
    };
    let (endpoint_a, supervisor_a) = spawn(Speaker::A);
    let (endpoint_b, supervisor_b) = spawn(Speaker::B);

    let router = Router::new(
        endpoint_a,
        endpoint_b,
        inbound_rx,
        backend,
        prompt,
        &router_config,
    );

    let bridge = if args.stdin_chat {
        let bridge = ChatBridge::new(
            ConsolePlatform::spawn(),
            chat_config,
            inbound_tx.clone(),
            router.subscribe_turns(),
        );
        Some(tokio::spawn(bridge.run(cancel.clone())))
    } else {
        None
    };
    drop(inbound_tx);

    info!(
        url_a = %router_config.url_a,
        url_b = %router_config.url_b,
        backend = ?generation.backend,
        "duet router starting"
    );

    let router_task = tokio::spawn(router.run(cancel.clone()));
    shutdown_signal().await;
    cancel.cancel();

    if let Err(e) = router_task.await {
        warn!("Router task failed: {}", e);
    }
    if let Some(bridge) = bridge {
        let _ = bridge.await;
    }
    let _ = tokio::join!(supervisor_a, supervisor_b);
    Ok(())
}

async fn say(fc: FileConfig, args: SayArgs) -> Result<()> {
    let base = fc.router.relay_url.trim_end_matches('/');
    let url = format!("{}{}", base, args.path);

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;

    let chat = ViewerChat {
        text: args.text,
        source: args.source,
    };
    ws.send(Message::Text(serde_json::to_string(&chat)?.into()))
        .await?;
    ws.close(None).await?;
    info!(url = %url, source = %args.source, "chat sent");
    Ok(())
}
