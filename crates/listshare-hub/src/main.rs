//! Hub binary - server for ephemeral shareable todo lists

use clap::Parser;
use clap::builder::BoolishValueParser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use listshare_hub::{context::HubConfig, server};

#[derive(Parser, Debug)]
#[command(name = "listshare-hub")]
#[command(about = "Server for ephemeral shareable todo lists with live updates")]
struct Args {
    /// Port to listen on
    #[arg(short = 'P', long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Enable live updates over WebSocket ("false" rejects all upgrades)
    #[arg(
        long,
        env = "ENABLE_WEBSOCKET",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    enable_websocket: bool,

    /// Lifetime of lists created without a positive expiration
    #[arg(long, env = "DEFAULT_EXPIRATION_HOURS", default_value = "24")]
    default_expiration_hours: i64,

    /// Seconds between expiry sweeps (0 disables the sweep)
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "3600")]
    sweep_interval_secs: u64,

    /// Redis URL for list storage (in-memory storage when unset)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "listshare_hub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = HubConfig {
        port: args.port,
        host: args.host,
        websocket_enabled: args.enable_websocket,
        default_expiration_hours: args.default_expiration_hours,
        sweep_interval_secs: Some(args.sweep_interval_secs).filter(|secs| *secs > 0),
        redis_url: args.redis_url.filter(|url| !url.is_empty()),
        redis_password: args.redis_password,
    };

    info!(
        storage = config.storage_kind(),
        websocket_enabled = config.websocket_enabled,
        default_expiration_hours = config.default_expiration_hours,
        "Starting hub"
    );

    server::run_server(config).await?;

    Ok(())
}
