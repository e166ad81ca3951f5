//! hookrelay-client - forward relayed webhooks to a local service.
//!
//! The client subscribes to one relay channel over SSE and replays every
//! delivered webhook against a local target URL. It reconnects forever
//! with exponential backoff; nothing a remote peer sends can terminate
//! it. The only fatal conditions are startup validation and the server
//! version gate, both of which exit with status 1.

use anyhow::{Context, Result};
use clap::Parser;
use hookrelay_client::{health, subscribe, version_check};
use hookrelay_core::version::VERSION;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// hookrelay-client - forward webhooks from a relay channel to a local
/// service.
#[derive(Parser, Debug)]
#[command(name = "hookrelay-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Channel URL on the relay server (or smee.io)
    #[arg(value_name = "SERVER_CHANNEL_URL", env = "GOSMEE_URL")]
    server_url: String,

    /// Local service URL to replay webhooks to
    #[arg(value_name = "LOCAL_TARGET_URL", env = "GOSMEE_TARGET_URL")]
    target_url: String,

    /// Ignore these event types; repeatable
    #[arg(short = 'I', long = "ignore-event")]
    ignore_events: Vec<String>,

    /// How long to wait when forwarding a request to the service, in
    /// seconds
    #[arg(long, env = "GOSMEE_TARGET_TIMEOUT", default_value_t = 5)]
    target_connection_timeout: u64,

    /// Do not verify the target service's TLS certificate
    #[arg(long)]
    insecure_skip_tls_verify: bool,

    /// Skip the server version compatibility check
    #[arg(long)]
    nocheck_version: bool,

    /// Port for a health endpoint for liveness/readiness probes; 0
    /// disables it
    #[arg(long, env = "GOSMEE_HEALTH_PORT", default_value_t = 0)]
    health_port: u16,

    /// Maximum size of a single SSE event, in bytes
    #[arg(long = "sse-buffer-size", env = "GOSMEE_SSE_BUFFER_SIZE", default_value_t = 1_048_576)]
    sse_buffer_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    reqwest::Url::parse(&cli.server_url)
        .with_context(|| format!("{} is not a valid URL", cli.server_url))?;
    reqwest::Url::parse(&cli.target_url)
        .with_context(|| format!("{} is not a valid URL", cli.target_url))?;

    tracing::info!(version = VERSION, "starting hookrelay client");

    if cli.nocheck_version {
        tracing::debug!("server version check skipped");
    } else {
        version_check::check_server_version(&cli.server_url, VERSION).await?;
    }

    if cli.health_port > 0 {
        health::spawn_health_server(cli.health_port);
    }

    let forwarder = subscribe::Forwarder::new(subscribe::ForwarderOpts {
        server_url: cli.server_url,
        target_url: cli.target_url,
        ignore_events: cli.ignore_events,
        max_event_size: cli.sse_buffer_size,
        target_timeout_secs: cli.target_connection_timeout,
        insecure_tls: cli.insecure_skip_tls_verify,
    })?;
    forwarder.run().await
}
