//! hookrelay-server binary: parse flags, build relay state, serve.

use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use hookrelay_core::envelope::DEFAULT_MAX_BODY_SIZE;
use hookrelay_core::ip_allowlist::IpAllowList;
use hookrelay_core::version::VERSION;
use hookrelay_server::{RelayState, ServerConfig, router, serve};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// hookrelay-server - relay webhooks from public producers to forward
/// clients over SSE.
#[derive(Parser, Debug)]
#[command(name = "hookrelay-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 3333)]
    port: u16,

    /// Public URL to show in logs, useful behind a proxy
    #[arg(long)]
    public_url: Option<String>,

    /// CIDR ranges or IP addresses allowed to POST webhooks; repeatable.
    /// All producers are allowed when unset
    #[arg(long = "allowed-ips", env = "GOSMEE_ALLOWED_IPS", value_delimiter = ',')]
    allowed_ips: Vec<String>,

    /// Trust X-Forwarded-For and X-Real-IP headers for the producer IP
    #[arg(long, env = "GOSMEE_TRUST_PROXY")]
    trust_proxy: bool,

    /// Secret tokens to validate webhook signatures (GitHub, GitLab and
    /// others); repeatable
    #[arg(
        long = "webhook-signature",
        env = "GOSMEE_WEBHOOK_SIGNATURE",
        value_delimiter = ','
    )]
    webhook_signatures: Vec<String>,

    /// Maximum body size in bytes for incoming webhooks
    #[arg(long, env = "GOSMEE_MAX_BODY_SIZE", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    max_body_size: usize,

    /// TLS certificate file; requires --tls-key
    #[arg(long, env = "GOSMEE_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// TLS key file; requires --tls-cert
    #[arg(long, env = "GOSMEE_TLS_KEY")]
    tls_key: Option<PathBuf>,

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

    let allow_list = IpAllowList::parse(&cli.allowed_ips)
        .context("failed to parse allowed IPs")?;

    let config = ServerConfig {
        allow_list,
        trust_proxy: cli.trust_proxy,
        webhook_secrets: cli.webhook_signatures.clone(),
        max_body_size: cli.max_body_size,
    };
    let state = Arc::new(RelayState::new(config));

    let bind_addr = format!("{}:{}", cli.address, cli.port);
    match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => {
            log_public_url(cli.public_url.as_deref(), &bind_addr, "https");
            let tls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                    .await
                    .context("failed to load TLS certificate")?;

            axum_server::bind_rustls(resolve(&bind_addr)?, tls_config)
                .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
                .await
                .context("relay server failed")?;
        }
        (None, None) => {
            log_public_url(cli.public_url.as_deref(), &bind_addr, "http");
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .with_context(|| format!("failed to bind {bind_addr}"))?;
            serve(listener, state).await.context("relay server failed")?;
        }
        _ => bail!("--tls-cert and --tls-key must be given together"),
    }

    Ok(())
}

fn log_public_url(public_url: Option<&str>, bind_addr: &str, scheme: &str) {
    let url = public_url.map_or_else(|| format!("{scheme}://{bind_addr}"), String::from);
    tracing::info!(version = VERSION, "serving webhooks on {url}");
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("no addresses for {addr}"))
}
