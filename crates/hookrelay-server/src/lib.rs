//! hookrelay-server - the relay half of hookrelay.
//!
//! A single axum router serves the whole wire contract:
//!
//! - `POST /{channel}` - webhook ingress: gate, validate, wrap in an
//!   envelope, publish to the channel's subscribers.
//! - `GET /events/{channel}` - SSE stream of envelopes for one channel.
//! - `POST /replay/{channel}` - re-inject an arbitrary body as a fresh
//!   envelope.
//! - `GET /version`, `/health`, `/livez` - version probe endpoints.
//!
//! All channel state lives in memory in a single [`EventBroker`]; there is
//! no persistence and no delivery guarantee beyond a connected
//! subscriber's bounded queue.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use hookrelay_core::broker::EventBroker;
use hookrelay_core::ip_allowlist::IpAllowList;
use hookrelay_core::signature::SignatureValidator;
use hookrelay_core::version::{VERSION, VERSION_HEADER};
use serde_json::json;

pub mod gate;
pub mod ingress;
pub mod stream;

/// Configuration assembled from the CLI before the server starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IPs/CIDRs allowed to POST webhooks; empty means open.
    pub allow_list: IpAllowList,
    /// Trust `X-Forwarded-For`/`X-Real-IP` when determining producer IPs.
    pub trust_proxy: bool,
    /// Shared secrets for webhook signature validation; empty disables it.
    pub webhook_secrets: Vec<String>,
    /// Cap on ingested request bodies, in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_list: IpAllowList::default(),
            trust_proxy: false,
            webhook_secrets: Vec::new(),
            max_body_size: hookrelay_core::envelope::DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Shared state behind every handler.
#[derive(Debug)]
pub struct RelayState {
    /// Channel-scoped pub/sub registry.
    pub broker: EventBroker,
    /// Webhook signature validator.
    pub validator: SignatureValidator,
    /// Producer IP allow-list.
    pub allow_list: IpAllowList,
    /// Whether proxy headers are trusted for producer IPs.
    pub trust_proxy: bool,
    /// Cap on ingested request bodies.
    pub max_body_size: usize,
}

impl RelayState {
    /// Builds relay state from configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            broker: EventBroker::new(),
            validator: SignatureValidator::new(config.webhook_secrets),
            allow_list: config.allow_list,
            trust_proxy: config.trust_proxy,
            max_body_size: config.max_body_size,
        }
    }
}

/// Builds the relay router.
///
/// POST routes pass through the IP gate; the body cap applies to every
/// body-reading extractor and answers oversized requests with 413.
pub fn router(state: Arc<RelayState>) -> Router {
    let max_body_size = state.max_body_size;
    Router::new()
        .route("/version", get(version_handler))
        .route("/health", get(version_handler))
        .route("/livez", get(version_handler))
        .route("/events/{channel}", get(stream::events_handler))
        .route("/replay/{channel}", post(ingress::replay_handler))
        .route("/{channel}", post(ingress::webhook_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gate::ip_gate,
        ))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state)
}

/// `GET /version` (also `/health` and `/livez`): the version JSON plus
/// the version response header.
async fn version_handler() -> impl IntoResponse {
    (
        [(VERSION_HEADER, VERSION)],
        axum::Json(json!({ "version": VERSION })),
    )
}

/// Convenience for binding the router with client address info, as the
/// gate needs `ConnectInfo` to resolve producer IPs.
///
/// # Errors
///
/// Returns an error when the listener cannot be served.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<RelayState>) -> std::io::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
