//! Optional health endpoint for liveness/readiness probes.
//!
//! When `--health-port` is set, a background server answers
//! `GET /health` with the client version, so orchestrators can probe a
//! forwarder that otherwise only makes outbound connections.

use axum::Router;
use axum::response::IntoResponse;
use axum::routing::get;
use hookrelay_core::version::{VERSION, VERSION_HEADER};
use serde_json::json;

/// Spawns the health server in the background; failures are logged, not
/// fatal, as the forwarder itself can run without it.
pub fn spawn_health_server(port: u16) {
    tokio::spawn(async move {
        let app = Router::new().route("/health", get(health_handler));
        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(port, error = %err, "cannot bind health endpoint");
                return;
            }
        };
        tracing::info!(port, "health endpoint listening");
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "health endpoint failed");
        }
    });
}

async fn health_handler() -> impl IntoResponse {
    (
        [(VERSION_HEADER, VERSION)],
        axum::Json(json!({ "version": VERSION })),
    )
}
