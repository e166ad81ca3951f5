//! POST-only IP gating middleware.
//!
//! Webhook producers can be restricted to an allow-list of IPs and CIDR
//! ranges; subscription and probe endpoints stay unrestricted, so the
//! gate only examines POST requests. With an empty allow-list the gate is
//! open and the middleware is pass-through.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use hookrelay_core::ip_allowlist::client_ip;

use crate::RelayState;
use crate::ingress::RelayError;

/// Rejects POST requests from addresses outside the allow-list.
///
/// The producer address comes from proxy headers when `trust_proxy` is
/// set, otherwise from the transport remote address. An address outside
/// the list answers 403; a request whose address cannot be determined at
/// all answers 400.
pub async fn ip_gate(
    State(state): State<Arc<RelayState>>,
    request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    if request.method() != Method::POST || state.allow_list.is_empty() {
        return Ok(next.run(request).await);
    }

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let Some(ip) = client_ip(request.headers(), remote, state.trust_proxy) else {
        return Err(RelayError::UndeterminedClientIp);
    };

    if !state.allow_list.contains(ip) {
        tracing::info!(ip = %ip, "rejecting webhook from disallowed address");
        return Err(RelayError::IpNotAllowed);
    }

    Ok(next.run(request).await)
}
