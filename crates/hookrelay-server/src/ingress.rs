//! Webhook ingress: validate, wrap, publish.
//!
//! The ingress pipeline runs each stage in order and short-circuits with
//! the stated status code: IP gate (403/400, in the middleware), content
//! type (400), body cap (413, enforced by the router's body limit),
//! signature (401), strict JSON parse (400), envelope construction,
//! publish. A successful ingestion answers 202 with a small JSON receipt
//! and the version response header. Exactly one publish per successful
//! call; no retries, no persistence.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hookrelay_core::envelope::{Envelope, JSON_CONTENT_TYPE, is_valid_channel};
use hookrelay_core::version::{VERSION, VERSION_HEADER};
use serde_json::json;
use thiserror::Error;

use crate::RelayState;

/// Errors that can occur while handling a request.
///
/// Each maps to the HTTP status code the producer sees; none of the
/// response bodies leak secrets or internal state.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The producer IP is not on the allow-list.
    #[error("IP address not allowed")]
    IpNotAllowed,

    /// The producer IP could not be determined.
    #[error("failed to determine client IP")]
    UndeterminedClientIp,

    /// The channel segment does not match the channel grammar.
    #[error("unknown channel")]
    UnknownChannel,

    /// The request did not carry a JSON content type.
    #[error("content-type must be application/json")]
    UnsupportedContentType,

    /// No configured secret matched the request's signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// The request body was not valid JSON.
    #[error("invalid JSON payload")]
    InvalidPayload,

    /// Envelope construction failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::IpNotAllowed => StatusCode::FORBIDDEN,
            Self::UndeterminedClientIp
            | Self::UnsupportedContentType
            | Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::UnknownChannel => StatusCode::NOT_FOUND,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::IpNotAllowed => "IP address not allowed",
            Self::UndeterminedClientIp => "Failed to determine client IP",
            Self::UnknownChannel => "Unknown channel",
            Self::UnsupportedContentType => "content-type must be application/json",
            Self::InvalidSignature => "invalid signature",
            Self::InvalidPayload => "invalid JSON payload",
            Self::Internal(_) => "internal server error",
        };
        (status, body).into_response()
    }
}

/// `POST /{channel}`: ingests one webhook and publishes its envelope.
pub async fn webhook_handler(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let now = Utc::now();

    if !is_valid_channel(&channel) {
        return Err(RelayError::UnknownChannel);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.contains(JSON_CONTENT_TYPE) {
        return Err(RelayError::UnsupportedContentType);
    }

    if !state.validator.validate(&headers, &body) {
        tracing::info!(channel = %channel, "rejecting webhook with invalid signature");
        return Err(RelayError::InvalidSignature);
    }

    // Strict parse: producers must send well-formed JSON, but the envelope
    // carries the original bytes, not this value.
    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return Err(RelayError::InvalidPayload);
    }

    let envelope = Envelope::from_request(header_pairs(&headers), &body, now);
    let encoded = envelope
        .encode()
        .map_err(|err| RelayError::Internal(err.to_string()))?;

    let delivered = state.broker.publish(&channel, &Bytes::from(encoded));

    tracing::info!(
        channel = %channel,
        body_size = body.len(),
        subscribers = delivered,
        event_type = headers
            .get("x-github-event")
            .and_then(|value| value.to_str().ok())
            .unwrap_or(""),
        "published webhook"
    );

    Ok(accepted_receipt(&channel))
}

/// `POST /replay/{channel}`: re-injects an arbitrary body as an envelope.
///
/// No content-type requirement and no signature check - the payload is
/// wrapped as-is with `content-type` forced to JSON, exactly as the
/// ingress envelope a client expects.
pub async fn replay_handler(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    if !is_valid_channel(&channel) {
        return Err(RelayError::UnknownChannel);
    }

    let mut envelope = Envelope::from_request(header_pairs(&headers), &body, Utc::now());
    envelope.set_content_type(JSON_CONTENT_TYPE);
    let encoded = envelope
        .encode()
        .map_err(|err| RelayError::Internal(err.to_string()))?;

    let delivered = state.broker.publish(&channel, &Bytes::from(encoded));
    tracing::info!(channel = %channel, subscribers = delivered, "replayed payload");

    Ok((
        StatusCode::ACCEPTED,
        [(VERSION_HEADER, VERSION)],
        "replayed",
    )
        .into_response())
}

/// Header pairs with non-UTF-8 values skipped; the envelope must stay
/// valid UTF-8 JSON.
fn header_pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
}

fn accepted_receipt(channel: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        [(VERSION_HEADER, VERSION)],
        axum::Json(json!({
            "status": StatusCode::ACCEPTED.as_u16(),
            "channel": channel,
            "message": "ok",
            "version": VERSION,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RelayError::IpNotAllowed.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RelayError::UndeterminedClientIp.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::UnknownChannel.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::UnsupportedContentType.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::InvalidPayload.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_responses_do_not_leak_details() {
        let response = RelayError::Internal("connection string with secrets".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
