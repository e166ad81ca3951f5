//! Client-side inverse of the envelope: recover headers, body and event
//! metadata from the JSON delivered over SSE.
//!
//! The envelope is a flat JSON object keyed by lower-cased header names
//! plus the reserved `timestamp`, `bodyB` and legacy `body` fields. The
//! parser projects it into a [`PayloadMessage`]: header keys are matched
//! case-insensitively and stored title-cased, the body is recovered from
//! `bodyB` (standard base64) or the legacy raw-JSON `body`, and the
//! provider event header yields a sanitized event type safe for use in
//! filenames and filters. Field iteration order never affects the result.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use thiserror::Error;

/// Rendering of parsed timestamps: `YYYY-MM-DDTHH.MM.SS.mmm`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H.%M.%S%.3f";

/// Errors from envelope parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The envelope was not valid UTF-8.
    #[error("envelope is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// The envelope was not a JSON object.
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The `bodyB` field did not decode as standard base64.
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Nothing usable was recovered: no headers and an empty body.
    #[error("parsed message has no headers")]
    Empty,
}

/// An envelope projected into the pieces needed for one HTTP replay.
#[derive(Debug, Clone, Default)]
pub struct PayloadMessage {
    /// Replay headers, keyed by title-cased header name.
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes, exactly as the producer sent them.
    pub body: Vec<u8>,
    /// Content type recorded in the envelope, if any.
    pub content_type: String,
    /// Sanitized provider event type (e.g. `push`, `repo-push`); empty
    /// when the envelope carried no event header.
    pub event_type: String,
    /// Provider delivery id (`X-GitHub-Delivery`), if present.
    pub event_id: String,
    /// Event time formatted per [`TIMESTAMP_FORMAT`]; falls back to the
    /// parse time when the envelope carries no usable timestamp.
    pub timestamp: String,
}

impl PayloadMessage {
    /// Parses envelope bytes into a `PayloadMessage`.
    ///
    /// `now` is the fallback event time when the envelope's `timestamp`
    /// field is absent or malformed.
    ///
    /// # Errors
    ///
    /// Returns an error when the envelope is not a JSON object, `bodyB`
    /// is not valid base64, or nothing usable was recovered (no headers
    /// and an empty body).
    pub fn parse(now: DateTime<Utc>, data: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(data)?;
        let fields: BTreeMap<String, &RawValue> = serde_json::from_str(text)?;

        let mut message = Self::default();
        let mut event_time = now;

        for (key, raw) in &fields {
            let lower = key.to_ascii_lowercase();
            match lower.as_str() {
                "x-github-event" | "x-gitlab-event" | "x-event-key" => {
                    if let Some(value) = as_string(raw) {
                        message.event_type = sanitize_event_type(&value);
                        message.headers.insert(title_case(&lower), value);
                    }
                }
                "x-github-delivery" => {
                    if let Some(value) = as_string(raw) {
                        message.event_id.clone_from(&value);
                        message.headers.insert(title_case(&lower), value);
                    }
                }
                "bodyb" => {
                    let encoded: String = serde_json::from_str(raw.get())?;
                    message.body = BASE64_STANDARD.decode(encoded)?;
                }
                "body" => {
                    // Legacy envelopes ship the body as a raw JSON value.
                    message.body = raw.get().as_bytes().to_vec();
                }
                "content-type" => {
                    if let Some(value) = as_string(raw) {
                        message.content_type.clone_from(&value);
                        message
                            .headers
                            .entry("Content-Type".to_string())
                            .or_insert(value);
                    }
                }
                "timestamp" => {
                    if let Some(value) = as_string(raw) {
                        match value.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis) {
                            Some(parsed) => event_time = parsed,
                            None => {
                                tracing::warn!(timestamp = %value, "cannot parse envelope timestamp");
                            }
                        }
                    }
                }
                _ => {
                    if lower.starts_with("x-") || lower == "user-agent" {
                        if let Some(mut value) = as_string(raw) {
                            if lower == "x-forwarded-for" {
                                value = value
                                    .split(':')
                                    .next()
                                    .unwrap_or_default()
                                    .to_string();
                            }
                            message.headers.insert(title_case(&lower), value);
                        }
                    } else if let Some(value) = as_string(raw) {
                        message.headers.insert(title_case(&lower), value);
                    }
                }
            }
        }

        message.timestamp = event_time.format(TIMESTAMP_FORMAT).to_string();

        if message.headers.is_empty() && message.body.is_empty() {
            return Err(ParseError::Empty);
        }

        Ok(message)
    }
}

fn as_string(raw: &RawValue) -> Option<String> {
    serde_json::from_str(raw.get()).ok()
}

/// Title-cases a lower-cased header name: `x-github-event` becomes
/// `X-Github-Event`.
#[must_use]
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalizes a provider event name into a filesystem- and filter-safe
/// token.
///
/// Lower-cases the input, maps `:` to `-` and both space and `/` to `_`,
/// then keeps the longest prefix of `[A-Za-z0-9_:-]`. The result never
/// contains a path separator.
#[must_use]
pub fn sanitize_event_type(event: &str) -> String {
    event
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ':' => '-',
            ' ' | '/' => '_',
            other => other,
        })
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'))
        .collect()
}
