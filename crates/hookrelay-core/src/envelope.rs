//! Canonical JSON envelope wrapping an ingested HTTP request.
//!
//! The envelope is the on-wire contract between the relay server and its
//! forward clients. It is a flat JSON object: every request header appears
//! under its lower-cased name with the first value only, `timestamp` holds
//! the server ingestion time as a decimal string of milliseconds since the
//! Unix epoch, and `bodyB` holds the raw request body as standard padded
//! base64. The `content-type` key doubles as the legacy content-type field
//! older clients look for.
//!
//! Serialization uses `serde_json`'s sorted object map, so a given request
//! always encodes to the same bytes.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use regex::Regex;
use serde_json::{Map, Value};

/// Content type required on ingested webhooks and stamped on replays.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default cap on ingested body size: 25 MiB, GitHub's payload limit.
pub const DEFAULT_MAX_BODY_SIZE: usize = 25 * 1024 * 1024;

/// Length of server-generated channel names.
pub const GENERATED_CHANNEL_LENGTH: usize = 12;

/// Channel names are URL-path-safe identifiers, 12 to 64 characters.
static CHANNEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{12,64}$").expect("channel pattern is valid")
});

/// Returns whether `name` is a well-formed channel identifier.
#[must_use]
pub fn is_valid_channel(name: &str) -> bool {
    CHANNEL_PATTERN.is_match(name)
}

/// Generates a random channel name matching the channel grammar.
#[must_use]
pub fn random_channel() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), GENERATED_CHANNEL_LENGTH)
}

/// A canonical envelope under construction.
///
/// Built from an inbound request's headers and body; encode with
/// [`Envelope::encode`] to obtain the bytes delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Builds an envelope from request headers and the raw body bytes.
    ///
    /// Header names are lower-cased; when a name repeats, the first value
    /// wins. `timestamp` and `bodyB` are reserved keys and always reflect
    /// the ingestion time and body, regardless of inbound headers.
    pub fn from_request<'a, I>(headers: I, body: &[u8], now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields = Map::new();
        for (name, value) in headers {
            let key = name.to_ascii_lowercase();
            fields
                .entry(key)
                .or_insert_with(|| Value::String(value.to_string()));
        }

        fields.insert(
            "timestamp".to_string(),
            Value::String(now.timestamp_millis().to_string()),
        );
        fields.insert(
            "bodyB".to_string(),
            Value::String(BASE64_STANDARD.encode(body)),
        );

        Self { fields }
    }

    /// Overrides the `content-type` field, replacing any inbound value.
    ///
    /// The replay endpoint uses this to stamp `application/json` on
    /// re-injected payloads.
    pub fn set_content_type(&mut self, value: &str) {
        self.fields.insert(
            "content-type".to_string(),
            Value::String(value.to_string()),
        );
    }

    /// Encodes the envelope as the JSON bytes delivered to subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    /// Returns the value recorded for a (lower-cased) field, if any.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
