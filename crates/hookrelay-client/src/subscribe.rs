//! The long-lived SSE subscription and its event filter chain.
//!
//! One subscription task owns the connection for the life of the process.
//! Disconnects - network partitions, server restarts, idle timeouts - are
//! expected and handled by reconnecting with exponential backoff that
//! never gives up: there is no cap on total elapsed time, only on the
//! delay between attempts. Events flow through a filter chain that drops
//! the stream's own control messages and anything on the ignore-list
//! before handing the payload to the replay engine. Replays run
//! sequentially: each one completes before the next SSE event is
//! processed, which keeps per-channel replay order.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use hookrelay_core::payload::PayloadMessage;
use hookrelay_core::version::{USER_AGENT_PREFIX, VERSION};
use http::header;

use crate::replay::Replayer;

/// The public smee.io service; subscriptions there use the channel URL
/// itself rather than an `/events/{channel}` path.
pub const SMEE_BASE_URL: &str = "https://smee.io";

/// Forwarder configuration assembled from the CLI.
#[derive(Debug, Clone)]
pub struct ForwarderOpts {
    /// Channel URL on the relay server.
    pub server_url: String,
    /// Local service URL to replay against.
    pub target_url: String,
    /// Event types to drop silently.
    pub ignore_events: Vec<String>,
    /// Cap on a single SSE event's data, in bytes.
    pub max_event_size: usize,
    /// Replay timeout, in seconds.
    pub target_timeout_secs: u64,
    /// Skip TLS verification on the target.
    pub insecure_tls: bool,
}

/// What to do with one SSE event after filtering.
enum Disposition {
    /// The stream's ready marker: log the forwarding banner.
    Banner,
    /// Filtered out; nothing to do.
    Drop,
    /// A real webhook to replay.
    Deliver(Box<PayloadMessage>),
}

/// The subscription loop: connect, filter, replay, reconnect forever.
pub struct Forwarder {
    opts: ForwarderOpts,
    sse_url: String,
    client: reqwest::Client,
    replayer: Replayer,
}

impl Forwarder {
    /// Builds the forwarder and its HTTP clients.
    ///
    /// # Errors
    ///
    /// Returns an error when either HTTP client cannot be constructed.
    pub fn new(opts: ForwarderOpts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{USER_AGENT_PREFIX}/{VERSION}"))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let replayer = Replayer::new(
            opts.target_url.clone(),
            Duration::from_secs(opts.target_timeout_secs),
            opts.insecure_tls,
        )?;
        let sse_url = subscription_url(&opts.server_url);

        Ok(Self {
            opts,
            sse_url,
            client,
            replayer,
        })
    }

    /// Runs the subscription loop; never returns.
    ///
    /// # Errors
    ///
    /// The loop itself is infallible - disconnects and stream errors feed
    /// the backoff schedule. The `Result` exists for the caller's `?`.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = Backoff::default();
        loop {
            match self.stream_events(&mut backoff).await {
                Ok(()) => tracing::warn!("event stream closed by server, reconnecting"),
                Err(err) => tracing::warn!(error = %err, "event stream failed, reconnecting"),
            }
            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "waiting before reconnect");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection's lifetime: subscribe and process events until the
    /// stream ends or errors.
    async fn stream_events(&self, backoff: &mut Backoff) -> Result<()> {
        tracing::debug!(url = %self.sse_url, "connecting to event stream");
        let response = self
            .client
            .get(&self.sse_url)
            .header(header::ACCEPT, "text/event-stream")
            .header("x-accel-buffering", "no")
            .send()
            .await?
            .error_for_status()?;

        backoff.reset();

        let mut events = Box::pin(response.bytes_stream().eventsource());
        while let Some(event) = events.next().await {
            let event = event?;
            match self.classify(&event.event, &event.data, Utc::now()) {
                Disposition::Banner => {
                    tracing::info!(
                        "forwarding {} to {}",
                        self.opts.server_url,
                        self.opts.target_url
                    );
                }
                Disposition::Drop => {}
                Disposition::Deliver(message) => self.replayer.replay(&message).await,
            }
        }
        Ok(())
    }

    /// The filter chain, applied in order. System messages from the
    /// stream (connected/ready/ping), empty frames and ignored event
    /// types are dropped; only real webhooks come out as `Deliver`.
    fn classify(&self, event_name: &str, data: &str, now: DateTime<Utc>) -> Disposition {
        if data.len() > self.opts.max_event_size {
            tracing::warn!(
                size = data.len(),
                limit = self.opts.max_event_size,
                "dropping oversized event"
            );
            return Disposition::Drop;
        }

        if event_name == "ready" || data == "ready" {
            return Disposition::Banner;
        }

        if event_name == "ping" {
            return Disposition::Drop;
        }

        if data.is_empty() || data == "{}" {
            return Disposition::Drop;
        }

        let lower = data.to_lowercase();
        if lower.contains("ready")
            || (lower.contains(r#""message""#) && lower.contains(r#""connected""#))
        {
            tracing::debug!("skipping connection message");
            return Disposition::Drop;
        }

        let message = match PayloadMessage::parse(now, data.as_bytes()) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "cannot parse message");
                return Disposition::Drop;
            }
        };

        if message.headers.is_empty() {
            tracing::error!("no headers found in message");
            return Disposition::Drop;
        }

        if message.event_type == "ready" || message.body.eq_ignore_ascii_case(b"ready") {
            tracing::debug!("skipping message with ready event type or body");
            return Disposition::Drop;
        }

        if message.body.is_empty()
            && message.headers.iter().any(|(name, value)| {
                name.eq_ignore_ascii_case("message") && value.eq_ignore_ascii_case("connected")
            })
        {
            tracing::debug!("skipping empty message with connected header");
            return Disposition::Drop;
        }

        if !message.event_type.is_empty()
            && self.opts.ignore_events.contains(&message.event_type)
        {
            tracing::info!(event_type = %message.event_type, "skipping event as requested");
            return Disposition::Drop;
        }

        Disposition::Deliver(Box::new(message))
    }
}

/// Derives the SSE endpoint from the channel URL.
///
/// smee.io serves its fixed `messages` stream on the channel URL itself;
/// the hookrelay server serves the stream under `/events/{channel}`.
pub fn subscription_url(server_url: &str) -> String {
    let trimmed = server_url.trim_end_matches('/');
    if server_url.starts_with(SMEE_BASE_URL) {
        return trimmed.to_string();
    }
    match trimmed.rsplit_once('/') {
        Some((base, channel)) => format!("{base}/events/{channel}"),
        None => trimmed.to_string(),
    }
}

/// Exponential backoff with a capped delay and no cap on elapsed time.
///
/// The delay doubles on each attempt up to one minute. There is
/// deliberately no give-up point: the forwarder must survive arbitrarily
/// long partitions and server downtime.
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Restarts the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
