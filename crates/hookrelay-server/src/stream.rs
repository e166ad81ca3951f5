//! SSE delivery of envelopes to subscribed clients.
//!
//! `GET /events/{channel}` registers a broker subscriber and streams its
//! queue as SSE `data:` frames. Every stream opens with a `connected`
//! frame, then a `ready` frame once the subscription is registered, then
//! one frame per envelope. A comment keepalive goes out every 30 seconds
//! so intermediaries keep the connection open. Client disconnection drops
//! the stream, which unsubscribes from the broker; a disconnect can never
//! leak a queue.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use hookrelay_core::broker::Subscriber;
use hookrelay_core::envelope::is_valid_channel;

use crate::RelayState;
use crate::ingress::RelayError;

/// Interval between `: keepalive` comment frames.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const CONNECTED_MESSAGE: &str = r#"{"message":"connected"}"#;
const READY_MESSAGE: &str = r#"{"message":"ready"}"#;

/// `GET /events/{channel}`: stream the channel's envelopes over SSE.
pub async fn events_handler(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
) -> Result<Response, RelayError> {
    if !is_valid_channel(&channel) {
        return Err(RelayError::UnknownChannel);
    }

    let subscriber = state.broker.subscribe(&channel);
    tracing::debug!(channel = %channel, "subscriber connected");

    let stream = EventStream::new(Arc::clone(&state), subscriber);
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    );

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        sse,
    )
        .into_response())
}

enum Phase {
    Connected,
    Ready,
    Streaming,
}

/// The SSE frame source for one subscriber.
///
/// Yields the connected/ready preamble, then drains the subscriber queue.
/// Ends when the broker closes the queue; unsubscribes on drop, which is
/// how request-context cancellation tears the subscription down.
struct EventStream {
    state: Arc<RelayState>,
    subscriber: Subscriber,
    phase: Phase,
}

impl EventStream {
    fn new(state: Arc<RelayState>, subscriber: Subscriber) -> Self {
        Self {
            state,
            subscriber,
            phase: Phase::Connected,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.phase {
            Phase::Connected => {
                this.phase = Phase::Ready;
                Poll::Ready(Some(Ok(Event::default().data(CONNECTED_MESSAGE))))
            }
            Phase::Ready => {
                this.phase = Phase::Streaming;
                Poll::Ready(Some(Ok(Event::default().data(READY_MESSAGE))))
            }
            Phase::Streaming => this.subscriber.poll_recv(cx).map(|next| {
                next.map(|envelope| {
                    Ok(Event::default().data(String::from_utf8_lossy(&envelope).into_owned()))
                })
            }),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.state
            .broker
            .unsubscribe(self.subscriber.channel(), self.subscriber.id());
        tracing::debug!(channel = %self.subscriber.channel(), "subscriber disconnected");
    }
}
