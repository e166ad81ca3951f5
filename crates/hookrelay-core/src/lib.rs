//! # hookrelay-core
//!
//! Core library for hookrelay - a webhook relay over Server-Sent Events.
//!
//! A publicly reachable relay server ingests provider webhooks on
//! per-channel URLs and streams them to subscribed forward clients living
//! behind NAT or firewalls; each client re-issues the webhook against a
//! local HTTP service. This crate holds everything both halves share:
//!
//! - **Envelope**: the canonical JSON wrapping of an ingested HTTP request
//!   (lower-cased headers, millisecond timestamp, base64 body).
//! - **Broker**: in-memory channel-scoped pub/sub with bounded
//!   per-subscriber queues and best-effort delivery.
//! - **Signature**: multi-provider webhook signature validation (GitHub,
//!   GitLab, Bitbucket, Gitea) with constant-time comparisons.
//! - **IP allow-list**: CIDR/IP ingress gating with optional proxy-header
//!   trust.
//! - **Payload**: the client-side inverse of the envelope, producing the
//!   headers and body to replay.
//! - **Version**: relay version negotiation primitives.
//!
//! # Delivery Model
//!
//! Events are fire-and-forget: a subscriber that is not connected when a
//! webhook arrives never sees it, and a subscriber whose queue is full has
//! that event dropped without back-pressuring the publisher. The relay
//! prefers continued operation over exactness.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod envelope;
pub mod ip_allowlist;
pub mod payload;
pub mod signature;
pub mod version;

pub use broker::{EventBroker, Subscriber};
pub use envelope::Envelope;
pub use ip_allowlist::IpAllowList;
pub use payload::PayloadMessage;
pub use signature::SignatureValidator;
