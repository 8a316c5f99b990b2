//! Receiver driven bandwidth arbitration for simulcast video.
//!
//! A publisher sends its camera or screen as three simulcast layers, `f` (full),
//! `h` (half) and `q` (quarter). Each receiver watches its own inbound loss and
//! throughput and, when it sees congestion, asks the publisher to cap the layer
//! bitrates. The publisher applies the most restrictive cap asked for by any
//! receiver and acknowledges it. Next to this, a watchdog on the publisher looks
//! for layers starved by the transport's own bandwidth estimator and nudges the
//! encoder when it sees one.
//!
//! This is a [Sans I/O][sansio] library. Nothing in here owns a socket, a timer or a
//! thread. Time is passed in with every call, statistics are handed in as samples
//! and side effects go out through two small traits the caller implements:
//!
//! * [`SenderControl`] reads and writes the per layer encoding parameters.
//! * [`ControlChannel`] sends control messages to another participant.
//!
//! # Components
//!
//! * [`CongestionEstimator`], one per subscribed video stream on the receiving side.
//!   An AIMD controller that backs off on loss, probes back up on clean ticks and
//!   produces [`BitrateCapRequest`] messages.
//! * [`CapArbitrator`], one per outgoing video stream on the publishing side. Keeps
//!   one expiring cap per receiver and applies the element-wise minimum.
//! * [`LayerHealthWatchdog`], one per outgoing video stream. Detects a stuck
//!   bandwidth estimate and a paused top layer and returns rescue actions.
//!
//! [`PublishedStream`] and [`SubscribedStream`] wire these to the ports and are the
//! easiest way in.
//!
//! # Usage
//!
//! On the publishing side:
//!
//! ```no_run
//! # use std::time::Instant;
//! # use simulcap::{CapError, ControlChannel, PublishedStream, SenderControl, SendParameters};
//! # struct Encoder;
//! # impl SenderControl for Encoder {
//! #     fn parameters(&mut self) -> Result<SendParameters, CapError> { Ok(SendParameters::simulcast()) }
//! #     fn set_parameters(&mut self, _: SendParameters) -> Result<(), CapError> { Ok(()) }
//! # }
//! # struct Channel;
//! # impl ControlChannel for Channel {
//! #     fn send_data(&mut self, _: &[u8], _: &str) -> Result<(), CapError> { Ok(()) }
//! # }
//! # fn next_message() -> (Vec<u8>, String) { todo!() }
//! let mut stream = PublishedStream::new("publisher-1", Encoder, Channel);
//!
//! // For every control message arriving on the channel.
//! let (payload, from) = next_message();
//! if let Err(e) = stream.handle_message(&payload, &from, Instant::now()) {
//!     // Malformed or unknown messages are never fatal.
//!     println!("Dropped control message: {}", e);
//! }
//!
//! // Once per tick, with the outbound stats if there are any.
//! stream.handle_timeout(Instant::now(), None);
//! ```
//!
//! On the receiving side:
//!
//! ```no_run
//! # use std::time::Instant;
//! # use simulcap::{Bitrate, CapError, ControlChannel, ReceiverSample, SubscribedStream};
//! # struct Channel;
//! # impl ControlChannel for Channel {
//! #     fn send_data(&mut self, _: &[u8], _: &str) -> Result<(), CapError> { Ok(()) }
//! # }
//! let mut stream = SubscribedStream::new("receiver-1", "publisher-1", Channel);
//!
//! // Once per tick, with the packets lost since last tick and the received rate.
//! let sample = ReceiverSample::new(40, Bitrate::kbps(3_000));
//! let output = stream.handle_timeout(Instant::now(), sample);
//!
//! if output.fallback_to_layers {
//!     // The publisher does not answer. Switch down the received layer instead.
//! }
//! ```
//!
//! # Failures
//!
//! Writes to the sender and the channel are best effort. A failure is logged at
//! `debug` and dropped, the next tick naturally tries again. Only decoding of
//! inbound messages returns an error to the caller.
//!
//! # Logging
//!
//! Everything is logged through [tracing]. Participant identities are wrapped so
//! that the `pii` feature redacts them.
//!
//! [sansio]: https://sans-io.readthedocs.io
//! [tracing]: https://docs.rs/tracing

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod arbitrator;
pub use arbitrator::{ArbitratorOutput, CapArbitrator, PublisherCapEntry};

mod channel;
pub use channel::ControlChannel;

mod config;
pub use config::ControlConfig;

mod estimator;
pub use estimator::{CongestionEstimator, EstimatorOutput, ProbePhase, PROBE_STEP};

mod layer;
pub use layer::{Layer, LayerCaps, Rid, FLOOR_HIGH, FLOOR_LOW, FLOOR_MED};

mod message;
pub use message::{BitrateCapAck, BitrateCapRequest, CapReason, ControlMessage};
pub use message::PROTOCOL_VERSION;

mod rate;
pub use rate::Bitrate;

mod sender;
pub use sender::{apply_best_effort, EncodingParameters, SendParameters, SenderControl};

mod stats;
pub use stats::{LayerSnapshot, LimitationReason, PublisherSample, ReceiverSample, StatsSource};

mod stream;
pub use stream::{PublishedStream, SubscribedStream};

mod util;

mod watchdog;
pub use watchdog::{LayerHealthWatchdog, WatchdogAction, WatchdogActionKind};

/// Errors from the ports and from decoding control messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CapError {
    /// Payload is not a valid control message.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Control message of a protocol version we don't speak.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Sender parameters without any encodings.
    #[error("Sender has no encodings")]
    NoEncodings,

    /// The sender rejected reading or writing parameters.
    #[error("Sender: {0}")]
    Sender(String),

    /// The control channel failed to send.
    #[error("Channel: {0}")]
    Channel(String),
}
