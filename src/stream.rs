//! Per stream drivers tying the controllers to the sender and the channel.
//!
//! The controllers themselves never touch the outside world. These structs own
//! the ports for one video stream, feed the controllers on every tick or inbound
//! message and carry out what they decide, best effort.

use std::time::Instant;

use crate::arbitrator::{ArbitratorOutput, CapArbitrator};
use crate::channel::{send_best_effort, ControlChannel};
use crate::config::ControlConfig;
use crate::estimator::{CongestionEstimator, EstimatorOutput};
use crate::message::ControlMessage;
use crate::sender::{apply_best_effort, SenderControl};
use crate::stats::{PublisherSample, ReceiverSample, StatsSource};
use crate::util::Pii;
use crate::watchdog::LayerHealthWatchdog;
use crate::CapError;

/// One outgoing video stream on the publishing side.
///
/// Owns the only handle to the sender, so parameter writes from the arbitrator
/// and the watchdog are applied one after the other and never interleave.
pub struct PublishedStream<S, C> {
    arbitrator: CapArbitrator,
    watchdog: LayerHealthWatchdog,
    sender: S,
    channel: C,
}

impl<S: SenderControl, C: ControlChannel> PublishedStream<S, C> {
    pub fn new(local_identity: impl Into<String>, sender: S, channel: C) -> Self {
        Self::with_config(local_identity, &ControlConfig::default(), sender, channel)
    }

    pub fn with_config(
        local_identity: impl Into<String>,
        config: &ControlConfig,
        sender: S,
        channel: C,
    ) -> Self {
        PublishedStream {
            arbitrator: CapArbitrator::with_config(local_identity, config),
            watchdog: LayerHealthWatchdog::with_config(config),
            sender,
            channel,
        }
    }

    pub fn arbitrator(&self) -> &CapArbitrator {
        &self.arbitrator
    }

    pub fn watchdog(&self) -> &LayerHealthWatchdog {
        &self.watchdog
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Handle a control message from a receiver.
    ///
    /// `from` is the identity the channel attributes the message to. Malformed
    /// payloads are returned as errors and leave the state untouched.
    pub fn handle_message(
        &mut self,
        payload: &[u8],
        from: &str,
        now: Instant,
    ) -> Result<(), CapError> {
        match ControlMessage::decode(payload)? {
            ControlMessage::CapRequest(request) => {
                self.arbitrator.handle_cap_request(&request, from, now);
                self.drive_arbitrator();
            }
            ControlMessage::CapAck(_) => {
                trace!("Ignore cap ack from {} on publishing side", Pii(from));
            }
        }
        Ok(())
    }

    /// Periodic tick: expire caps, then let the watchdog look at the stats.
    pub fn handle_timeout(&mut self, now: Instant, sample: Option<&PublisherSample>) {
        self.arbitrator.tick_cleanup(now);
        self.drive_arbitrator();

        let Some(sample) = sample else {
            return;
        };

        let actions = self
            .watchdog
            .evaluate(sample, self.arbitrator.applied_cap());

        for action in actions {
            let what = action.kind.to_string();
            apply_best_effort(&mut self.sender, &what, |p| action.apply(p));
        }
    }

    /// Tick with a sample pulled from `stats`.
    pub fn poll_stats<T>(&mut self, now: Instant, stats: &mut T)
    where
        T: StatsSource<Sample = PublisherSample>,
    {
        let sample = stats.poll_sample();
        self.handle_timeout(now, sample.as_ref());
    }

    /// Tear down on disconnect or track replacement.
    ///
    /// Drops every receiver cap, puts the default ceilings back on the sender and
    /// rearms the watchdog.
    pub fn clear(&mut self) {
        self.arbitrator.clear();
        self.watchdog.reset();
        self.drive_arbitrator();
    }

    /// Give back the ports.
    pub fn into_parts(self) -> (S, C) {
        (self.sender, self.channel)
    }

    fn drive_arbitrator(&mut self) {
        while let Some(output) = self.arbitrator.poll_output() {
            match output {
                ArbitratorOutput::Apply(caps) => {
                    apply_best_effort(&mut self.sender, "caps", |p| p.set_max_bitrates(&caps));
                }
                ArbitratorOutput::Ack { destination, ack } => {
                    send_best_effort(&mut self.channel, &ack.into(), &destination);
                }
            }
        }
    }
}

/// One incoming video stream on the receiving side.
pub struct SubscribedStream<C> {
    local_identity: String,
    publisher_identity: String,
    estimator: CongestionEstimator,
    channel: C,
}

impl<C: ControlChannel> SubscribedStream<C> {
    pub fn new(
        local_identity: impl Into<String>,
        publisher_identity: impl Into<String>,
        channel: C,
    ) -> Self {
        Self::with_config(
            local_identity,
            publisher_identity,
            &ControlConfig::default(),
            channel,
        )
    }

    pub fn with_config(
        local_identity: impl Into<String>,
        publisher_identity: impl Into<String>,
        config: &ControlConfig,
        channel: C,
    ) -> Self {
        SubscribedStream {
            local_identity: local_identity.into(),
            publisher_identity: publisher_identity.into(),
            estimator: CongestionEstimator::with_config(config),
            channel,
        }
    }

    pub fn estimator(&self) -> &CongestionEstimator {
        &self.estimator
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn publisher_identity(&self) -> &str {
        &self.publisher_identity
    }

    /// Periodic tick with this tick's inbound stats.
    ///
    /// Any cap request is sent to the publisher. The returned output tells the
    /// caller whether to hold the high layer or fall back to layer switching.
    pub fn handle_timeout(&mut self, now: Instant, sample: ReceiverSample) -> EstimatorOutput {
        let output = self.estimator.update(sample, &self.local_identity, now);

        if let Some(request) = &output.outbound {
            let message = ControlMessage::CapRequest(request.clone());
            send_best_effort(&mut self.channel, &message, &self.publisher_identity);
        }

        output
    }

    /// Tick with a sample pulled from `stats`. Nothing happens without a sample.
    pub fn poll_stats<T>(&mut self, now: Instant, stats: &mut T) -> Option<EstimatorOutput>
    where
        T: StatsSource<Sample = ReceiverSample>,
    {
        let sample = stats.poll_sample()?;
        Some(self.handle_timeout(now, sample))
    }

    /// Handle a control message from the publisher.
    ///
    /// Acks from anyone but the publisher of this stream are ignored.
    pub fn handle_message(&mut self, payload: &[u8], from: &str) -> Result<(), CapError> {
        match ControlMessage::decode(payload)? {
            ControlMessage::CapAck(ack) => {
                let source = if from.is_empty() { ack.identity.as_str() } else { from };
                if source != self.publisher_identity {
                    trace!("Ignore cap ack from {}", Pii(source));
                    return Ok(());
                }
                debug!(
                    "Cap ack from {} applied {}",
                    Pii(source),
                    ack.applied_bitrate_high
                );
                self.estimator.mark_ack_received();
            }
            ControlMessage::CapRequest(_) => {
                trace!("Ignore cap request from {} on receiving side", Pii(from));
            }
        }
        Ok(())
    }

    /// Back to a fresh subscription, as on unsubscribe or resubscribe.
    pub fn reset(&mut self) {
        self.estimator.reset();
    }

    pub fn into_channel(self) -> C {
        self.channel
    }
}
