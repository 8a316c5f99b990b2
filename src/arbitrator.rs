//! Publisher side cap arbitration.
//!
//! Every receiver of a stream may ask the publisher to cap its layers. The
//! arbitrator keeps the latest request per receiver, expires requests that are
//! not refreshed, and applies the element-wise minimum of all live requests.
//!
//! The arbitrator does no I/O. Decisions are queued as [`ArbitratorOutput`] and
//! drained with [`CapArbitrator::poll_output`]. The caller must drain the queue
//! after every call. Only the latest pending `Apply` is kept, but acks pile up
//! until polled.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::ControlConfig;
use crate::layer::LayerCaps;
use crate::message::{BitrateCapAck, BitrateCapRequest, CapReason};
use crate::util::Pii;

/// One receiver's live cap.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherCapEntry {
    pub caps: LayerCaps,
    pub timestamp: Instant,
    pub reason: CapReason,
}

/// Work for the caller of the arbitrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbitratorOutput {
    /// Set these layer bitrates on the sender.
    Apply(LayerCaps),
    /// Send an ack to a receiver.
    Ack {
        destination: String,
        ack: BitrateCapAck,
    },
}

/// Most-restrictive-wins arbitration of receiver caps for one outgoing stream.
#[derive(Debug)]
pub struct CapArbitrator {
    local_identity: String,
    ceilings: LayerCaps,
    ttl: Duration,
    caps: HashMap<String, PublisherCapEntry>,
    applied: Option<LayerCaps>,
    outputs: VecDeque<ArbitratorOutput>,
}

impl CapArbitrator {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self::with_config(local_identity, &ControlConfig::default())
    }

    pub fn with_config(local_identity: impl Into<String>, config: &ControlConfig) -> Self {
        CapArbitrator {
            local_identity: local_identity.into(),
            ceilings: config.default_caps,
            ttl: config.cap_ttl,
            caps: HashMap::new(),
            applied: None,
            outputs: VecDeque::new(),
        }
    }

    /// The arbitrated cap last handed out for applying. `None` when uncapped.
    pub fn applied_cap(&self) -> Option<LayerCaps> {
        self.applied
    }

    /// The caps currently in force, the ceilings when uncapped.
    pub fn effective_cap(&self) -> LayerCaps {
        self.applied.unwrap_or(self.ceilings)
    }

    pub fn entry(&self, receiver_identity: &str) -> Option<&PublisherCapEntry> {
        self.caps.get(receiver_identity)
    }

    pub fn entry_count(&self) -> usize {
        self.caps.len()
    }

    /// Take in a cap request from a receiver.
    ///
    /// The request is clamped into the valid range, replaces any earlier request from
    /// the same receiver, and the arbitrated cap is recomputed. The receiver is always
    /// acked with the high layer bitrate now in force, which may be lower than what it
    /// asked for.
    pub fn handle_cap_request(
        &mut self,
        request: &BitrateCapRequest,
        receiver_identity: &str,
        now: Instant,
    ) -> LayerCaps {
        let key = if !receiver_identity.is_empty() {
            receiver_identity
        } else if !request.sender_identity.is_empty() {
            &request.sender_identity
        } else {
            "unknown"
        };

        let caps = request.caps(&self.ceilings);

        debug!(
            "Cap from {}: {} reason {} loss {}",
            Pii(key),
            caps,
            request.reason,
            request.loss_rate
        );

        self.caps.insert(
            key.to_string(),
            PublisherCapEntry {
                caps,
                timestamp: now,
                reason: request.reason,
            },
        );

        self.apply_most_restrictive();

        let effective = self.effective_cap();

        self.outputs.push_back(ArbitratorOutput::Ack {
            destination: key.to_string(),
            ack: BitrateCapAck::new(effective.high, self.local_identity.clone()),
        });

        effective
    }

    /// Expire entries not refreshed within the TTL and reapply.
    pub fn tick_cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.caps.retain(|identity, entry| {
            let keep = now.saturating_duration_since(entry.timestamp) <= ttl;
            if !keep {
                debug!("Cap from {} expired", Pii(identity));
            }
            keep
        });

        if self.caps.is_empty() {
            if self.applied.is_some() {
                info!("All caps expired, restore {}", self.ceilings);
                self.applied = None;
                self.push_apply(self.ceilings);
            }
            return;
        }

        self.apply_most_restrictive();
    }

    /// Drop all entries and go back to the ceilings.
    pub fn clear(&mut self) {
        self.caps.clear();
        self.applied = None;
        self.push_apply(self.ceilings);
    }

    /// Next queued output. Call until `None` after every input.
    pub fn poll_output(&mut self) -> Option<ArbitratorOutput> {
        self.outputs.pop_front()
    }

    fn apply_most_restrictive(&mut self) {
        let cap = self
            .caps
            .values()
            .fold(self.ceilings, |acc, entry| acc.min(entry.caps));

        if self.applied == Some(cap) {
            return;
        }

        debug!("Apply arbitrated cap {}", cap);
        self.applied = Some(cap);
        self.push_apply(cap);
    }

    // A newer apply supersedes any not yet polled.
    fn push_apply(&mut self, caps: LayerCaps) {
        self.outputs.retain(|o| !matches!(o, ArbitratorOutput::Apply(_)));
        self.outputs.push_back(ArbitratorOutput::Apply(caps));
    }
}
