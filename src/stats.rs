//! Per-tick statistics samples.

use crate::layer::Rid;
use crate::rate::Bitrate;

/// One tick of inbound statistics for a subscribed video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverSample {
    /// Packets lost since the previous tick.
    pub delta_lost: i64,
    /// Received media rate over the tick.
    pub received: Bitrate,
}

impl ReceiverSample {
    pub fn new(delta_lost: i64, received: Bitrate) -> Self {
        ReceiverSample {
            delta_lost,
            received,
        }
    }

    /// Negative or non finite values read as "no signal".
    pub(crate) fn sanitized(&self) -> (f64, f64) {
        let lost = self.delta_lost.max(0) as f64;
        let kbps = self.received.as_kbps();
        let kbps = if kbps.is_finite() { kbps.max(0.0) } else { 0.0 };
        (lost, kbps)
    }
}

/// Why the encoder is currently not producing its configured quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LimitationReason {
    #[default]
    None,
    Bandwidth,
    Cpu,
    Other,
}

impl LimitationReason {
    /// Parse the `qualityLimitationReason` strings of the stats API.
    pub fn from_stats(s: &str) -> Self {
        match s {
            "none" | "" => LimitationReason::None,
            "bandwidth" => LimitationReason::Bandwidth,
            "cpu" => LimitationReason::Cpu,
            _ => LimitationReason::Other,
        }
    }
}

/// Outbound state of one simulcast layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSnapshot {
    pub rid: Option<Rid>,
    pub fps: f64,
    pub limitation: LimitationReason,
}

impl LayerSnapshot {
    pub fn new(rid: &str, fps: f64, limitation: LimitationReason) -> Self {
        LayerSnapshot {
            rid: Some(rid.into()),
            fps,
            limitation,
        }
    }
}

/// One tick of outbound statistics for a published video stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublisherSample {
    /// The transport's own bandwidth estimate, if it has one.
    pub bwe: Option<Bitrate>,
    /// Total outbound send rate.
    pub total_send: Bitrate,
    pub layers: Vec<LayerSnapshot>,
}

/// Pull based feed of samples, polled once per tick.
pub trait StatsSource {
    type Sample;

    /// The sample for this tick. `None` when the transport has nothing yet.
    fn poll_sample(&mut self) -> Option<Self::Sample>;
}
