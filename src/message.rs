//! Control messages exchanged between receivers and a publisher.
//!
//! Messages are JSON objects tagged with `type` and `version`:
//!
//! ```text
//! {"type":"bitrate-cap","version":1,"targetBitrateHigh":4500000,...}
//! {"type":"bitrate-cap-ack","version":1,"appliedBitrateHigh":4500000,"identity":"pub-1"}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::layer::LayerCaps;
use crate::rate::Bitrate;
use crate::util::lenient;
use crate::CapError;

/// The only protocol version understood.
pub const PROTOCOL_VERSION: u32 = 1;

/// Why a receiver sent a [`BitrateCapRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapReason {
    /// Loss above the congestion threshold.
    Congestion,
    /// Loss above the severe threshold.
    Severe,
    /// Cap raised by a probe step.
    Probe,
    /// Cap unchanged, refreshing the publisher's entry.
    Hold,
    /// Receiver is uncapped again.
    Restore,
    /// Anything else on the wire, including a missing or mistyped reason.
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for CapReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let reason = match lenient::string(deserializer)?.as_str() {
            "congestion" => CapReason::Congestion,
            "severe" => CapReason::Severe,
            "probe" => CapReason::Probe,
            "hold" => CapReason::Hold,
            "restore" => CapReason::Restore,
            _ => CapReason::Unknown,
        };
        Ok(reason)
    }
}

impl fmt::Display for CapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapReason::Congestion => "congestion",
            CapReason::Severe => "severe",
            CapReason::Probe => "probe",
            CapReason::Hold => "hold",
            CapReason::Restore => "restore",
            CapReason::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A receiver's view of the safe ceiling for the publisher's three layers.
///
/// All fields are optional on the way in, a publisher must tolerate partial or
/// out of range requests and clamp them (see [`LayerCaps::sanitize`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitrateCapRequest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bitrate_high: Option<Bitrate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bitrate_med: Option<Bitrate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bitrate_low: Option<Bitrate>,
    #[serde(default)]
    pub reason: CapReason,
    #[serde(default, deserialize_with = "loss_rate")]
    pub loss_rate: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub sender_identity: String,
}

impl BitrateCapRequest {
    pub fn new(
        caps: LayerCaps,
        reason: CapReason,
        loss_rate: f64,
        sender_identity: impl Into<String>,
    ) -> Self {
        BitrateCapRequest {
            version: PROTOCOL_VERSION,
            target_bitrate_high: Some(caps.high),
            target_bitrate_med: Some(caps.med),
            target_bitrate_low: Some(caps.low),
            reason,
            loss_rate: clamp_loss_rate(loss_rate),
            sender_identity: sender_identity.into(),
        }
    }

    /// The requested caps, clamped into the valid range.
    pub fn caps(&self, ceilings: &LayerCaps) -> LayerCaps {
        LayerCaps::sanitize(
            self.target_bitrate_high,
            self.target_bitrate_med,
            self.target_bitrate_low,
            ceilings,
        )
    }
}

/// Publisher's acknowledgement that it is honoring some cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitrateCapAck {
    #[serde(default = "default_version")]
    pub version: u32,
    pub applied_bitrate_high: Bitrate,
    #[serde(default, deserialize_with = "lenient::string")]
    pub identity: String,
}

impl BitrateCapAck {
    pub fn new(applied_bitrate_high: Bitrate, identity: impl Into<String>) -> Self {
        BitrateCapAck {
            version: PROTOCOL_VERSION,
            applied_bitrate_high,
            identity: identity.into(),
        }
    }
}

/// Any message of the bitrate control protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "bitrate-cap")]
    CapRequest(BitrateCapRequest),
    #[serde(rename = "bitrate-cap-ack")]
    CapAck(BitrateCapAck),
}

impl ControlMessage {
    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CapError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the JSON wire form. Messages of another version are rejected.
    pub fn decode(payload: &[u8]) -> Result<ControlMessage, CapError> {
        let message: ControlMessage = serde_json::from_slice(payload)?;

        let version = match &message {
            ControlMessage::CapRequest(v) => v.version,
            ControlMessage::CapAck(v) => v.version,
        };

        if version != PROTOCOL_VERSION {
            return Err(CapError::UnsupportedVersion(version));
        }

        Ok(message)
    }
}

impl From<BitrateCapRequest> for ControlMessage {
    fn from(v: BitrateCapRequest) -> Self {
        ControlMessage::CapRequest(v)
    }
}

impl From<BitrateCapAck> for ControlMessage {
    fn from(v: BitrateCapAck) -> Self {
        ControlMessage::CapAck(v)
    }
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

fn clamp_loss_rate(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn loss_rate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    lenient::number(deserializer).map(clamp_loss_rate)
}
