use std::time::Duration;

use crate::layer::LayerCaps;

/// Customized config for the estimator, arbitrator and watchdog.
///
/// ```
/// use std::time::Duration;
/// use simulcap::{CapArbitrator, ControlConfig};
///
/// let config = ControlConfig::new().set_cap_ttl(Duration::from_secs(20));
/// let arbitrator = CapArbitrator::with_config("publisher-1", &config);
/// ```
///
/// Configs implement [`Clone`] to help create one component per stream.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub(crate) default_caps: LayerCaps,
    pub(crate) cap_ttl: Duration,
    pub(crate) message_interval: Duration,
    pub(crate) ack_timeout: Duration,
    pub(crate) congestion_loss: f64,
    pub(crate) severe_loss: f64,
}

impl ControlConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        ControlConfig::default()
    }

    /// The uncapped per-layer ceilings.
    pub fn default_caps(&self) -> LayerCaps {
        self.default_caps
    }

    /// Set the uncapped per-layer ceilings.
    ///
    /// These are the values a publisher runs at when no receiver asks for less,
    /// and the upper bound of any cap a receiver can request.
    ///
    /// Defaults to 15Mbit/s, 5Mbit/s and 1.5Mbit/s.
    pub fn set_default_caps(mut self, caps: LayerCaps) -> Self {
        self.default_caps = caps;
        self
    }

    /// How long a receiver's cap lives on the publisher without a refresh.
    pub fn cap_ttl(&self) -> Duration {
        self.cap_ttl
    }

    /// Set how long a receiver's cap lives without a refresh.
    ///
    /// Defaults to 15s.
    pub fn set_cap_ttl(mut self, ttl: Duration) -> Self {
        self.cap_ttl = ttl;
        self
    }

    /// Minimum time between two cap requests from the same estimator.
    pub fn message_interval(&self) -> Duration {
        self.message_interval
    }

    /// Set the minimum time between two cap requests from the same estimator.
    ///
    /// Should be well below the cap TTL, or caps expire while the receiver is
    /// still congested. Defaults to 2s.
    pub fn set_message_interval(mut self, interval: Duration) -> Self {
        self.message_interval = interval;
        self
    }

    /// Time without an ack after which the estimator falls back to layer control.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Set the ack timeout.
    ///
    /// Defaults to 10s.
    pub fn set_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Per-tick loss rates classifying a tick as congested and severely congested.
    pub fn loss_thresholds(&self) -> (f64, f64) {
        (self.congestion_loss, self.severe_loss)
    }

    /// Set the per-tick loss rates for congestion and severe congestion.
    ///
    /// Defaults to 0.005 and 0.02.
    pub fn set_loss_thresholds(mut self, congestion: f64, severe: f64) -> Self {
        self.congestion_loss = congestion;
        self.severe_loss = severe;
        self
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_caps: LayerCaps::DEFAULT,
            cap_ttl: Duration::from_secs(15),
            message_interval: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(10),
            congestion_loss: 0.005,
            severe_loss: 0.02,
        }
    }
}
