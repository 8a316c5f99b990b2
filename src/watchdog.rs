//! Publisher side layer starvation watchdog.
//!
//! The transport's own bandwidth estimator can get stuck low, or pause the top
//! simulcast layer entirely, in ways no receiver cap would ever undo. The watchdog
//! looks at the outbound stats of one stream every tick and nudges the sender with
//! escalating actions when it sees such a pattern.

use std::fmt;

use crate::config::ControlConfig;
use crate::layer::{Layer, LayerCaps};
use crate::rate::Bitrate;
use crate::sender::SendParameters;
use crate::stats::{LayerSnapshot, LimitationReason, PublisherSample};

/// Estimate below which the transport is considered stuck.
const KICK_BWE: Bitrate = Bitrate::kbps(2_000);
/// Send rate below which the transport is considered stuck.
const KICK_SEND: Bitrate = Bitrate::kbps(1_000);
const KICK_TICKS: u32 = 5;

const RESCUE_TICKS: u32 = 3;
const HARD_RESCUE_TICKS: u32 = 15;

/// Estimate at which a disabled low layer comes back early.
const RESTORE_LOW_BWE: Bitrate = Bitrate::kbps(10_000);
const RESTORE_LOW_TICKS: u32 = 10;

const HARD_RESCUE_FPS_HIGH: f64 = 60.0;
const HARD_RESCUE_FPS_LOW: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogActionKind {
    /// Reassert all layer bitrates to unstick the transport's estimate.
    Kick,
    /// Disable the low layer and reassert the high layer.
    Rescue,
    /// Force every layer back on with raised framerate ceilings.
    HardRescue,
    /// Bring back the low layer disabled by a rescue.
    RestoreLow,
}

impl fmt::Display for WatchdogActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogActionKind::Kick => write!(f, "kick"),
            WatchdogActionKind::Rescue => write!(f, "rescue"),
            WatchdogActionKind::HardRescue => write!(f, "hard-rescue"),
            WatchdogActionKind::RestoreLow => write!(f, "restore-low"),
        }
    }
}

/// Something the watchdog wants done to the sender.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogAction {
    pub kind: WatchdogActionKind,
    /// Bitrates to reassert, the currently applied cap or the configured ceilings.
    pub caps: LayerCaps,
}

impl WatchdogAction {
    /// Apply the action to the sender's parameters.
    pub fn apply(&self, params: &mut SendParameters) {
        let caps = &self.caps;

        match self.kind {
            WatchdogActionKind::Kick => {
                params.set_max_bitrates(caps);
            }
            WatchdogActionKind::Rescue => {
                if let Some(e) = params.encoding_mut(Layer::Low) {
                    e.active = false;
                }
                if let Some(e) = params.encoding_mut(Layer::High) {
                    e.active = true;
                    e.max_bitrate = Some(caps.high);
                }
            }
            WatchdogActionKind::HardRescue => {
                for e in &mut params.encodings {
                    e.active = true;
                }
                for layer in Layer::ALL {
                    let fps = match layer {
                        Layer::Low => HARD_RESCUE_FPS_LOW,
                        _ => HARD_RESCUE_FPS_HIGH,
                    };
                    if let Some(e) = params.encoding_mut(layer) {
                        e.max_bitrate = Some(caps.get(layer));
                        e.max_framerate = Some(fps);
                    }
                }
            }
            WatchdogActionKind::RestoreLow => {
                if let Some(e) = params.encoding_mut(Layer::Low) {
                    e.active = true;
                    e.max_bitrate = Some(caps.low);
                }
            }
        }
    }
}

/// Per stream starvation detector.
#[derive(Debug, Default)]
pub struct LayerHealthWatchdog {
    ceilings: LayerCaps,
    bwe_low_ticks: u32,
    kick_attempted: bool,
    high_paused_ticks: u32,
    low_layer_disabled: bool,
    low_restore_checks: u32,
}

impl LayerHealthWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ControlConfig) -> Self {
        LayerHealthWatchdog {
            ceilings: config.default_caps,
            ..Self::default()
        }
    }

    /// Whether a rescue has disabled the low layer and it is not yet restored.
    pub fn is_low_layer_disabled(&self) -> bool {
        self.low_layer_disabled
    }

    /// Forget everything, as for a new stream. The ceilings are kept.
    pub fn reset(&mut self) {
        *self = LayerHealthWatchdog {
            ceilings: self.ceilings,
            ..Self::default()
        };
    }

    /// Evaluate one tick of outbound stats.
    ///
    /// `applied` is the cap currently enforced by the arbitrator, `None` when uncapped,
    /// in which case the configured ceilings are reasserted. Returned actions are in
    /// the order they should be applied.
    pub fn evaluate(
        &mut self,
        sample: &PublisherSample,
        applied: Option<LayerCaps>,
    ) -> Vec<WatchdogAction> {
        let caps = applied.unwrap_or(self.ceilings);
        let mut actions = Vec::new();

        let mut push = |kind: WatchdogActionKind| {
            info!("Watchdog {}: {}", kind, caps);
            actions.push(WatchdogAction { kind, caps });
        };

        let starved = sample.bwe.map(|b| b < KICK_BWE).unwrap_or(false)
            && sample.total_send < KICK_SEND;

        if !self.kick_attempted && starved {
            self.bwe_low_ticks += 1;
            if self.bwe_low_ticks >= KICK_TICKS {
                self.kick_attempted = true;
                push(WatchdogActionKind::Kick);
            }
        } else {
            self.bwe_low_ticks = 0;
        }

        if is_high_paused(&sample.layers) {
            self.high_paused_ticks += 1;
        } else {
            self.high_paused_ticks = 0;
        }

        if self.high_paused_ticks == RESCUE_TICKS {
            self.low_layer_disabled = true;
            self.low_restore_checks = 0;
            push(WatchdogActionKind::Rescue);
        }

        if self.high_paused_ticks == HARD_RESCUE_TICKS {
            self.high_paused_ticks = 0;
            push(WatchdogActionKind::HardRescue);
        }

        if self.low_layer_disabled {
            self.low_restore_checks += 1;
            let recovered = sample.bwe.map(|b| b >= RESTORE_LOW_BWE).unwrap_or(false);
            if recovered || self.low_restore_checks >= RESTORE_LOW_TICKS {
                self.low_layer_disabled = false;
                self.low_restore_checks = 0;
                push(WatchdogActionKind::RestoreLow);
            }
        }

        actions
    }
}

/// The top layer is produced at zero fps because of bandwidth, while other
/// layers exist that it could give way to.
fn is_high_paused(layers: &[LayerSnapshot]) -> bool {
    if layers.len() <= 1 {
        return false;
    }

    let high = layers
        .iter()
        .find(|l| {
            l.rid
                .map(|r| &*r == "f" || &*r == "single")
                .unwrap_or(false)
        })
        .or_else(|| layers.first());

    let Some(high) = high else {
        return false;
    };

    high.fps == 0.0 && high.limitation == LimitationReason::Bandwidth
}
