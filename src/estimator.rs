//! Receiver side congestion estimator.
//!
//! One instance per subscribed video stream. Each tick it is fed the packets lost
//! since the previous tick and the received rate, runs a small AIMD state machine
//! and decides whether the publisher should be asked to cap its layers.
//!
//! ```text
//!             congestion                   first clean
//!   Idle ──────────────────▶ BackingOff ─────────────────▶ Idle (restore)
//!                              │    ▲
//!                    2 clean   │    │ congestion
//!                              ▼    │
//!                            Probing ───── 3 clean / ceiling ──▶ Idle (restore)
//! ```
//!
//! The first clean tick after any congested run restores right away, so the
//! `Probing` branch only runs for a controller already placed in that phase.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::ControlConfig;
use crate::layer::LayerCaps;
use crate::message::{BitrateCapRequest, CapReason};
use crate::rate::Bitrate;
use crate::stats::ReceiverSample;

/// Number of ticks kept for the loss and throughput averages.
const HISTORY_LEN: usize = 10;

/// Per step decay of the loss EWMA, the newest sample weighs the most.
const LOSS_DECAY: f64 = 0.7;

/// Assumed RTP packet size when turning a rate into a packet count.
const PACKET_SIZE_BYTES: f64 = 1200.0;

/// The packet estimate covers this many ticks.
const PACKET_WINDOW_TICKS: f64 = 3.0;

/// Lower bound of the per-tick packet estimate.
const MIN_PACKETS_PER_TICK: f64 = 100.0;

const BACKOFF_FACTOR: f64 = 0.7;
const SEVERE_FACTOR: f64 = 0.5;

/// No backoff goes below this.
const MIN_CAP_HIGH: Bitrate = Bitrate::mbps(1);

/// Additive increase per clean tick while probing.
pub const PROBE_STEP: Bitrate = Bitrate::mbps(3);

const CLEAN_TICKS_TO_PROBE: u32 = 2;
const CLEAN_TICKS_TO_RESTORE: u32 = 3;

/// Where the AIMD state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbePhase {
    #[default]
    Idle,
    BackingOff,
    Probing,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePhase::Idle => write!(f, "idle"),
            ProbePhase::BackingOff => write!(f, "backing-off"),
            ProbePhase::Probing => write!(f, "probing"),
        }
    }
}

/// Result of one [`CongestionEstimator::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorOutput {
    /// Message to send to the publisher, if any.
    pub outbound: Option<BitrateCapRequest>,
    /// Keep the subscription on the high layer while capped, the publisher
    /// lowers the bitrate instead.
    pub lock_high_layer: bool,
    /// The publisher never acknowledged a cap. Stop relying on sender side
    /// shaping and switch receive layers instead.
    pub fallback_to_layers: bool,
    pub current_cap_high: Bitrate,
    pub capped: bool,
}

/// Per stream AIMD controller on the receiving side.
#[derive(Debug)]
pub struct CongestionEstimator {
    ceilings: LayerCaps,
    message_interval: Duration,
    ack_timeout: Duration,
    congestion_loss: f64,
    severe_loss: f64,

    loss_history: VecDeque<f64>,
    kbps_history: VecDeque<f64>,
    current_cap_high: Bitrate,
    capped: bool,
    phase: ProbePhase,
    clean_ticks: u32,
    last_cap_sent: Option<Instant>,
    first_cap_sent: Option<Instant>,
    ack_received: bool,
    fallback_to_layers: bool,
}

impl CongestionEstimator {
    pub fn new() -> Self {
        Self::with_config(&ControlConfig::default())
    }

    pub fn with_config(config: &ControlConfig) -> Self {
        CongestionEstimator {
            ceilings: config.default_caps,
            message_interval: config.message_interval,
            ack_timeout: config.ack_timeout,
            congestion_loss: config.congestion_loss,
            severe_loss: config.severe_loss,
            loss_history: VecDeque::with_capacity(HISTORY_LEN + 1),
            kbps_history: VecDeque::with_capacity(HISTORY_LEN + 1),
            current_cap_high: config.default_caps.high,
            capped: false,
            phase: ProbePhase::Idle,
            clean_ticks: 0,
            last_cap_sent: None,
            first_cap_sent: None,
            ack_received: false,
            fallback_to_layers: false,
        }
    }

    /// The publisher acknowledged a cap.
    pub fn mark_ack_received(&mut self) {
        self.ack_received = true;
    }

    /// Back to the state of a fresh subscription.
    pub fn reset(&mut self) {
        let config = ControlConfig {
            default_caps: self.ceilings,
            message_interval: self.message_interval,
            ack_timeout: self.ack_timeout,
            congestion_loss: self.congestion_loss,
            severe_loss: self.severe_loss,
            ..ControlConfig::default()
        };
        *self = Self::with_config(&config);
    }

    pub fn current_cap_high(&self) -> Bitrate {
        self.current_cap_high
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }

    pub fn phase(&self) -> ProbePhase {
        self.phase
    }

    /// Feed one tick of statistics.
    ///
    /// Never fails. Negative or non finite inputs count as zero.
    pub fn update(
        &mut self,
        sample: ReceiverSample,
        local_identity: &str,
        now: Instant,
    ) -> EstimatorOutput {
        let (lost, kbps) = sample.sanitized();

        push_bounded(&mut self.loss_history, lost);
        push_bounded(&mut self.kbps_history, kbps);

        let ewma_loss = loss_ewma(&self.loss_history);
        let avg_kbps = average(&self.kbps_history);
        let window_packets = avg_kbps * 1000.0 / 8.0 / PACKET_SIZE_BYTES * PACKET_WINDOW_TICKS;

        let mut loss_rate = 0.0;
        if avg_kbps > 0.0 && ewma_loss > 0.0 {
            loss_rate = ewma_loss / (window_packets + ewma_loss).max(1.0);
        }

        let packets_per_tick = window_packets.max(MIN_PACKETS_PER_TICK);
        let tick_loss = lost / packets_per_tick;
        let congestion = tick_loss > self.congestion_loss;
        let severe = tick_loss > self.severe_loss;

        if congestion {
            self.on_congestion(avg_kbps, severe, tick_loss);
        } else {
            self.on_clean();
        }

        let mut outbound = None;

        let due = self
            .last_cap_sent
            .map(|t| now.saturating_duration_since(t) >= self.message_interval)
            .unwrap_or(true);

        if self.capped && due {
            self.last_cap_sent = Some(now);
            self.first_cap_sent.get_or_insert(now);

            let reason = if severe {
                CapReason::Severe
            } else if congestion {
                CapReason::Congestion
            } else if self.phase == ProbePhase::Probing {
                CapReason::Probe
            } else {
                CapReason::Hold
            };

            let caps = LayerCaps::from_high(self.current_cap_high);
            debug!("Send cap {} reason {} phase {}", caps, reason, self.phase);

            let loss_rate = (loss_rate * 1000.0).round() / 1000.0;
            outbound = Some(BitrateCapRequest::new(
                caps,
                reason,
                loss_rate,
                local_identity,
            ));
        }

        if !self.capped && self.last_cap_sent.is_some() {
            debug!("Send restore {}", self.ceilings);
            outbound = Some(BitrateCapRequest::new(
                self.ceilings,
                CapReason::Restore,
                0.0,
                local_identity,
            ));
            self.last_cap_sent = None;
            self.first_cap_sent = None;
        }

        if self.capped && !self.ack_received && !self.fallback_to_layers {
            if let Some(first) = self.first_cap_sent {
                if now.saturating_duration_since(first) >= self.ack_timeout {
                    info!(
                        "No cap ack after {:?}, falling back to layer control",
                        self.ack_timeout
                    );
                    self.fallback_to_layers = true;
                }
            }
        }

        EstimatorOutput {
            outbound,
            lock_high_layer: self.capped,
            fallback_to_layers: self.fallback_to_layers,
            current_cap_high: self.current_cap_high,
            capped: self.capped,
        }
    }

    fn on_congestion(&mut self, avg_kbps: f64, severe: bool, tick_loss: f64) {
        self.clean_ticks = 0;
        self.phase = ProbePhase::BackingOff;

        let received = Bitrate::from(avg_kbps * 1000.0);

        let mut target = if self.capped {
            self.current_cap_high * BACKOFF_FACTOR
        } else {
            received * BACKOFF_FACTOR
        };

        if severe {
            target = received * SEVERE_FACTOR;
        }

        let mut target = target.round().clamp(MIN_CAP_HIGH, self.ceilings.high);

        // A congested tick never loosens a cap already in force.
        if self.capped {
            target = target.min(self.current_cap_high);
        }

        debug!(
            "Congestion loss {:.2}% severe {} cap {} -> {}",
            tick_loss * 100.0,
            severe,
            self.current_cap_high,
            target
        );

        self.current_cap_high = target;
        self.capped = true;
    }

    fn on_clean(&mut self) {
        self.clean_ticks += 1;

        if !self.capped {
            return;
        }

        let burst = self.phase == ProbePhase::BackingOff && self.clean_ticks == 1;

        if burst {
            debug!("Loss cleared, restore immediately");
            self.reset_to_default();
        } else if self.clean_ticks >= CLEAN_TICKS_TO_RESTORE {
            debug!("{} clean ticks, restore", self.clean_ticks);
            self.reset_to_default();
        } else if self.phase == ProbePhase::BackingOff && self.clean_ticks >= CLEAN_TICKS_TO_PROBE {
            self.phase = ProbePhase::Probing;
            self.probe_step();
        } else if self.phase == ProbePhase::Probing {
            self.probe_step();
        }
    }

    fn probe_step(&mut self) {
        let next = Bitrate::from(self.current_cap_high.as_f64() + PROBE_STEP.as_f64());

        if next >= self.ceilings.high {
            debug!("Probe reached ceiling, restore");
            self.reset_to_default();
        } else {
            debug!("Probe {} -> {}", self.current_cap_high, next);
            self.current_cap_high = next;
        }
    }

    fn reset_to_default(&mut self) {
        self.current_cap_high = self.ceilings.high;
        self.capped = false;
        self.phase = ProbePhase::Idle;
        self.loss_history.clear();
        self.kbps_history.clear();
    }
}

impl Default for CongestionEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(history: &mut VecDeque<f64>, v: f64) {
    history.push_back(v);
    while history.len() > HISTORY_LEN {
        history.pop_front();
    }
}

fn average(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn loss_ewma(values: &VecDeque<f64>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }

    let mut weighted = 0.0;
    let mut weight_sum = 0.0;

    for (i, v) in values.iter().enumerate() {
        let weight = LOSS_DECAY.powi((len - 1 - i) as i32);
        weighted += v * weight;
        weight_sum += weight;
    }

    if weight_sum > 0.0 {
        weighted / weight_sum
    } else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ID: &str = "viewer-a";

    fn tick(
        e: &mut CongestionEstimator,
        start: Instant,
        ms: u64,
        lost: i64,
        kbps: u64,
    ) -> EstimatorOutput {
        e.update(
            ReceiverSample::new(lost, Bitrate::kbps(kbps)),
            ID,
            start + Duration::from_millis(ms),
        )
    }

    #[test]
    fn loss_ewma_weights_recent() {
        let v: VecDeque<f64> = [0.0, 10.0].into_iter().collect();
        // (0 * 0.7 + 10 * 1) / 1.7
        assert!((loss_ewma(&v) - 10.0 / 1.7).abs() < 1e-9);
        assert_eq!(loss_ewma(&VecDeque::new()), 0.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();
        for i in 0..25 {
            tick(&mut e, now, i * 1000, 0, 2_000);
        }
        assert_eq!(e.loss_history.len(), HISTORY_LEN);
        assert_eq!(e.kbps_history.len(), HISTORY_LEN);
    }

    #[test]
    fn burst_backs_off_and_restores() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        let out = tick(&mut e, now, 10_000, 40, 3_000);
        assert!(out.capped);
        assert!(out.lock_high_layer);
        assert_eq!(out.current_cap_high, Bitrate::kbps(1_500));
        let msg = out.outbound.unwrap();
        assert_eq!(msg.reason, CapReason::Severe);
        assert_eq!(msg.target_bitrate_high, Some(Bitrate::kbps(1_500)));
        assert_eq!(msg.target_bitrate_med, Some(Bitrate::kbps(495)));
        assert_eq!(msg.target_bitrate_low, Some(Bitrate::kbps(150)));
        assert_eq!(msg.sender_identity, ID);

        let out = tick(&mut e, now, 12_500, 0, 3_200);
        assert!(!out.capped);
        assert_eq!(out.current_cap_high, LayerCaps::DEFAULT.high);
        let msg = out.outbound.unwrap();
        assert_eq!(msg.reason, CapReason::Restore);
        assert_eq!(msg.target_bitrate_high, Some(LayerCaps::DEFAULT.high));

        let out = tick(&mut e, now, 15_000, 0, 3_300);
        assert!(!out.capped);
        assert!(out.outbound.is_none());
    }

    #[test]
    fn mild_congestion_backs_off_from_received_rate() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        // 3000kbps is 937.5 packets per tick, 8 lost is ~0.85%.
        let out = tick(&mut e, now, 0, 8, 3_000);
        assert!(out.capped);
        assert_eq!(out.current_cap_high, Bitrate::kbps(2_100));
        assert_eq!(out.outbound.unwrap().reason, CapReason::Congestion);
    }

    #[test]
    fn low_rate_is_floored() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        // Idle stream, packet estimate floored at 100, 1 lost is 1%.
        let out = tick(&mut e, now, 0, 1, 50);
        assert!(out.capped);
        assert_eq!(out.current_cap_high, MIN_CAP_HIGH);
    }

    #[test]
    fn ceiling_below_minimum_backoff() {
        let config = ControlConfig::new().set_default_caps(LayerCaps::new(
            Bitrate::kbps(800),
            Bitrate::kbps(400),
            Bitrate::kbps(150),
        ));
        let mut e = CongestionEstimator::with_config(&config);
        let now = Instant::now();

        let out = tick(&mut e, now, 0, 40, 3_000);
        assert!(out.capped);
        assert_eq!(out.current_cap_high, Bitrate::kbps(800));

        let out = tick(&mut e, now, 2_500, 40, 3_000);
        assert_eq!(out.current_cap_high, Bitrate::kbps(800));
    }

    #[test]
    fn sub_threshold_loss_is_clean() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        // 4 of 937.5 is ~0.43%
        let out = tick(&mut e, now, 0, 4, 3_000);
        assert!(!out.capped);
        assert!(out.outbound.is_none());
    }

    #[test]
    fn malformed_input_is_no_signal() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        let out = e.update(ReceiverSample::new(-50, Bitrate::from(f64::NAN)), ID, now);
        assert!(!out.capped);
        assert!(out.outbound.is_none());
        assert_eq!(out.current_cap_high, LayerCaps::DEFAULT.high);
    }

    #[test]
    fn severe_ticks_never_raise_cap() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        let mut prev = e.current_cap_high();
        let rates = [3_000, 8_000, 12_000, 9_000, 20_000, 6_000];
        for (i, kbps) in rates.iter().enumerate() {
            let out = tick(&mut e, now, i as u64 * 2_000, 500, *kbps);
            assert!(out.capped);
            assert!(out.current_cap_high <= prev);
            prev = out.current_cap_high;
        }
    }

    #[test]
    fn sustained_congestion_restores_on_first_clean_tick() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        tick(&mut e, now, 0, 40, 3_000);
        let out = tick(&mut e, now, 2_500, 10, 3_000);
        assert_eq!(out.current_cap_high, Bitrate::kbps(1_050));
        assert_eq!(out.outbound.unwrap().reason, CapReason::Congestion);

        let out = tick(&mut e, now, 5_000, 0, 3_000);
        assert!(!out.capped);
        assert!(!out.lock_high_layer);
        assert_eq!(e.phase(), ProbePhase::Idle);
        assert_eq!(out.current_cap_high, LayerCaps::DEFAULT.high);
        assert_eq!(out.outbound.unwrap().reason, CapReason::Restore);

        // Only one restore per episode.
        let out = tick(&mut e, now, 7_500, 0, 3_000);
        assert!(out.outbound.is_none());
    }

    #[test]
    fn long_congestion_restores_on_first_clean_tick() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        for i in 0..6 {
            let out = tick(&mut e, now, i * 2_500, 300, 4_000);
            assert!(out.capped);
        }

        let out = tick(&mut e, now, 15_000, 0, 4_000);
        assert!(!out.capped);
        assert_eq!(out.outbound.unwrap().reason, CapReason::Restore);
    }

    fn stepping_from(e: &mut CongestionEstimator, cap: Bitrate) {
        e.phase = ProbePhase::Probing;
        e.capped = true;
        e.clean_ticks = 0;
        e.current_cap_high = cap;
    }

    #[test]
    fn additive_steps_then_restore() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();
        stepping_from(&mut e, Bitrate::mbps(1));

        let out = tick(&mut e, now, 0, 0, 3_000);
        assert!(out.capped);
        assert_eq!(e.phase(), ProbePhase::Probing);
        assert_eq!(out.current_cap_high, Bitrate::mbps(4));
        assert_eq!(out.outbound.unwrap().reason, CapReason::Probe);

        let out = tick(&mut e, now, 2_500, 0, 3_000);
        assert!(out.capped);
        assert_eq!(out.current_cap_high, Bitrate::mbps(7));
        assert_eq!(out.outbound.unwrap().reason, CapReason::Probe);

        // Third clean tick restores no matter how far below the ceiling.
        let out = tick(&mut e, now, 5_000, 0, 3_000);
        assert!(!out.capped);
        assert_eq!(e.phase(), ProbePhase::Idle);
        assert_eq!(out.current_cap_high, LayerCaps::DEFAULT.high);
        assert_eq!(out.outbound.unwrap().reason, CapReason::Restore);
    }

    #[test]
    fn step_reaching_ceiling_restores() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();
        stepping_from(&mut e, Bitrate::mbps(10));

        let out = tick(&mut e, now, 0, 0, 3_000);
        assert_eq!(out.current_cap_high, Bitrate::mbps(13));
        assert!(out.capped);

        // 13M + 3M would pass the 15M ceiling.
        let out = tick(&mut e, now, 2_500, 0, 3_000);
        assert!(!out.capped);
        assert_eq!(out.current_cap_high, LayerCaps::DEFAULT.high);
        assert_eq!(out.outbound.unwrap().reason, CapReason::Restore);
    }

    #[test]
    fn step_reaching_configured_ceiling_restores() {
        let config = ControlConfig::new().set_default_caps(LayerCaps::new(
            Bitrate::mbps(4),
            Bitrate::mbps(2),
            Bitrate::kbps(500),
        ));
        let mut e = CongestionEstimator::with_config(&config);
        let now = Instant::now();
        stepping_from(&mut e, Bitrate::kbps(1_050));

        // 1.05M + 3M reaches the 4M ceiling.
        let out = tick(&mut e, now, 0, 0, 3_000);
        assert!(!out.capped);
        assert_eq!(out.current_cap_high, Bitrate::mbps(4));
    }

    #[test]
    fn congestion_after_step_backs_off_again() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();
        stepping_from(&mut e, Bitrate::mbps(2));

        let out = tick(&mut e, now, 0, 0, 3_000);
        assert_eq!(out.current_cap_high, Bitrate::mbps(5));

        // 300 of 937.5 packets is severe, 3000kbps * 0.5.
        let out = tick(&mut e, now, 2_500, 300, 3_000);
        assert!(out.capped);
        assert_eq!(e.phase(), ProbePhase::BackingOff);
        assert!(out.current_cap_high <= Bitrate::mbps(5));
        assert_eq!(out.current_cap_high, Bitrate::kbps(1_500));
        assert_eq!(out.outbound.unwrap().reason, CapReason::Severe);

        // Back in the backoff phase, the next clean tick restores.
        let out = tick(&mut e, now, 5_000, 0, 3_000);
        assert!(!out.capped);
        assert_eq!(out.outbound.unwrap().reason, CapReason::Restore);
    }

    #[test]
    fn messages_are_throttled() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        let mut sent = vec![];
        for i in 0..40 {
            let ms = i * 500;
            let out = tick(&mut e, now, ms, 300, 4_000);
            if out.outbound.is_some() {
                sent.push(ms);
            }
        }

        assert_eq!(sent.len(), 10);
        for w in sent.windows(2) {
            assert!(w[1] - w[0] >= 2_000);
        }
    }

    #[test]
    fn fallback_without_ack() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        let out = tick(&mut e, now, 3_000, 20, 2_000);
        assert!(out.capped);
        assert!(!out.fallback_to_layers);

        let out = tick(&mut e, now, 12_000, 20, 2_000);
        assert!(!out.fallback_to_layers);

        let out = tick(&mut e, now, 14_100, 10, 2_000);
        assert!(out.capped);
        assert!(out.fallback_to_layers);

        let out = tick(&mut e, now, 16_000, 30, 2_000);
        assert!(out.fallback_to_layers);
    }

    #[test]
    fn ack_prevents_fallback() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        tick(&mut e, now, 0, 20, 2_000);
        e.mark_ack_received();
        let out = tick(&mut e, now, 20_000, 20, 2_000);
        assert!(out.capped);
        assert!(!out.fallback_to_layers);
    }

    #[test]
    fn reset_clears_everything() {
        let mut e = CongestionEstimator::new();
        let now = Instant::now();

        tick(&mut e, now, 0, 20, 2_000);
        tick(&mut e, now, 11_000, 20, 2_000);
        assert!(e.fallback_to_layers);

        e.reset();
        assert!(!e.is_capped());
        assert!(!e.fallback_to_layers);
        assert!(e.loss_history.is_empty());
        assert_eq!(e.current_cap_high(), LayerCaps::DEFAULT.high);

        // A fresh episode sends immediately.
        let out = tick(&mut e, now, 11_500, 20, 2_000);
        assert!(out.outbound.is_some());
    }
}
