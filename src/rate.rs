use std::fmt;
use std::ops::Mul;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::util::lenient;

/// A data rate expressed as bits per second(bps).
///
/// Internally the value is tracked as a floating point number for accuracy in the presence of
/// repeated calculations that can yield decimal values. On the wire it is always an integer.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
pub struct Bitrate(f64);

impl Bitrate {
    pub const ZERO: Self = Self::new(0);

    pub const fn new(bps: u64) -> Self {
        Bitrate(bps as f64)
    }

    pub const fn kbps(kbps: u64) -> Self {
        Self::new(kbps * 10_u64.pow(3))
    }

    pub const fn mbps(mbps: u64) -> Self {
        Self::new(mbps * 10_u64.pow(6))
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Nearest whole bits per second, saturating at zero.
    pub fn as_u64(&self) -> u64 {
        if !self.is_valid() {
            return 0;
        }
        self.0.max(0.0).round() as u64
    }

    pub fn as_kbps(&self) -> f64 {
        self.0 / 1000.0
    }

    /// Round to whole bits per second.
    pub fn round(&self) -> Self {
        Self(self.0.round())
    }

    /// Clamp into `[min, max]`. A non finite value becomes `min`.
    ///
    /// When `min` is above `max` the range collapses to `max`.
    pub fn clamp(&self, min: Self, max: Self) -> Self {
        let min = min.min(max);
        if !self.is_valid() {
            return min;
        }
        Self(self.0.max(min.0).min(max.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_finite()
    }
}

impl From<u64> for Bitrate {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<f64> for Bitrate {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Mul<f64> for Bitrate {
    type Output = Bitrate;

    fn mul(self, rhs: f64) -> Self::Output {
        Bitrate(self.0 * rhs)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self.0;
        if rate < 1.0 {
            return write!(f, "{rate}bit/s");
        }
        let log = rate.log10().floor() as u64;

        match log {
            0..=2 => write!(f, "{rate}bit/s"),
            3..=5 => write!(f, "{:.3}kbit/s", rate / 10.0_f64.powf(3.0)),
            6..=8 => write!(f, "{:.3}Mbit/s", rate / 10.0_f64.powf(6.0)),
            9.. => write!(f, "{:.3}Gbit/s", rate / 10.0_f64.powf(9.0)),
        }
    }
}

impl Serialize for Bitrate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

impl<'de> Deserialize<'de> for Bitrate {
    // Range checks happen where the value is used. Non numbers become NaN.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient::number(deserializer).map(Bitrate)
    }
}
