//! Simulcast layers and per-layer bitrate caps.

use std::fmt;
use std::ops::Deref;
use std::str::from_utf8;

use serde::{Deserialize, Serialize};

use crate::rate::Bitrate;

/// Lowest high layer bitrate a receiver can ask for.
pub const FLOOR_HIGH: Bitrate = Bitrate::kbps(500);
/// Lowest medium layer bitrate a receiver can ask for.
pub const FLOOR_MED: Bitrate = Bitrate::kbps(300);
/// Lowest low layer bitrate a receiver can ask for.
pub const FLOOR_LOW: Bitrate = Bitrate::kbps(200);

/// Medium layer share of the high layer when a cap is derived from the high target.
pub(crate) const MED_SHARE: f64 = 0.33;
/// Low layer share of the high layer when a cap is derived from the high target.
pub(crate) const LOW_SHARE: f64 = 0.1;

/// Simulcast restriction identifier, the `rid` of an encoding.
///
/// Short ASCII identifier, at most 8 characters. Non alphanumeric characters
/// are replaced with `_`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid([u8; 8]);

impl Rid {
    pub const fn from_array(a: [u8; 8]) -> Rid {
        Rid(a)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &str = self;
        write!(f, "{}", s)
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &str = self;
        write!(f, "Rid({})", s)
    }
}

impl Deref for Rid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        // Only ASCII is ever stored, see From<&str>.
        from_utf8(&self.0).unwrap_or_default().trim()
    }
}

impl<'a> From<&'a str> for Rid {
    fn from(v: &'a str) -> Self {
        let v = v
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();

        let bytes = v.as_bytes();
        let bytes = &bytes[0..8.min(bytes.len())];

        // pad with space.
        let mut array = [b' '; 8];

        let max = bytes.len().min(array.len());
        array[0..max].copy_from_slice(bytes);

        Rid(array)
    }
}

/// The three simulcast quality layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Full resolution, rid `f`.
    High,
    /// Half resolution, rid `h`.
    Medium,
    /// Quarter resolution, rid `q`.
    Low,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::High, Layer::Medium, Layer::Low];

    pub fn rid(&self) -> Rid {
        match self {
            Layer::High => "f".into(),
            Layer::Medium => "h".into(),
            Layer::Low => "q".into(),
        }
    }

    pub fn from_rid(rid: &str) -> Option<Layer> {
        match rid {
            "f" => Some(Layer::High),
            "h" => Some(Layer::Medium),
            "q" => Some(Layer::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rid())
    }
}

/// Bitrate ceilings for the high, medium and low layer of one publisher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerCaps {
    pub high: Bitrate,
    pub med: Bitrate,
    pub low: Bitrate,
}

impl LayerCaps {
    /// The uncapped ceilings.
    pub const DEFAULT: LayerCaps = LayerCaps {
        high: Bitrate::kbps(15_000),
        med: Bitrate::kbps(5_000),
        low: Bitrate::kbps(1_500),
    };

    pub const fn new(high: Bitrate, med: Bitrate, low: Bitrate) -> Self {
        LayerCaps { high, med, low }
    }

    /// Derive medium and low from a high layer target.
    pub fn from_high(high: Bitrate) -> Self {
        let high = high.round();
        LayerCaps {
            high,
            med: (high * MED_SHARE).round(),
            low: (high * LOW_SHARE).round(),
        }
    }

    pub fn get(&self, layer: Layer) -> Bitrate {
        match layer {
            Layer::High => self.high,
            Layer::Medium => self.med,
            Layer::Low => self.low,
        }
    }

    /// Element-wise minimum.
    pub fn min(self, other: LayerCaps) -> LayerCaps {
        LayerCaps {
            high: self.high.min(other.high),
            med: self.med.min(other.med),
            low: self.low.min(other.low),
        }
    }

    /// Turn a possibly partial, possibly out of range request into valid caps.
    ///
    /// Missing medium/low values are derived from the high value. Every layer is then
    /// clamped between its floor and the matching ceiling, and the layer ordering
    /// high > med > low is enforced.
    pub fn sanitize(
        high: Option<Bitrate>,
        med: Option<Bitrate>,
        low: Option<Bitrate>,
        ceilings: &LayerCaps,
    ) -> LayerCaps {
        let high = high
            .unwrap_or(ceilings.high)
            .clamp(FLOOR_HIGH, ceilings.high)
            .round();
        let mut med = med
            .unwrap_or_else(|| (high * MED_SHARE).round())
            .clamp(FLOOR_MED, ceilings.med)
            .round();
        let mut low = low
            .unwrap_or_else(|| (high * LOW_SHARE).round())
            .clamp(FLOOR_LOW, ceilings.low)
            .round();

        if med >= high {
            med = (high * 0.6).round();
        }
        if low >= med {
            low = (med * 0.5).round();
        }

        LayerCaps { high, med, low }
    }
}

impl Default for LayerCaps {
    fn default() -> Self {
        LayerCaps::DEFAULT
    }
}

impl fmt::Display for LayerCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f={} h={} q={}", self.high, self.med, self.low)
    }
}
