//! The encoder control port of an outgoing video stream.
//!
//! This layer never owns the encoder. It reads the current per-layer encoding
//! parameters, changes `max_bitrate`, `max_framerate` and `active` on the layers it
//! knows about, and writes them back. Writes are best effort.

use crate::layer::{Layer, LayerCaps, Rid};
use crate::rate::Bitrate;
use crate::CapError;

/// Encoding parameters of one simulcast layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingParameters {
    /// Simulcast rid, `None` when the sender is not using simulcast.
    pub rid: Option<Rid>,
    pub max_bitrate: Option<Bitrate>,
    pub max_framerate: Option<f64>,
    pub active: bool,
}

impl EncodingParameters {
    pub fn new(rid: Option<Rid>) -> Self {
        EncodingParameters {
            rid,
            max_bitrate: None,
            max_framerate: None,
            active: true,
        }
    }
}

/// All encodings of a sender, as returned by [`SenderControl::parameters`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

impl SendParameters {
    /// Parameters for a three layer `f`/`h`/`q` simulcast sender.
    pub fn simulcast() -> Self {
        SendParameters {
            encodings: Layer::ALL
                .iter()
                .map(|l| EncodingParameters::new(Some(l.rid())))
                .collect(),
        }
    }

    /// Parameters for a sender without simulcast.
    pub fn single() -> Self {
        SendParameters {
            encodings: vec![EncodingParameters::new(None)],
        }
    }

    /// Which layer an encoding carries.
    ///
    /// An encoding without rid is the high layer when it is the sole encoding.
    pub fn layer_of(&self, index: usize) -> Option<Layer> {
        let encoding = self.encodings.get(index)?;
        match &encoding.rid {
            Some(rid) => Layer::from_rid(rid),
            None if self.encodings.len() == 1 => Some(Layer::High),
            None => None,
        }
    }

    /// Mutable access to the encoding of a layer.
    pub fn encoding_mut(&mut self, layer: Layer) -> Option<&mut EncodingParameters> {
        let index = (0..self.encodings.len()).find(|i| self.layer_of(*i) == Some(layer))?;
        self.encodings.get_mut(index)
    }

    pub fn encoding(&self, layer: Layer) -> Option<&EncodingParameters> {
        let index = (0..self.encodings.len()).find(|i| self.layer_of(*i) == Some(layer))?;
        self.encodings.get(index)
    }

    /// Set `max_bitrate` of every known layer from the caps.
    pub fn set_max_bitrates(&mut self, caps: &LayerCaps) {
        for layer in Layer::ALL {
            if let Some(e) = self.encoding_mut(layer) {
                e.max_bitrate = Some(caps.get(layer));
            }
        }
    }
}

/// Access to the sender whose encodings are tuned.
///
/// Implementations wrap whatever media stack is sending the video. Calls from
/// the arbitrator and the watchdog of the same stream must not interleave, which
/// [`PublishedStream`][crate::PublishedStream] guarantees by owning the port.
pub trait SenderControl {
    /// Current encoding parameters.
    fn parameters(&mut self) -> Result<SendParameters, CapError>;

    /// Replace the encoding parameters.
    fn set_parameters(&mut self, params: SendParameters) -> Result<(), CapError>;
}

impl<S: SenderControl + ?Sized> SenderControl for &mut S {
    fn parameters(&mut self) -> Result<SendParameters, CapError> {
        (**self).parameters()
    }

    fn set_parameters(&mut self, params: SendParameters) -> Result<(), CapError> {
        (**self).set_parameters(params)
    }
}

impl<S: SenderControl + ?Sized> SenderControl for Box<S> {
    fn parameters(&mut self) -> Result<SendParameters, CapError> {
        (**self).parameters()
    }

    fn set_parameters(&mut self, params: SendParameters) -> Result<(), CapError> {
        (**self).set_parameters(params)
    }
}

/// Read the parameters, let `f` modify them and write them back.
///
/// Any failure is logged and dropped. A failed attempt is retried naturally on
/// the next tick. Returns whether the write went through.
pub fn apply_best_effort<S, F>(sender: &mut S, what: &str, f: F) -> bool
where
    S: SenderControl + ?Sized,
    F: FnOnce(&mut SendParameters),
{
    match try_apply(sender, f) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to apply {}: {}", what, e);
            false
        }
    }
}

fn try_apply<S, F>(sender: &mut S, f: F) -> Result<(), CapError>
where
    S: SenderControl + ?Sized,
    F: FnOnce(&mut SendParameters),
{
    let mut params = sender.parameters()?;
    if params.encodings.is_empty() {
        return Err(CapError::NoEncodings);
    }
    f(&mut params);
    sender.set_parameters(params)
}
