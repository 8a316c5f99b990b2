//! Reliable out-of-band channel between participants.

use crate::message::ControlMessage;
use crate::util::Pii;
use crate::CapError;

/// Sends small control payloads to one participant.
///
/// Delivery is expected to be reliable, but there is no ordering between
/// different destinations.
pub trait ControlChannel {
    fn send_data(&mut self, payload: &[u8], destination: &str) -> Result<(), CapError>;
}

impl<C: ControlChannel + ?Sized> ControlChannel for &mut C {
    fn send_data(&mut self, payload: &[u8], destination: &str) -> Result<(), CapError> {
        (**self).send_data(payload, destination)
    }
}

impl<C: ControlChannel + ?Sized> ControlChannel for Box<C> {
    fn send_data(&mut self, payload: &[u8], destination: &str) -> Result<(), CapError> {
        (**self).send_data(payload, destination)
    }
}

/// Encode and send a message, dropping any failure.
pub(crate) fn send_best_effort<C: ControlChannel + ?Sized>(
    channel: &mut C,
    message: &ControlMessage,
    destination: &str,
) -> bool {
    let result = message
        .encode()
        .and_then(|payload| channel.send_data(&payload, destination));

    if let Err(e) = result {
        debug!("Failed to send control message to {}: {}", Pii(destination), e);
        return false;
    }

    true
}
