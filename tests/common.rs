#![allow(unused)]

use std::sync::Once;

use simulcap::{
    BitrateCapAck, BitrateCapRequest, CapError, ControlChannel, ControlMessage, SendParameters,
    SenderControl,
};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Sender that keeps its parameters in memory and records every write.
#[derive(Debug)]
pub struct FakeSender {
    pub params: SendParameters,
    pub writes: Vec<SendParameters>,
    pub fail: bool,
}

impl FakeSender {
    pub fn simulcast() -> Self {
        FakeSender {
            params: SendParameters::simulcast(),
            writes: vec![],
            fail: false,
        }
    }

    /// A sender rejecting every call.
    pub fn failing() -> Self {
        FakeSender {
            fail: true,
            ..Self::simulcast()
        }
    }
}

impl SenderControl for FakeSender {
    fn parameters(&mut self) -> Result<SendParameters, CapError> {
        if self.fail {
            return Err(CapError::Sender("sender gone".into()));
        }
        Ok(self.params.clone())
    }

    fn set_parameters(&mut self, params: SendParameters) -> Result<(), CapError> {
        if self.fail {
            return Err(CapError::Sender("sender gone".into()));
        }
        self.writes.push(params.clone());
        self.params = params;
        Ok(())
    }
}

/// Channel recording every message sent, decoded, with its destination.
#[derive(Debug, Default)]
pub struct FakeChannel {
    pub sent: Vec<(String, ControlMessage)>,
    pub fail: bool,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<(String, ControlMessage)> {
        std::mem::take(&mut self.sent)
    }

    pub fn requests(&self) -> Vec<&BitrateCapRequest> {
        self.sent
            .iter()
            .filter_map(|(_, m)| match m {
                ControlMessage::CapRequest(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<(&str, &BitrateCapAck)> {
        self.sent
            .iter()
            .filter_map(|(to, m)| match m {
                ControlMessage::CapAck(v) => Some((to.as_str(), v)),
                _ => None,
            })
            .collect()
    }
}

impl ControlChannel for FakeChannel {
    fn send_data(&mut self, payload: &[u8], destination: &str) -> Result<(), CapError> {
        if self.fail {
            return Err(CapError::Channel("closed".into()));
        }
        let message = ControlMessage::decode(payload)?;
        self.sent.push((destination.to_string(), message));
        Ok(())
    }
}

/// Encode a message the way a peer would put it on the wire.
pub fn wire(message: impl Into<ControlMessage>) -> Vec<u8> {
    message.into().encode().unwrap()
}
