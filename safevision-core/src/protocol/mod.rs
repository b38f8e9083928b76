//! Typed payloads carried inside [`Packet`] bodies.
//!
//! Payloads are serialized with `serde` + `bincode`. Each type names its
//! [`MessageKind`] and validates its own fields on decode, so a schema
//! violation is rejected at the boundary instead of deep in the controller.
//!
//! [`Packet`]: crate::packet::Packet

pub mod stream;

pub use stream::{AnalysisResult, OutgoingFrame, ProcessedFrame, RemoteError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StreamError;
use crate::message::MessageKind;
use crate::packet::Packet;

/// A payload with a fixed [`MessageKind`].
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    const KIND: MessageKind;

    /// Field-level checks applied after deserialization.
    fn validate(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, StreamError> {
        let msg: Self = bincode::deserialize(bytes)?;
        msg.validate()?;
        Ok(msg)
    }

    fn to_packet(&self) -> Result<Packet, StreamError> {
        self.validate()?;
        Packet::new(Self::KIND, self.to_bytes()?)
    }

    fn from_packet(packet: &Packet) -> Result<Self, StreamError> {
        if packet.kind() != Self::KIND {
            return Err(StreamError::InvalidMessage(format!(
                "expected {}, got {}",
                Self::KIND,
                packet.kind()
            )));
        }
        Self::from_bytes(packet.payload())
    }
}
