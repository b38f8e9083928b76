use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StreamError;
use crate::flags::PacketFlags;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::message::MessageKind;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Largest encoded packet (header + payload).
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// A header plus its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Build a packet, checksumming any non-empty payload.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Result<Self, StreamError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(StreamError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let (flags, checksum) = if payload.is_empty() {
            (PacketFlags::empty(), 0)
        } else {
            (PacketFlags::CHECKSUMMED, checksum(&payload))
        };

        Ok(Self {
            header: PacketHeader::new(kind, flags, checksum, payload.len() as u32),
            payload,
        })
    }

    pub fn heartbeat() -> Self {
        Self {
            header: PacketHeader::new(MessageKind::Heartbeat, PacketFlags::empty(), 0, 0),
            payload: Bytes::new(),
        }
    }

    /// Reassemble a packet read off the wire, verifying length and checksum.
    pub fn from_parts(header: PacketHeader, payload: Bytes) -> Result<Self, StreamError> {
        if payload.len() != header.payload_length() as usize {
            return Err(StreamError::InvalidPacketLength {
                expected: header.payload_length() as usize,
                actual: payload.len(),
            });
        }
        let packet = Self { header, payload };
        if !packet.validate() {
            return Err(StreamError::ChecksumMismatch);
        }
        Ok(packet)
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// `true` if the payload matches the header checksum (or is unchecksummed and empty).
    pub fn validate(&self) -> bool {
        if self.header.flags().contains(PacketFlags::CHECKSUMMED) {
            checksum(&self.payload) == self.header.checksum()
        } else {
            self.payload.is_empty()
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_payload_is_checksummed() {
        let pkt = Packet::new(MessageKind::StreamFrame, vec![1u8, 2, 3]).unwrap();
        assert!(pkt.header().flags().contains(PacketFlags::CHECKSUMMED));
        assert_ne!(pkt.header().checksum(), 0);
        assert!(pkt.validate());
    }

    #[test]
    fn heartbeat_is_empty_and_valid() {
        let hb = Packet::heartbeat();
        assert_eq!(hb.kind(), MessageKind::Heartbeat);
        assert!(hb.payload().is_empty());
        assert!(hb.validate());
        assert_eq!(hb.encoded_len(), HEADER_SIZE);
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let pkt = Packet::new(MessageKind::ProcessedFrame, vec![9u8; 32]).unwrap();
        let mut tampered = pkt.payload().to_vec();
        tampered[0] ^= 0xFF;
        let err = Packet::from_parts(*pkt.header(), Bytes::from(tampered)).unwrap_err();
        assert!(matches!(err, StreamError::ChecksumMismatch));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let pkt = Packet::new(MessageKind::ProcessedFrame, vec![9u8; 32]).unwrap();
        let err = Packet::from_parts(*pkt.header(), Bytes::from(vec![9u8; 31])).unwrap_err();
        assert!(matches!(err, StreamError::InvalidPacketLength { expected: 32, actual: 31 }));
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let err = Packet::new(MessageKind::StreamFrame, vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, StreamError::PayloadTooLarge { .. }));
    }

    #[test]
    fn to_bytes_starts_with_header() {
        let pkt = Packet::new(MessageKind::AnalysisResult, vec![5u8; 4]).unwrap();
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(&bytes[0..4], b"SVS1");
        assert_eq!(&bytes[HEADER_SIZE..], &[5u8; 4]);
    }
}
