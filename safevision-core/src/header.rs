use crate::error::StreamError;
use crate::flags::PacketFlags;
use crate::message::MessageKind;

/// Size of an encoded [`PacketHeader`] in bytes.
pub const HEADER_SIZE: usize = 20;

/// Leading bytes of every packet.
pub const MAGIC: [u8; 4] = *b"SVS1";

/// Fixed-size packet header (all fields little-endian).
///
/// ```text
/// magic:          [u8; 4]  "SVS1"
/// kind:           u32
/// flags:          u32
/// checksum:       u32      blake3(payload)[0..4] when CHECKSUMMED
/// payload_length: u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    kind: MessageKind,
    flags: PacketFlags,
    checksum: u32,
    payload_length: u32,
}

impl PacketHeader {
    pub fn new(kind: MessageKind, flags: PacketFlags, checksum: u32, payload_length: u32) -> Self {
        Self {
            kind,
            flags,
            checksum,
            payload_length,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StreamError::InvalidPacketLength {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(StreamError::InvalidMagic);
        }

        let kind = MessageKind::try_from(read_u32(bytes, 4))?;
        let flags = PacketFlags::from_bits(read_u32(bytes, 8))
            .ok_or(StreamError::InvalidHeader("unknown flag bits"))?;
        let checksum = read_u32(bytes, 12);
        let payload_length = read_u32(bytes, 16);

        if !flags.contains(PacketFlags::CHECKSUMMED) && checksum != 0 {
            return Err(StreamError::InvalidHeader(
                "checksum present without CHECKSUMMED flag",
            ));
        }

        Ok(Self {
            kind,
            flags,
            checksum,
            payload_length,
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let hdr = PacketHeader::new(
            MessageKind::ProcessedFrame,
            PacketFlags::CHECKSUMMED,
            0xDEAD_BEEF,
            4096,
        );
        let parsed = PacketHeader::from_bytes(&hdr.to_bytes()).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = PacketHeader::new(MessageKind::Heartbeat, PacketFlags::empty(), 0, 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(StreamError::InvalidMagic)
        ));
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            PacketHeader::from_bytes(&[0u8; 7]),
            Err(StreamError::InvalidPacketLength { expected: 20, actual: 7 })
        ));
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut bytes = PacketHeader::new(MessageKind::Heartbeat, PacketFlags::empty(), 0, 0).to_bytes();
        bytes[8] = 0x80;
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(StreamError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_stray_checksum() {
        let bytes = PacketHeader::new(MessageKind::AnalysisResult, PacketFlags::empty(), 7, 3).to_bytes();
        assert!(PacketHeader::from_bytes(&bytes).is_err());
    }
}
