use bitflags::bitflags;

bitflags! {
    /// Per-packet flags carried in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u32 {
        /// `checksum` holds the first four bytes of blake3(payload).
        const CHECKSUMMED = 0b0000_0001;
    }
}
