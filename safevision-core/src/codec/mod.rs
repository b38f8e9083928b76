//! Length-prefixed packet framing for `tokio_util::codec::Framed`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StreamError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};

/// Decodes and encodes [`Packet`]s. Stateless between frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCodec;

impl Decoder for StreamCodec {
    type Item = Packet;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::from_bytes(&src[..HEADER_SIZE])?;
        let payload_len = header.payload_length() as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(StreamError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = HEADER_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len).freeze();
        Packet::from_parts(header, payload).map(Some)
    }
}

impl Encoder<Packet> for StreamCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
