//! Mplex frame header encoding.
//!
//! `header-varint || length-varint || payload`, where the header packs
//! `(stream_id << 3) | packet_type` into the low 3 bits.

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use thiserror::Error;
use unsigned_varint::aio as varint_aio;
use unsigned_varint::encode as varint_encode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PacketType {
    NewStream,
    MessageReceiver,
    MessageInitiator,
    CloseReceiver,
    CloseInitiator,
    ResetReceiver,
    ResetInitiator,
}

impl PacketType {
    fn tag(self) -> u64 {
        match self {
            PacketType::NewStream => 0,
            PacketType::MessageReceiver => 1,
            PacketType::MessageInitiator => 2,
            PacketType::CloseReceiver => 3,
            PacketType::CloseInitiator => 4,
            PacketType::ResetReceiver => 5,
            PacketType::ResetInitiator => 6,
        }
    }

    fn from_tag(tag: u64) -> Option<PacketType> {
        Some(match tag {
            0 => PacketType::NewStream,
            1 => PacketType::MessageReceiver,
            2 => PacketType::MessageInitiator,
            3 => PacketType::CloseReceiver,
            4 => PacketType::CloseInitiator,
            5 => PacketType::ResetReceiver,
            6 => PacketType::ResetInitiator,
            _ => return None,
        })
    }

    /// Reset is semantically identical to Close at this layer.
    pub fn is_close_or_reset(self) -> bool {
        matches!(
            self,
            PacketType::CloseReceiver | PacketType::CloseInitiator | PacketType::ResetReceiver | PacketType::ResetInitiator
        )
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown packet type")]
    UnknownPacketType,
    #[error("invalid varint")]
    InvalidVarint,
}

fn encode_varint(buf: &mut Vec<u8>, value: u64) {
    let mut scratch = varint_encode::u64_buffer();
    buf.extend_from_slice(varint_encode::u64(value, &mut scratch));
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    io: &mut W,
    stream_id: u64,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<(), WireError> {
    let header = (stream_id << 3) | packet_type.tag();
    let mut frame = Vec::with_capacity(payload.len() + 16);
    encode_varint(&mut frame, header);
    encode_varint(&mut frame, payload.len() as u64);
    frame.extend_from_slice(payload);
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

/// Reads exactly one frame, returning `(stream_id, packet_type, payload)`.
/// Reads exactly `length` bytes for the payload — frame boundaries are
/// bytewise exact.
pub async fn read_frame<R: AsyncRead + Unpin>(
    io: &mut R,
) -> Result<(u64, PacketType, Vec<u8>), WireError> {
    let header = varint_aio::read_u64(io).await.map_err(|_| WireError::InvalidVarint)?;
    let stream_id = header >> 3;
    let packet_type = PacketType::from_tag(header & 0x7).ok_or(WireError::UnknownPacketType)?;
    let length = varint_aio::read_u64(io).await.map_err(|_| WireError::InvalidVarint)? as usize;
    let mut payload = vec![0u8; length];
    io.read_exact(&mut payload).await?;
    Ok((stream_id, packet_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[async_std::test]
    async fn encodes_new_stream_header_per_s6() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1000, PacketType::NewStream, b"foo").await.unwrap();

        // S6: varint(1000<<3|0) || varint(3) || "foo", no trailing newline.
        let mut expected = Vec::new();
        encode_varint(&mut expected, 1000 << 3);
        encode_varint(&mut expected, 3);
        expected.extend_from_slice(b"foo");
        assert_eq!(buf, expected);
        assert_ne!(buf.last(), Some(&b'\n'));
    }

    #[async_std::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1001, PacketType::MessageInitiator, b"hello").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let (id, ty, payload) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(id, 1001);
        assert_eq!(ty, PacketType::MessageInitiator);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn quickcheck_frame_round_trips_for_any_id_and_payload() {
        fn prop(id: u64, payload: Vec<u8>) -> bool {
            // Header packs `(stream_id << 3) | packet_type`; ids that would
            // overflow on the shift aren't representable, so clamp like a
            // real caller's id allocator would never produce them anyway.
            let id = id & (u64::MAX >> 3);
            async_std::task::block_on(async {
                let mut buf = Vec::new();
                write_frame(&mut buf, id, PacketType::MessageInitiator, &payload).await.unwrap();
                let mut cursor = Cursor::new(buf);
                let (got_id, ty, got_payload) = read_frame(&mut cursor).await.unwrap();
                got_id == id && ty == PacketType::MessageInitiator && got_payload == payload
            })
        }
        quickcheck::quickcheck(prop as fn(u64, Vec<u8>) -> bool);
    }
}
