//! Length-prefixed, newline-terminated frame codec used by multistream-select
//! and the identity protocol's short-string exchanges.
//!
//! Wire format: `varint(len + 1) || payload || 0x0a`.

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use thiserror::Error;
use unsigned_varint::aio as varint_aio;
use unsigned_varint::encode as varint_encode;

#[derive(Debug, Error)]
pub enum FramerError {
    #[error("frame missing terminating newline")]
    MissingNewline,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid varint length prefix")]
    InvalidVarint,
}

/// Encodes `payload` as `varint(len+1) || payload || 0x0a` and writes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(io: &mut W, payload: &[u8]) -> Result<(), FramerError> {
    let len = payload.len() + 1;
    let mut buf = varint_encode::usize_buffer();
    let len_bytes = varint_encode::usize(len, &mut buf);
    let mut frame = Vec::with_capacity(len_bytes.len() + payload.len() + 1);
    frame.extend_from_slice(len_bytes);
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

/// Reads and decodes a single frame, validating the terminating newline.
pub async fn read_frame<R: AsyncRead + Unpin>(io: &mut R) -> Result<Vec<u8>, FramerError> {
    let len = varint_aio::read_u64(io).await.map_err(|_| FramerError::InvalidVarint)? as usize;
    if len == 0 {
        return Err(FramerError::MissingNewline);
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    if buf.pop() != Some(b'\n') {
        return Err(FramerError::MissingNewline);
    }
    Ok(buf)
}

/// Convenience wrapper for the common case of framing a short UTF-8 string
/// (protocol names during negotiation).
pub async fn write_frame_str<W: AsyncWrite + Unpin>(io: &mut W, s: &str) -> Result<(), FramerError> {
    write_frame(io, s.as_bytes()).await
}

pub async fn read_frame_str<R: AsyncRead + Unpin>(io: &mut R) -> Result<String, FramerError> {
    let bytes = read_frame(io).await?;
    String::from_utf8(bytes).map_err(|_| FramerError::MissingNewline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[async_std::test]
    async fn round_trips_a_string() {
        let mut buf = Vec::new();
        write_frame_str(&mut buf, "/multistream/1.0.0").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let s = read_frame_str(&mut cursor).await.unwrap();
        assert_eq!(s, "/multistream/1.0.0");
    }

    #[async_std::test]
    async fn rejects_missing_newline() {
        // Hand-craft a frame whose payload length matches but omits the \n.
        let mut buf = Vec::new();
        let mut vbuf = varint_encode::usize_buffer();
        let len_bytes = varint_encode::usize(4, &mut vbuf);
        buf.extend_from_slice(len_bytes);
        buf.extend_from_slice(b"abc "); // 4 bytes, no trailing \n
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FramerError::MissingNewline));
    }

    #[test]
    fn quickcheck_write_then_read_is_identity() {
        fn prop(payload: Vec<u8>) -> bool {
            async_std::task::block_on(async {
                let mut buf = Vec::new();
                write_frame(&mut buf, &payload).await.unwrap();
                let mut cursor = Cursor::new(buf);
                read_frame(&mut cursor).await.unwrap() == payload
            })
        }
        quickcheck::quickcheck(prop as fn(Vec<u8>) -> bool);
    }
}
