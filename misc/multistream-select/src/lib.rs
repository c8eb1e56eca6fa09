//! Per-stream protocol negotiation.
//!
//! Dialer side writes the multistream header, then offers candidates one at
//! a time until one echoes back; listener side reads the header, echoes it,
//! then matches a single offered candidate against a caller-supplied
//! predicate — the multi-candidate retry loop on the listener side lives
//! one layer up, in the connection's protocol dispatch table, since that's
//! the component that owns "the peer may try again".

use futures::{AsyncRead, AsyncWrite};
use swarmlink_core::framer::{read_frame_str, write_frame_str, FramerError};
use thiserror::Error;

pub const MULTISTREAM_HEADER: &str = "/multistream/1.0.0";
pub const NA: &str = "na";
pub const LS: &str = "ls";

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("io/framing error: {0}")]
    Framer(#[from] FramerError),
    #[error("peer sent unexpected multistream header: {0:?}")]
    BadHeader(String),
    #[error("none of the offered protocols were accepted: {0:?}")]
    Exhausted(Vec<String>),
    #[error("'ls' is not implemented")]
    ListNotImplemented,
}

/// Dialer/offer side. Writes the header, then tries
/// each of `candidates` in order (already sorted by the caller — e.g.
/// semver-descending within a name prefix, as `establish_protocol` does)
/// until one is echoed back by the listener.
pub async fn dialer_select<S, I>(io: &mut S, candidates: I) -> Result<String, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: IntoIterator<Item = String>,
{
    write_frame_str(io, MULTISTREAM_HEADER).await?;
    let header = read_frame_str(io).await?;
    if header != MULTISTREAM_HEADER {
        return Err(NegotiationError::BadHeader(header));
    }

    let mut tried = Vec::new();
    for candidate in candidates {
        write_frame_str(io, &candidate).await?;
        let reply = read_frame_str(io).await?;
        if reply == candidate {
            return Ok(candidate);
        }
        tried.push(candidate);
    }
    Err(NegotiationError::Exhausted(tried))
}

/// Dialer-side header handshake alone, with no candidate offered yet — used
/// when a stage boundary (e.g. re-negotiating after a secure channel
/// upgrade) needs just the multistream preamble repeated.
pub async fn dialer_negotiate_header<S>(io: &mut S) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame_str(io, MULTISTREAM_HEADER).await?;
    let header = read_frame_str(io).await?;
    if header != MULTISTREAM_HEADER {
        return Err(NegotiationError::BadHeader(header));
    }
    Ok(())
}

/// Listener/accept side. Completes the header
/// handshake, then reads exactly one candidate and resolves it against
/// `is_supported`: on match, echoes the candidate back and returns
/// `Some(name)` so the caller can delegate to the registered handler; on
/// mismatch, writes `"na"` and returns `None` **without closing the
/// stream** — the peer may try again.
pub async fn listener_negotiate_header<S>(io: &mut S) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = read_frame_str(io).await?;
    if header != MULTISTREAM_HEADER {
        return Err(NegotiationError::BadHeader(header));
    }
    write_frame_str(io, MULTISTREAM_HEADER).await?;
    Ok(())
}

pub async fn listener_select_once<S>(
    io: &mut S,
    is_supported: impl Fn(&str) -> bool,
) -> Result<Option<String>, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let candidate = read_frame_str(io).await?;
    if candidate == LS {
        return Err(NegotiationError::ListNotImplemented);
    }
    if is_supported(&candidate) {
        write_frame_str(io, &candidate).await?;
        Ok(Some(candidate))
    } else {
        write_frame_str(io, NA).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    async fn pipe() -> (impl AsyncRead + AsyncWrite + Unpin, impl AsyncRead + AsyncWrite + Unpin) {
        let (a, b) = async_pipe::pipe();
        (a, b)
    }

    mod async_pipe {
        // A minimal in-memory duplex pipe for tests, built on two
        // unidirectional channels glued into one `AsyncRead + AsyncWrite`.
        use futures::channel::mpsc;
        use futures::io::{AsyncRead, AsyncWrite};
        use futures::{SinkExt, StreamExt};
        use std::pin::Pin;
        use std::task::{Context, Poll};

        pub struct Half {
            tx: mpsc::Sender<Vec<u8>>,
            rx: mpsc::Receiver<Vec<u8>>,
            buf: Vec<u8>,
        }

        pub fn pipe() -> (Half, Half) {
            let (tx1, rx1) = mpsc::channel(64);
            let (tx2, rx2) = mpsc::channel(64);
            (Half { tx: tx1, rx: rx2, buf: Vec::new() }, Half { tx: tx2, rx: rx1, buf: Vec::new() })
        }

        impl AsyncRead for Half {
            fn poll_read(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut [u8],
            ) -> Poll<std::io::Result<usize>> {
                if self.buf.is_empty() {
                    match self.rx.poll_next_unpin(cx) {
                        Poll::Ready(Some(chunk)) => self.buf = chunk,
                        Poll::Ready(None) => return Poll::Ready(Ok(0)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                let n = buf.len().min(self.buf.len());
                buf[..n].copy_from_slice(&self.buf[..n]);
                self.buf.drain(..n);
                Poll::Ready(Ok(n))
            }
        }

        impl AsyncWrite for Half {
            fn poll_write(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<std::io::Result<usize>> {
                match self.tx.poll_ready(cx) {
                    Poll::Ready(Ok(())) => {
                        let _ = self.tx.start_send(buf.to_vec());
                        Poll::Ready(Ok(buf.len()))
                    }
                    Poll::Ready(Err(_)) => Poll::Ready(Ok(0)),
                    Poll::Pending => Poll::Pending,
                }
            }

            fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
                Poll::Ready(Ok(()))
            }

            fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
                Pin::new(&mut self.tx).poll_close(cx).map_err(|_| std::io::ErrorKind::BrokenPipe.into())
            }
        }
    }

    #[async_std::test]
    async fn dialer_and_listener_agree_on_first_match() {
        let (mut dialer, mut listener) = pipe().await;

        let listener_task = async_std::task::spawn(async move {
            listener_negotiate_header(&mut listener).await.unwrap();
            listener_select_once(&mut listener, |p| p == "/identify/1.0.0").await.unwrap()
        });

        let chosen = dialer_select(&mut dialer, vec!["/identify/1.0.0".to_string()]).await.unwrap();
        assert_eq!(chosen, "/identify/1.0.0");
        assert_eq!(listener_task.await, Some("/identify/1.0.0".to_string()));
    }

    #[async_std::test]
    async fn listener_rejects_unsupported_without_closing() {
        let (mut dialer, mut listener) = pipe().await;

        let listener_task = async_std::task::spawn(async move {
            listener_negotiate_header(&mut listener).await.unwrap();
            let first = listener_select_once(&mut listener, |p| p == "/mplex/6.7.0").await.unwrap();
            assert!(first.is_none());
            let second = listener_select_once(&mut listener, |p| p == "/mplex/6.7.0").await.unwrap();
            assert_eq!(second, Some("/mplex/6.7.0".to_string()));
        });

        let chosen = dialer_select(
            &mut dialer,
            vec!["/identify/1.0.0".to_string(), "/mplex/6.7.0".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(chosen, "/mplex/6.7.0");
        listener_task.await;
    }
}
