//! A single logical bidirectional stream within a [`crate::Mplex`] muxer.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::io::WriteHalf;
use futures::{AsyncRead, AsyncWrite, StreamExt};
use swarmlink_core::transport::BoxedStream;

use crate::wire::{self, PacketType};
use crate::MuxerShared;

/// A substream holds a non-owning (`Weak`) back-pointer to its muxer, per
/// the Design Notes on cyclic references: the connection owns the muxer,
/// the muxer owns the substream map, substreams hold a back-pointer only.
pub struct MplexSubstream {
    pub(crate) id: u64,
    pub(crate) locally_opened: bool,
    pub(crate) muxer: std::sync::Weak<MuxerShared>,
    pub(crate) incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) read_buf: VecDeque<u8>,
    pub(crate) eof: bool,
    write_fut: Option<Pin<Box<dyn Future<Output = std::io::Result<usize>> + Send>>>,
}

impl MplexSubstream {
    pub(crate) fn new(
        id: u64,
        locally_opened: bool,
        muxer: std::sync::Weak<MuxerShared>,
        incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> MplexSubstream {
        MplexSubstream {
            id,
            locally_opened,
            muxer,
            incoming,
            read_buf: VecDeque::new(),
            eof: false,
            write_fut: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl AsyncRead for MplexSubstream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        if self.read_buf.is_empty() {
            if self.eof {
                return Poll::Ready(Ok(0));
            }
            match self.incoming.poll_next_unpin(cx) {
                Poll::Ready(Some(chunk)) => self.read_buf.extend(chunk),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Poll::Ready(Ok(0));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = buf.len().min(self.read_buf.len());
        for (dst, src) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *dst = src;
        }
        Poll::Ready(Ok(n))
    }
}

async fn send_frame(
    write: Arc<futures::lock::Mutex<WriteHalf<BoxedStream>>>,
    id: u64,
    packet_type: PacketType,
    payload: Vec<u8>,
) -> std::io::Result<usize> {
    let mut guard = write.lock().await;
    wire::write_frame(&mut *guard, id, packet_type, &payload)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(payload.len())
}

impl AsyncWrite for MplexSubstream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        if self.write_fut.is_none() {
            let muxer = match self.muxer.upgrade() {
                Some(m) => m,
                None => return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into())),
            };
            let packet_type = if self.locally_opened { PacketType::MessageInitiator } else { PacketType::MessageReceiver };
            let fut = send_frame(muxer.write.clone(), self.id, packet_type, buf.to_vec());
            self.write_fut = Some(Box::pin(fut));
        }
        let poll = self.write_fut.as_mut().unwrap().as_mut().poll(cx);
        if poll.is_ready() {
            self.write_fut = None;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if let Some(muxer) = self.muxer.upgrade() {
            muxer.remove_stream_sync(self.id);
        }
        Poll::Ready(Ok(()))
    }
}
