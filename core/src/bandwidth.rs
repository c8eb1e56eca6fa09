//! A process-wide byte counter and a stream adapter that feeds it.
//!
//! Kept module-scoped rather than a bare `static`, with explicit
//! initialisation and a reset ticker task spawned at construction and
//! cancelled at teardown.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{AsyncRead, AsyncWrite};

use crate::cancel::CancellationToken;

/// Aggregate inbound/outbound byte counters, reset on a ticker.
#[derive(Default)]
pub struct BandwidthSink {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl BandwidthSink {
    pub fn new() -> Arc<BandwidthSink> {
        Arc::new(BandwidthSink::default())
    }

    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    fn record_inbound(&self, n: u64) {
        self.inbound.fetch_add(n, Ordering::Relaxed);
    }

    fn record_outbound(&self, n: u64) {
        self.outbound.fetch_add(n, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.inbound.store(0, Ordering::Relaxed);
        self.outbound.store(0, Ordering::Relaxed);
    }

    /// Spawns a task that resets the counters on `interval` until `cancel`
    /// fires. Fire-and-forget, per Design Notes "Cooperative background
    /// loops".
    pub fn spawn_reset_ticker(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let sink = self.clone();
        async_std::task::spawn(async move {
            loop {
                let timer = async_std::task::sleep(interval);
                futures::pin_mut!(timer);
                if cancel.race(timer).await.is_none() {
                    break;
                }
                sink.reset();
            }
        });
    }
}

/// Wraps any duplex stream, counting bytes through a shared [`BandwidthSink`].
pub struct CountingStream<S> {
    inner: S,
    sink: Arc<BandwidthSink>,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, sink: Arc<BandwidthSink>) -> CountingStream<S> {
        CountingStream { inner, sink }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.sink.record_inbound(*n as u64);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.sink.record_outbound(*n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use futures::AsyncReadExt;

    #[async_std::test]
    async fn counts_bytes_read() {
        let sink = BandwidthSink::new();
        let mut stream = CountingStream::new(Cursor::new(vec![1u8, 2, 3, 4]), sink.clone());
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(sink.inbound(), 4);
    }
}
