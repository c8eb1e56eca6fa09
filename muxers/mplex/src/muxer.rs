//! The mplex `StreamMuxer` implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::io::{ReadHalf, WriteHalf};
use futures::lock::Mutex as AsyncMutex;
use futures::{AsyncReadExt, SinkExt};
use log::{debug, warn};
use parking_lot::Mutex;
use swarmlink_core::muxing::{MuxerEvent, MuxingError, StreamMuxer};
use swarmlink_core::transport::BoxedStream;

use crate::substream::MplexSubstream;
use crate::wire::{self, PacketType};

/// First id handed out by an initiator-role muxer; receiver-role muxers
/// start one higher, keeping initiator ids even and receiver ids odd.
const INITIATOR_START_ID: u64 = 1000;
const RECEIVER_START_ID: u64 = 1001;

struct SubstreamEntry {
    locally_opened: bool,
    data_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// State shared between the muxer handle, its background read loop, and
/// every substream it has handed out. Substreams hold only a [`Weak`]
/// reference to this, so dropping the last `Mplex` handle (and its read
/// loop) lets the shared state drop even with live substream handles
/// dangling — per the Design Notes on cyclic references.
pub(crate) struct MuxerShared {
    pub(crate) write: Arc<AsyncMutex<WriteHalf<BoxedStream>>>,
    substreams: Mutex<FnvHashMap<u64, SubstreamEntry>>,
    initiator: bool,
    next_id: AtomicU64,
}

impl MuxerShared {
    pub(crate) fn remove_stream_sync(&self, id: u64) {
        if self.substreams.lock().remove(&id).is_none() {
            return;
        }
        let write = self.write.clone();
        async_std::task::spawn(async move {
            let mut guard = write.lock().await;
            let _ = wire::write_frame(&mut *guard, id, PacketType::CloseInitiator, &[]).await;
        });
    }
}

/// A single mplex connection. Constructed over the duplex stream produced
/// by the secure-channel upgrade.
pub struct Mplex {
    shared: Arc<MuxerShared>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<MuxerEvent>>,
    read_loop: Option<async_std::task::JoinHandle<()>>,
}

impl Mplex {
    /// `initiator` is true for the side that dialed the connection; it
    /// decides both the starting id parity and which tag is
    /// used when this side later opens a stream via [`StreamMuxer::create_stream`].
    pub fn new(io: BoxedStream, initiator: bool) -> Mplex {
        let (read_half, write_half) = io.split();
        let shared = Arc::new(MuxerShared {
            write: Arc::new(AsyncMutex::new(write_half)),
            substreams: Mutex::new(FnvHashMap::default()),
            initiator,
            next_id: AtomicU64::new(if initiator { INITIATOR_START_ID } else { RECEIVER_START_ID }),
        });

        let (events_tx, events_rx) = mpsc::unbounded();
        let read_loop = async_std::task::spawn(process_requests(shared.clone(), read_half, events_tx));

        Mplex { shared, events_rx: AsyncMutex::new(events_rx), read_loop: Some(read_loop) }
    }
}

impl Drop for Mplex {
    fn drop(&mut self) {
        if let Some(handle) = self.read_loop.take() {
            async_std::task::spawn(handle.cancel());
        }
    }
}

/// Background task draining frames off the wire and dispatching them to
/// the right substream (or emitting a top-level [`MuxerEvent`]). Runs
/// until EOF, an I/O failure, or an unknown packet tag, at which point it
/// disposes every live substream and closes `events_tx` so
/// [`StreamMuxer::next_event`] resolves to `None` from then on.
async fn process_requests(
    shared: Arc<MuxerShared>,
    mut read: ReadHalf<BoxedStream>,
    mut events_tx: mpsc::UnboundedSender<MuxerEvent>,
) {
    loop {
        let (id, packet_type, payload) = match wire::read_frame(&mut read).await {
            Ok(frame) => frame,
            Err(err) => {
                debug!("mplex read loop terminating: {}", err);
                break;
            }
        };

        match packet_type {
            PacketType::NewStream => {
                // go-hack: some implementations (historically libp2p-go)
                // send their very first NewStream with an odd id even
                // though they're the initiator. A receiver-role muxer
                // echoes the NewStream frame back unchanged in that case,
                // which is what libp2p-go's receiver expects instead of a
                // plain ack.
                let name = String::from_utf8_lossy(&payload).into_owned();
                if shared.substreams.lock().contains_key(&id) {
                    warn!("duplicate NewStream id {}, ignoring", id);
                    continue;
                }
                if !shared.initiator && id % 2 == 1 {
                    let write = shared.write.clone();
                    let echo_payload = payload.clone();
                    async_std::task::spawn(async move {
                        let mut guard = write.lock().await;
                        let _ = wire::write_frame(&mut *guard, id, PacketType::NewStream, &echo_payload).await;
                    });
                }
                let (data_tx, data_rx) = mpsc::unbounded();
                shared.substreams.lock().insert(id, SubstreamEntry { locally_opened: false, data_tx });
                let substream = MplexSubstream::new(id, false, Arc::downgrade(&shared), data_rx);
                let boxed: BoxedStream = Box::pin(substream);
                if events_tx.send(MuxerEvent::SubstreamCreated { id, name, substream: boxed }).await.is_err() {
                    break;
                }
            }
            PacketType::MessageInitiator | PacketType::MessageReceiver => {
                let maybe_tx = shared.substreams.lock().get(&id).map(|entry| entry.data_tx.clone());
                match maybe_tx {
                    Some(mut tx) => {
                        if tx.send(payload).await.is_err() {
                            shared.substreams.lock().remove(&id);
                        }
                    }
                    None => warn!("message for unknown substream {}, dropping", id),
                }
            }
            _ if packet_type.is_close_or_reset() => {
                shared.substreams.lock().remove(&id);
                if events_tx.send(MuxerEvent::SubstreamClosed { id }).await.is_err() {
                    break;
                }
            }
            _ => {
                warn!("unknown mplex packet type for stream {}", id);
                break;
            }
        }
    }

    shared.substreams.lock().clear();
    events_tx.close_channel();
}

#[async_trait::async_trait]
impl StreamMuxer for Mplex {
    async fn create_stream(&self, name: &str) -> Result<BoxedStream, MuxingError> {
        let id = self.shared.next_id.fetch_add(2, Ordering::SeqCst);
        let (data_tx, data_rx) = mpsc::unbounded();
        self.shared.substreams.lock().insert(id, SubstreamEntry { locally_opened: true, data_tx });

        {
            let mut guard = self.shared.write.lock().await;
            wire::write_frame(&mut *guard, id, PacketType::NewStream, name.as_bytes())
                .await
                .map_err(|e| MuxingError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        }

        let substream = MplexSubstream::new(id, true, Arc::downgrade(&self.shared), data_rx);
        Ok(Box::pin(substream))
    }

    async fn remove_stream(&self, id: u64) {
        self.shared.remove_stream_sync(id);
    }

    async fn next_event(&self) -> Option<MuxerEvent> {
        use futures::StreamExt;
        self.events_rx.lock().await.next().await
    }

    fn is_initiator(&self) -> bool {
        self.shared.initiator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct Half {
        tx: mpsc::Sender<Vec<u8>>,
        rx: mpsc::Receiver<Vec<u8>>,
        buf: Vec<u8>,
    }

    fn pipe() -> (Half, Half) {
        let (tx1, rx1) = mpsc::channel(64);
        let (tx2, rx2) = mpsc::channel(64);
        (Half { tx: tx1, rx: rx2, buf: Vec::new() }, Half { tx: tx2, rx: rx1, buf: Vec::new() })
    }

    impl futures::AsyncRead for Half {
        fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
            use futures::StreamExt;
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

    impl futures::AsyncWrite for Half {
        fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
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

    fn boxed_pair() -> (BoxedStream, BoxedStream) {
        let (a, b) = pipe();
        (Box::pin(a), Box::pin(b))
    }

    #[async_std::test]
    async fn open_substream_is_observed_on_the_other_side() {
        let (a, b) = boxed_pair();
        let initiator = Mplex::new(a, true);
        let receiver = Mplex::new(b, false);

        let mut stream = initiator.create_stream("foo").await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let event = receiver.next_event().await.unwrap();
        match event {
            MuxerEvent::SubstreamCreated { id, name, mut substream } => {
                assert_eq!(name, "foo");
                assert_eq!(id % 2, 0);
                let mut buf = [0u8; 5];
                substream.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[async_std::test]
    async fn close_emits_substream_closed_on_the_peer() {
        let (a, b) = boxed_pair();
        let initiator = Mplex::new(a, true);
        let receiver = Mplex::new(b, false);

        let stream = initiator.create_stream("bar").await.unwrap();
        let created = receiver.next_event().await.unwrap();
        let id = match created {
            MuxerEvent::SubstreamCreated { id, .. } => id,
            other => panic!("unexpected event: {:?}", other),
        };

        drop(stream); // does not itself send a frame; the explicit remove_stream call below does
        initiator.remove_stream(id).await;

        let closed = receiver.next_event().await.unwrap();
        match closed {
            MuxerEvent::SubstreamClosed { id: closed_id } => assert_eq!(closed_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
