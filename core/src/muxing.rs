//! Stream multiplexer abstraction. The concrete mplex implementation
//! lives in `swarmlink-mplex`; this trait is the seam `swarmlink-swarm`
//! programs against so a connection doesn't need to know which multiplexer
//! protocol won negotiation.

use thiserror::Error;

use crate::transport::BoxedStream;

#[derive(Debug, Error)]
pub enum MuxingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown packet type")]
    UnknownPacketType,
    #[error("muxer closed")]
    Closed,
}

/// An event surfaced by the muxer's background read loop (`process_requests`).
pub enum MuxerEvent {
    SubstreamCreated { id: u64, name: String, substream: BoxedStream },
    SubstreamClosed { id: u64 },
}

impl std::fmt::Debug for MuxerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxerEvent::SubstreamCreated { id, name, .. } => {
                f.debug_struct("SubstreamCreated").field("id", id).field("name", name).finish()
            }
            MuxerEvent::SubstreamClosed { id } => f.debug_struct("SubstreamClosed").field("id", id).finish(),
        }
    }
}

/// Owns a connection's duplex channel and the substream-id → Substream
/// mapping.
#[async_trait::async_trait]
pub trait StreamMuxer: Send + Sync {
    /// Allocates the next stream id, registers it, and emits a NewStream
    /// frame.
    async fn create_stream(&self, name: &str) -> Result<BoxedStream, MuxingError>;

    /// Emits a Close frame for `id` and drops it from the map if present.
    async fn remove_stream(&self, id: u64);

    /// Pulls the next background-loop event. Resolves to `None` once the
    /// read loop has terminated (EOF, I/O failure, cancellation, or
    /// connection reset).
    async fn next_event(&self) -> Option<MuxerEvent>;

    /// Whether this muxer was constructed as the connection initiator
    /// (even stream ids) or receiver (odd stream ids).
    fn is_initiator(&self) -> bool;
}
