//! Transport registry: maps a transport protocol name to a factory
//! producing duplex byte streams and listeners.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{AsyncRead, AsyncWrite};
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::multiaddr::MultiAddress;

/// A duplex byte stream: a raw socket, or anything wrapping one (e.g. the
/// bandwidth-counting adapter, a secure channel, or a muxed substream).
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> DuplexStream for T {}

pub type BoxedStream = Pin<Box<dyn DuplexStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connect refused: {0}")]
    Refused(String),
    #[error("transport connect unreachable: {0}")]
    Unreachable(String),
    #[error("transport connect timed out")]
    Timeout,
    #[error("connection reset")]
    Reset,
    #[error("cancelled")]
    Cancelled,
    #[error("no transport registered for protocol {0:?}")]
    UnknownProtocol(String),
    #[error("address is missing a transport protocol")]
    MissingTransportProtocol,
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invoked for each inbound connection a listener accepts. Exceptions
/// (errors returned by the handler future) close only that stream, not the
/// listener.
pub type AcceptHandler =
    Arc<dyn Fn(BoxedStream, MultiAddress, MultiAddress) -> BoxFuture<'static, ()> + Send + Sync>;

/// A strategy for opening a duplex byte stream to, or listening on, a
/// multiaddress (TCP, UDP, ...).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Opens a connection. On cancellation before establish, the underlying
    /// socket is released and this either fails with [`TransportError::Cancelled`]
    /// or returns after release; timeout behaviour is the caller's (the
    /// Swarm imposes a 30-second ceiling by default).
    async fn connect(
        &self,
        addr: &MultiAddress,
        cancel: CancellationToken,
    ) -> Result<BoxedStream, TransportError>;

    /// Starts listening. If the port is zero/unspecified, the returned
    /// address carries the kernel-chosen port. Cancellation closes the
    /// listener socket.
    async fn listen(
        &self,
        addr: &MultiAddress,
        handler: AcceptHandler,
        cancel: CancellationToken,
    ) -> Result<MultiAddress, TransportError>;
}

/// Maps a transport protocol name (the tag found at a fixed position in a
/// multiaddress, e.g. `tcp`) to the [`Transport`] that implements it.
#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> TransportRegistry {
        TransportRegistry::default()
    }

    pub fn register(&mut self, protocol: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(protocol.into(), transport);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(protocol).cloned()
    }
}

/// The Swarm's default ceiling on a single `connect` call.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
