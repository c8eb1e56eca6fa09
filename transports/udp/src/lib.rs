//! UDP transport stub: both `listen` and `connect` resolve to
//! `Unsupported`. There is no datagram-to-stream adapter in scope here,
//! only the registry slot the real transport would occupy.

use async_trait::async_trait;
use swarmlink_core::cancel::CancellationToken;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::transport::{AcceptHandler, BoxedStream, Transport, TransportError};

pub const PROTOCOL_NAME: &str = "udp";

#[derive(Debug, Default)]
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> UdpTransport {
        UdpTransport
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self, _addr: &MultiAddress, _cancel: CancellationToken) -> Result<BoxedStream, TransportError> {
        Err(TransportError::Unsupported("udp connect is not implemented"))
    }

    async fn listen(
        &self,
        _addr: &MultiAddress,
        _handler: AcceptHandler,
        _cancel: CancellationToken,
    ) -> Result<MultiAddress, TransportError> {
        Err(TransportError::Unsupported("udp listen is not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn listen_reports_unsupported() {
        let transport = UdpTransport::new();
        let addr: MultiAddress = "/ip4/0.0.0.0/udp/0".parse().unwrap();
        let handler: AcceptHandler = std::sync::Arc::new(|_, _, _| Box::pin(async {}));
        let err = transport.listen(&addr, handler, CancellationToken::never()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }

    #[async_std::test]
    async fn connect_reports_unsupported() {
        let transport = UdpTransport::new();
        let addr: MultiAddress = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        let err = transport.connect(&addr, CancellationToken::never()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }
}
