//! TCP transport, backed by `async-std`'s networking stack — the same
//! runtime choice the rest of this workspace makes, never tokio.

use std::net::{IpAddr, SocketAddr};

use async_std::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, warn};
use swarmlink_core::cancel::CancellationToken;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::transport::{AcceptHandler, BoxedStream, Transport, TransportError};

pub const PROTOCOL_NAME: &str = "tcp";

#[derive(Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> TcpTransport {
        TcpTransport
    }
}

fn socket_addr(addr: &MultiAddress) -> Result<SocketAddr, TransportError> {
    let segments = addr.segments();
    let ip_seg = segments
        .iter()
        .find(|s| s.protocol == "ip4" || s.protocol == "ip6")
        .ok_or(TransportError::MissingTransportProtocol)?;
    let tcp_seg = segments
        .iter()
        .find(|s| s.protocol == PROTOCOL_NAME)
        .ok_or(TransportError::MissingTransportProtocol)?;

    let ip: IpAddr = ip_seg.value.parse().map_err(|_| TransportError::Unreachable(ip_seg.value.clone()))?;
    let port: u16 = tcp_seg.value.parse().map_err(|_| TransportError::Unreachable(tcp_seg.value.clone()))?;
    Ok(SocketAddr::new(ip, port))
}

fn multiaddr_from(ip: IpAddr, port: u16, terminal: &MultiAddress) -> MultiAddress {
    let mut out = MultiAddress::empty();
    match ip {
        IpAddr::V4(v4) => out.push("ip4", v4.to_string()),
        IpAddr::V6(v6) => out.push("ip6", v6.to_string()),
    }
    out.push(PROTOCOL_NAME, port.to_string());
    if let Some(peer) = terminal.peer_id() {
        out.push("p2p", peer.to_base58());
    }
    out
}

/// Expands a wildcard (`0.0.0.0`/`::`) bind address into one concrete
/// address per non-loopback interface (Design Notes, "wildcard listen
/// addresses are expanded to one concrete address per host interface").
pub fn expand_wildcard(port: u16, terminal: &MultiAddress) -> Vec<MultiAddress> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| multiaddr_from(iface.ip(), port, terminal))
            .collect(),
        Err(err) => {
            warn!("could not enumerate network interfaces: {}", err);
            Vec::new()
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &MultiAddress, cancel: CancellationToken) -> Result<BoxedStream, TransportError> {
        let socket_addr = socket_addr(addr)?;
        let connect = TcpStream::connect(socket_addr);
        match cancel.race(connect).await {
            None => Err(TransportError::Cancelled),
            Some(Ok(stream)) => Ok(Box::pin(stream)),
            Some(Err(err)) => Err(TransportError::Io(err)),
        }
    }

    async fn listen(
        &self,
        addr: &MultiAddress,
        handler: AcceptHandler,
        cancel: CancellationToken,
    ) -> Result<MultiAddress, TransportError> {
        let socket_addr = socket_addr(addr)?;
        let listener = TcpListener::bind(socket_addr).await?;
        let bound = listener.local_addr()?;

        let local_addr = addr.clone();
        async_std::task::spawn(accept_loop(listener, handler, local_addr, cancel));

        Ok(multiaddr_from(bound.ip(), bound.port(), addr))
    }
}

async fn accept_loop(listener: TcpListener, handler: AcceptHandler, local_addr: MultiAddress, cancel: CancellationToken) {
    use futures::StreamExt;
    let mut incoming = listener.incoming();
    loop {
        let next = cancel.race(incoming.next()).await;
        match next {
            None => {
                debug!("tcp listener on {} cancelled", local_addr);
                break;
            }
            Some(None) => break,
            Some(Some(Err(err))) => {
                warn!("tcp accept error on {}: {}", local_addr, err);
                continue;
            }
            Some(Some(Ok(stream))) => {
                let remote = stream.peer_addr().ok();
                let remote_addr = remote
                    .map(|sa| multiaddr_from(sa.ip(), sa.port(), &local_addr))
                    .unwrap_or_else(MultiAddress::empty);
                let boxed: BoxedStream = Box::pin(stream);
                async_std::task::spawn((handler)(boxed, local_addr.clone(), remote_addr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};
    use std::sync::Arc;

    #[async_std::test]
    async fn connects_to_a_listening_socket_and_exchanges_bytes() {
        let transport = TcpTransport::new();
        let addr: MultiAddress = "/ip4/127.0.0.1/tcp/0".parse().unwrap();

        let handler: AcceptHandler = Arc::new(|mut stream, _remote, _local| {
            Box::pin(async move {
                let mut buf = [0u8; 5];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = stream.write_all(&buf).await;
                }
            })
        });

        let bound = transport.listen(&addr, handler, CancellationToken::never()).await.unwrap();
        let port = bound.segments().iter().find(|s| s.protocol == "tcp").unwrap().value.clone();
        let dial_addr: MultiAddress = format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap();

        let mut client = transport.connect(&dial_addr, CancellationToken::never()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");
    }
}
