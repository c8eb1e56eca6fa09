//! The Swarm: dial coordinator, listener manager, and owner of the
//! peer registry, connection manager, and transport/encryption/muxer
//! candidate lists.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, warn};
use parking_lot::Mutex;
use swarmlink_core::bandwidth::BandwidthSink;
use swarmlink_core::cancel::{CancellationHandle, CancellationToken};
use swarmlink_core::error::SwarmError;
use swarmlink_core::filter::Policy;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::muxing::StreamMuxer;
use swarmlink_core::peer::{Keypair, PeerId};
use swarmlink_core::secure::SecureUpgrade;
use swarmlink_core::transport::{AcceptHandler, BoxedStream, TransportError, TransportRegistry, DEFAULT_CONNECT_TIMEOUT};

use crate::connection::{Direction, MuxerFactory, PeerConnection};
use crate::connection_manager::ConnectionManager;
use crate::events::{EventBus, SwarmEvent};
use crate::protector::NetworkProtector;
use crate::registry::PeerRegistry;

/// Construction-time configuration. Fields are public rather than hidden
/// behind a builder, matching the no-hidden-invariant constructors
/// elsewhere in this crate — the builder-style convenience for wiring
/// concrete transports/encryption lives in the top-level aggregator crate,
/// not here.
pub struct SwarmConfig {
    pub local_key: Keypair,
    pub connect_timeout: Duration,
    pub policy: Policy,
    pub protector: Option<Arc<dyn NetworkProtector>>,
}

impl SwarmConfig {
    pub fn new(local_key: Keypair) -> SwarmConfig {
        SwarmConfig { local_key, connect_timeout: DEFAULT_CONNECT_TIMEOUT, policy: Policy::new(), protector: None }
    }
}

type DialResult = Result<Arc<PeerConnection>, Arc<SwarmError>>;
type SharedDial = Shared<BoxFuture<'static, DialResult>>;

pub struct Swarm {
    local_peer_id: PeerId,
    local_key: Keypair,
    connect_timeout: Duration,
    policy: Policy,
    protector: Option<Arc<dyn NetworkProtector>>,

    transports: TransportRegistry,
    encryption: Vec<Arc<dyn SecureUpgrade>>,
    muxer_factory: MuxerFactory,
    protocol_templates: Mutex<Vec<(String, String)>>,

    registry: Arc<PeerRegistry>,
    connections: Arc<ConnectionManager>,
    events: Arc<EventBus>,
    bandwidth: Arc<BandwidthSink>,

    pending_outbound: Mutex<HashMap<PeerId, SharedDial>>,
    pending_inbound: Mutex<HashSet<MultiAddress>>,
    listeners: Mutex<HashMap<MultiAddress, CancellationHandle>>,
    local_addresses: Mutex<Vec<MultiAddress>>,

    next_connection_id: AtomicU64,
    running: AtomicBool,
    shutdown: Mutex<(CancellationToken, CancellationHandle)>,
}

impl Swarm {
    pub fn new(
        config: SwarmConfig,
        transports: TransportRegistry,
        encryption: Vec<Arc<dyn SecureUpgrade>>,
        muxer_factory: MuxerFactory,
    ) -> Arc<Swarm> {
        let local_peer_id = config.local_key.peer_id();
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(PeerRegistry::new(local_peer_id.clone()));
        let connections = ConnectionManager::new(registry.clone(), events.clone());
        let shutdown = CancellationToken::new();

        Arc::new(Swarm {
            local_peer_id,
            local_key: config.local_key,
            connect_timeout: config.connect_timeout,
            policy: config.policy,
            protector: config.protector,
            transports,
            encryption,
            muxer_factory,
            protocol_templates: Mutex::new(Vec::new()),
            registry,
            connections,
            events,
            bandwidth: BandwidthSink::new(),
            pending_outbound: Mutex::new(HashMap::new()),
            pending_inbound: Mutex::new(HashSet::new()),
            listeners: Mutex::new(HashMap::new()),
            local_addresses: Mutex::new(Vec::new()),
            next_connection_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            shutdown: Mutex::new(shutdown),
        })
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn bandwidth(&self) -> &Arc<BandwidthSink> {
        &self.bandwidth
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn has_pending_dial(&self, peer: &PeerId) -> bool {
        self.pending_outbound.lock().contains_key(peer)
    }

    pub fn local_addresses(&self) -> Vec<MultiAddress> {
        self.local_addresses.lock().clone()
    }

    /// Registers an application protocol template mounted onto every
    /// subsequently established connection.
    pub fn register_protocol(&self, name: &str, version: &str) {
        self.protocol_templates.lock().push((name.to_string(), version.to_string()));
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().0.clone()
    }

    /// Re-arms the swarm after a `shutdown`; a fresh shutdown token is
    /// needed since cancellation is one-way.
    pub fn start(&self) {
        self.shutdown.lock().clone_from(&{
            let (token, handle) = CancellationToken::new();
            (token, handle)
        });
        self.running.store(true, Ordering::Release);
    }

    /// Registers the peer, returns the existing connection if any,
    /// otherwise memoises the dial future per peer so concurrent callers
    /// share one outcome.
    pub async fn connect(self: &Arc<Self>, peer: PeerId, cancel: CancellationToken) -> DialResult {
        if peer == self.local_peer_id {
            return Err(Arc::new(SwarmError::Configuration("cannot connect to the local peer".into())));
        }
        if let Some(existing) = self.connections.try_get(&peer) {
            return Ok(existing);
        }

        let shared = {
            let mut pending = self.pending_outbound.lock();
            if let Some(existing) = pending.get(&peer) {
                existing.clone()
            } else {
                let swarm = self.clone();
                let linked = self.shutdown_token().linked(&cancel);
                let target = peer.clone();
                let fut: BoxFuture<'static, DialResult> =
                    async move { swarm.dial(target, linked).await.map_err(Arc::new) }.boxed();
                let shared = fut.shared();
                pending.insert(peer.clone(), shared.clone());
                shared
            }
        };

        let result = shared.await;
        self.pending_outbound.lock().remove(&peer);

        if let Err(err) = &result {
            if let Some(peer_record) = self.registry.get(&peer) {
                debug!("dial to {} failed: {}", peer, err);
                self.events.publish(SwarmEvent::PeerNotReachable(peer_record));
            }
        }
        result
    }

    /// Resolves the peer's known addresses, subtracts self-listening ones,
    /// races the rest, then runs the handshake on the winner.
    async fn dial(self: &Arc<Self>, peer: PeerId, cancel: CancellationToken) -> Result<Arc<PeerConnection>, SwarmError> {
        let known = self.registry.get(&peer);
        let addresses = known.map(|p| p.addresses).unwrap_or_default();
        if addresses.is_empty() {
            return Err(SwarmError::Configuration(format!("no known addresses for peer {}", peer)));
        }

        let listening: Vec<MultiAddress> = self.listeners.lock().keys().map(|a| a.transport_tail()).collect();
        let candidates: Vec<MultiAddress> = addresses
            .into_iter()
            .filter(|addr| !listening.contains(&addr.transport_tail()))
            .map(|addr| addr.with_peer_id(&peer))
            .collect();
        if candidates.is_empty() {
            return Err(SwarmError::AllAddressesFailed(vec!["every known address is self-listening".into()]));
        }

        let racers = candidates.into_iter().map(|addr| {
            let swarm = self.clone();
            let peer = peer.clone();
            let cancel = cancel.clone();
            async move { swarm.dial_one(&peer, &addr, cancel).await }
        });

        let timed = async_std::future::timeout(self.connect_timeout, race_first_ok(racers));
        let conn = match cancel.race(timed).await {
            None => return Err(SwarmError::Cancelled),
            Some(Err(_elapsed)) => return Err(SwarmError::AllAddressesFailed(vec!["dial timed out".into()])),
            Some(Ok(Err(errors))) => return Err(SwarmError::AllAddressesFailed(errors)),
            Some(Ok(Ok(conn))) => conn,
        };

        conn.protocols.add_protocols(self.protocol_templates.lock().iter().map(|(n, v)| (n.as_str(), v.as_str())));
        conn.initiate(&self.encryption, &self.muxer_factory, cancel).await?;

        let remote_peer = conn
            .identity_established
            .peek()
            .ok_or_else(|| SwarmError::BadIdentity("identity not established after initiate".into()))?;
        let peer_id = remote_peer.id.clone();
        let _ = self.registry.register_peer(remote_peer, &self.policy, &self.events);

        let retained = self.connections.add(&peer_id, conn.clone());
        if Arc::ptr_eq(&retained, &conn) {
            self.events.publish(SwarmEvent::ConnectionEstablished(retained.id, peer_id));
        }
        Ok(retained)
    }

    /// Selects the transport via the address's second segment (the
    /// transport tag, e.g. `tcp`) and requires the address to already carry
    /// a trailing peer-id segment matching `peer`.
    async fn dial_one(
        self: &Arc<Self>,
        peer: &PeerId,
        addr: &MultiAddress,
        cancel: CancellationToken,
    ) -> Result<Arc<PeerConnection>, SwarmError> {
        if !addr.ends_in_peer_id() {
            return Err(SwarmError::Configuration(format!("address {} carries no peer id", addr)));
        }
        if !self.policy.evaluate(addr) {
            return Err(SwarmError::PolicyDenied(addr.to_string()));
        }

        let transport_name = addr
            .protocol_at(1)
            .ok_or_else(|| SwarmError::Configuration("address is missing a transport protocol".into()))?;
        let transport = self
            .transports
            .get(transport_name)
            .ok_or_else(|| SwarmError::Transport(TransportError::UnknownProtocol(transport_name.to_string())))?;

        let mut stream = transport.connect(addr, cancel.clone()).await?;
        if let Some(protector) = &self.protector {
            stream = protector.protect(stream);
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let conn = PeerConnection::new(
            id,
            self.local_peer_id.clone(),
            Some(self.local_key.clone()),
            addr.clone(),
            MultiAddress::empty(),
            Direction::Outbound,
            stream,
            self.bandwidth.clone(),
            self.events.clone(),
        );
        let _ = peer;
        Ok(conn)
    }

    /// Starts the transport's accept loop,
    /// expands a wildcard bind address into one concrete address per
    /// non-loopback interface, and records every resulting address against
    /// the same cancellation handle.
    pub async fn start_listening(self: &Arc<Self>, addr: MultiAddress) -> Result<MultiAddress, SwarmError> {
        let transport_name = addr
            .protocol_at(1)
            .ok_or_else(|| SwarmError::Configuration("address is missing a transport protocol".into()))?;
        let transport = self
            .transports
            .get(transport_name)
            .ok_or_else(|| SwarmError::Transport(TransportError::UnknownProtocol(transport_name.to_string())))?;

        let (token, handle) = CancellationToken::new();
        let linked = self.shutdown_token().linked(&token);

        let swarm_for_handler = self.clone();
        let handler: AcceptHandler = Arc::new(move |stream, local, remote| {
            let swarm = swarm_for_handler.clone();
            Box::pin(async move { swarm.on_remote_connect(stream, local, remote).await }) as BoxFuture<'static, ()>
        });

        let bound = transport.listen(&addr, handler, linked).await?;

        let expanded: Vec<MultiAddress> =
            if bound.is_wildcard_ip() { expand_wildcard(&bound) } else { vec![bound.clone()] };

        let mut listeners = self.listeners.lock();
        let mut local_addresses = self.local_addresses.lock();
        for expanded_addr in &expanded {
            let with_id = expanded_addr.with_peer_id(&self.local_peer_id);
            listeners.insert(with_id.clone(), handle.clone());
            if !local_addresses.contains(&with_id) {
                local_addresses.push(with_id);
            }
        }
        drop(listeners);
        drop(local_addresses);

        self.events.publish(SwarmEvent::ListenerEstablished(bound.clone()));
        Ok(bound)
    }

    /// Cancels the token, removes every listener address that shared it,
    /// and shrinks the local peer's address list.
    pub async fn stop_listening(&self, addr: &MultiAddress) {
        let target_handle = {
            let listeners = self.listeners.lock();
            match listeners.get(addr) {
                Some(handle) => handle.clone(),
                None => return,
            }
        };

        let removed: Vec<MultiAddress> = {
            let mut listeners = self.listeners.lock();
            let removed: Vec<MultiAddress> =
                listeners.iter().filter(|(_, h)| h.ptr_eq(&target_handle)).map(|(a, _)| a.clone()).collect();
            for a in &removed {
                listeners.remove(a);
            }
            removed
        };

        target_handle.cancel();
        self.local_addresses.lock().retain(|a| !removed.contains(a));
    }

    /// Inbound handshake entry point, installed as the transport's
    /// [`AcceptHandler`]. Drops the stream outright if the swarm isn't
    /// running or a connection from the same remote address is already in
    /// flight.
    async fn on_remote_connect(self: Arc<Self>, stream: BoxedStream, local: MultiAddress, remote: MultiAddress) {
        if !self.is_running() {
            return;
        }

        {
            let mut pending = self.pending_inbound.lock();
            if !pending.insert(remote.clone()) {
                debug!("dropping duplicate inbound connection from {}", remote);
                return;
            }
        }

        if let Err(err) = self.handle_inbound(stream, local, remote.clone()).await {
            warn!("inbound handshake from {} failed: {}", remote, err);
        }
        self.pending_inbound.lock().remove(&remote);
    }

    async fn handle_inbound(
        self: &Arc<Self>,
        stream: BoxedStream,
        local: MultiAddress,
        remote: MultiAddress,
    ) -> Result<(), SwarmError> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let conn = PeerConnection::new(
            id,
            self.local_peer_id.clone(),
            Some(self.local_key.clone()),
            remote,
            local,
            Direction::Inbound,
            stream,
            self.bandwidth.clone(),
            self.events.clone(),
        );
        conn.protocols.add_protocols(self.protocol_templates.lock().iter().map(|(n, v)| (n.as_str(), v.as_str())));

        conn.accept(&self.encryption, &self.muxer_factory, self.protector.as_ref(), self.shutdown_token()).await?;

        let remote_peer = conn
            .identity_established
            .peek()
            .ok_or_else(|| SwarmError::BadIdentity("identity not established after accept".into()))?;
        let peer_id = remote_peer.id.clone();
        let _ = self.registry.register_peer(remote_peer, &self.policy, &self.events);

        let retained = self.connections.add(&peer_id, conn.clone());
        if Arc::ptr_eq(&retained, &conn) {
            self.events.publish(SwarmEvent::ConnectionEstablished(retained.id, peer_id));
        }
        Ok(())
    }

    /// Stops every listener, clears the connection manager, clears the
    /// peer registry, and resets both policy lists. Calling this after an
    /// earlier stop/start cycle still leaves `local_peer.addresses` empty
    /// and publishes no spurious events.
    pub async fn shutdown(self: &Arc<Self>) {
        self.running.store(false, Ordering::Release);
        self.shutdown.lock().1.cancel();

        let handles: Vec<CancellationHandle> = {
            let mut listeners = self.listeners.lock();
            let handles = listeners.values().cloned().collect();
            listeners.clear();
            handles
        };
        for handle in handles {
            handle.cancel();
        }

        self.connections.clear().await;
        self.registry.clear();
        self.policy.reset();
        self.local_addresses.lock().clear();
        self.pending_outbound.lock().clear();
        self.pending_inbound.lock().clear();
    }
}

/// Races a set of dial attempts, returning the first success and dropping
/// the rest (cancelling them mid-poll); on total failure, returns every
/// per-address error message. The first attempt to produce a connection
/// wins; all others are cancelled.
async fn race_first_ok<F>(futures: impl IntoIterator<Item = F>) -> Result<Arc<PeerConnection>, Vec<String>>
where
    F: std::future::Future<Output = Result<Arc<PeerConnection>, SwarmError>>,
{
    let mut pool: FuturesUnordered<F> = futures.into_iter().collect();
    let mut errors = Vec::new();
    while let Some(result) = pool.next().await {
        match result {
            Ok(conn) => return Ok(conn),
            Err(err) => errors.push(err.to_string()),
        }
    }
    Err(errors)
}

/// Expands a wildcard (`0.0.0.0`/`::`) bind address into one concrete
/// address per non-loopback host interface. Lives at the swarm layer, not
/// per-transport, since the expansion is purely an IP-segment rewrite
/// independent of which transport bound it.
fn expand_wildcard(addr: &MultiAddress) -> Vec<MultiAddress> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| {
                let mut segments = addr.segments().to_vec();
                if let Some(first) = segments.first_mut() {
                    match iface.ip() {
                        std::net::IpAddr::V4(v4) => {
                            first.protocol = "ip4".to_string();
                            first.value = v4.to_string();
                        }
                        std::net::IpAddr::V6(v6) => {
                            first.protocol = "ip6".to_string();
                            first.value = v6.to_string();
                        }
                    }
                }
                MultiAddress::from_segments(segments)
            })
            .collect(),
        Err(err) => {
            warn!("could not enumerate network interfaces: {}", err);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use swarmlink_core::transport::Transport;

    struct LoopbackTransport;

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn connect(&self, _addr: &MultiAddress, _cancel: CancellationToken) -> Result<BoxedStream, TransportError> {
            Err(TransportError::Unreachable("no loopback peer configured in this test".into()))
        }

        async fn listen(
            &self,
            addr: &MultiAddress,
            _handler: AcceptHandler,
            _cancel: CancellationToken,
        ) -> Result<MultiAddress, TransportError> {
            Ok(addr.clone())
        }
    }

    fn test_swarm() -> Arc<Swarm> {
        let mut transports = TransportRegistry::new();
        transports.register("tcp", Arc::new(LoopbackTransport));
        let muxer_factory: MuxerFactory = Arc::new(|_stream, _initiator| {
            panic!("no muxer expected in this test")
        });
        Swarm::new(SwarmConfig::new(Keypair::generate()), transports, Vec::new(), muxer_factory)
    }

    #[async_std::test]
    async fn connect_to_self_is_rejected() {
        let swarm = test_swarm();
        let own_id = swarm.local_peer_id().clone();
        let err = swarm.connect(own_id, CancellationToken::never()).await.unwrap_err();
        assert!(matches!(*err, SwarmError::Configuration(_)));
    }

    #[async_std::test]
    async fn connect_with_no_known_addresses_fails_fast() {
        let swarm = test_swarm();
        let unknown = PeerId::from_bytes(vec![9, 9, 9]);
        let err = swarm.connect(unknown, CancellationToken::never()).await.unwrap_err();
        assert!(matches!(*err, SwarmError::Configuration(_)));
    }

    #[async_std::test]
    async fn shutdown_clears_local_addresses_and_can_restart() {
        let swarm = test_swarm();
        swarm.start_listening("/ip4/127.0.0.1/tcp/4001".parse().unwrap()).await.unwrap();
        assert!(!swarm.local_addresses().is_empty());

        swarm.shutdown().await;
        assert!(swarm.local_addresses().is_empty());
        assert!(!swarm.is_running());

        swarm.start();
        assert!(swarm.is_running());
    }
}
