//! At-most-one-active-connection bookkeeping per peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use swarmlink_core::peer::PeerId;

use crate::connection::PeerConnection;
use crate::events::{EventBus, SwarmEvent};
use crate::registry::PeerRegistry;

/// Maps `peer-id -> ordered list of PeerConnection`. Holds the registry
/// and event bus it needs to settle `connected_address` and publish
/// `PeerDisconnected`, so it can subscribe to each connection's `Closed`
/// signal and run the same removal path a caller-driven `remove` would.
pub struct ConnectionManager {
    connections: Mutex<HashMap<PeerId, Vec<Arc<PeerConnection>>>>,
    registry: Arc<PeerRegistry>,
    events: Arc<EventBus>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<PeerRegistry>, events: Arc<EventBus>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager { connections: Mutex::new(HashMap::new()), registry, events })
    }

    /// Indexes by remote peer id. If the same connection
    /// object is already present, returns it unchanged; otherwise appends,
    /// subscribes to the connection's `Closed` signal so self-disposal
    /// routes through `remove`, and returns the connection just added (the
    /// caller uses this to tell whether it "won" a race and should publish
    /// `ConnectionEstablished`).
    pub fn add(self: &Arc<Self>, peer: &PeerId, conn: Arc<PeerConnection>) -> Arc<PeerConnection> {
        let mut connections = self.connections.lock();
        let list = connections.entry(peer.clone()).or_insert_with(Vec::new);

        if let Some(existing) = list.iter().find(|c| Arc::ptr_eq(c, &conn)) {
            return existing.clone();
        }

        let had_address_already =
            self.registry.get(peer).map_or(false, |p| p.connected_address.is_some());
        list.push(conn.clone());
        drop(connections);

        if !had_address_already {
            self.registry.update(peer, |p| p.connected_address = Some(conn.remote_addr.clone()));
        }

        self.spawn_closed_watcher(peer.clone(), conn.clone());
        conn
    }

    fn spawn_closed_watcher(self: &Arc<Self>, peer: PeerId, conn: Arc<PeerConnection>) {
        let manager = self.clone();
        let mut closed_rx = conn.closed.subscribe();
        async_std::task::spawn(async move {
            use futures::StreamExt;
            if closed_rx.next().await.is_some() {
                manager.events.publish(SwarmEvent::Closed(conn.id));
                manager.remove(&peer, &conn).await;
            }
        });
    }

    /// Drops `conn` from its peer's list, disposes it,
    /// and updates `connected_address` / publishes `PeerDisconnected` per
    /// the transition rules.
    pub async fn remove(&self, peer: &PeerId, conn: &Arc<PeerConnection>) {
        let remaining = {
            let mut connections = self.connections.lock();
            match connections.get_mut(peer) {
                Some(list) => {
                    list.retain(|c| !Arc::ptr_eq(c, conn));
                    let remaining = list.clone();
                    if remaining.is_empty() {
                        connections.remove(peer);
                    }
                    Some(remaining)
                }
                None => None,
            }
        };

        conn.dispose().await;

        if let Some(remaining) = remaining {
            self.settle_address(peer, &remaining);
        }
    }

    /// Disposes every connection for `peer`.
    pub async fn remove_peer(&self, peer: &PeerId) {
        let list = self.connections.lock().remove(peer).unwrap_or_default();
        for conn in &list {
            conn.dispose().await;
        }
        if !list.is_empty() {
            self.settle_address(peer, &[]);
        }
    }

    fn settle_address(&self, peer: &PeerId, remaining: &[Arc<PeerConnection>]) {
        if let Some(last) = remaining.last() {
            self.registry.update(peer, |p| p.connected_address = Some(last.remote_addr.clone()));
            return;
        }
        let had_any = self.registry.update(peer, |p| {
            let had = p.connected_address.is_some();
            p.connected_address = None;
            had
        });
        if had_any == Some(true) {
            if let Some(peer_record) = self.registry.get(peer) {
                self.events.publish(SwarmEvent::PeerDisconnected(peer_record));
            }
        }
    }

    /// The first active connection, or none. No side effects, despite the
    /// name suggesting a lazy-get-or-create: callers that need to create a
    /// connection on miss do so themselves via `add`.
    pub fn try_get(&self, peer: &PeerId) -> Option<Arc<PeerConnection>> {
        self.connections.lock().get(peer)?.iter().find(|c| c.is_active()).cloned()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.try_get(peer).is_some()
    }

    /// Removes and disposes every connection. Intended for
    /// swarm shutdown; dispose is run synchronously to completion.
    pub async fn clear(&self) {
        let all: Vec<Arc<PeerConnection>> = {
            let mut connections = self.connections.lock();
            let all = connections.values().flatten().cloned().collect();
            connections.clear();
            all
        };
        for conn in all {
            conn.dispose().await;
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.lock().values().filter(|list| list.iter().any(|c| c.is_active())).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use swarmlink_core::bandwidth::BandwidthSink;
    use swarmlink_core::transport::BoxedStream;

    use crate::connection::Direction;

    fn conn(id: u64, peer: PeerId, remote: &str) -> Arc<PeerConnection> {
        let stream: BoxedStream = Box::pin(Cursor::new(Vec::new()));
        PeerConnection::new(
            id,
            peer,
            None,
            remote.parse().unwrap(),
            "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
            Direction::Outbound,
            stream,
            BandwidthSink::new(),
            Arc::new(EventBus::new()),
        )
    }

    #[async_std::test]
    async fn adding_same_connection_twice_is_idempotent() {
        let registry = Arc::new(PeerRegistry::new(PeerId::from_bytes(vec![0])));
        let events = Arc::new(EventBus::new());
        let manager = ConnectionManager::new(registry, events);
        let peer = PeerId::from_bytes(vec![1]);
        let c = conn(1, peer.clone(), "/ip4/10.0.0.1/tcp/4001");

        manager.add(&peer, c.clone());
        manager.add(&peer, c.clone());
        assert_eq!(manager.active_connection_count(), 1);
    }

    #[async_std::test]
    async fn removing_last_connection_clears_address_and_publishes_disconnected() {
        let registry = Arc::new(PeerRegistry::new(PeerId::from_bytes(vec![0])));
        let events = Arc::new(EventBus::new());
        let peer = PeerId::from_bytes(vec![1]);
        registry
            .register_peer(swarmlink_core::peer::Peer::new(peer.clone()), &Default::default(), &events)
            .unwrap();

        let manager = ConnectionManager::new(registry.clone(), events.clone());
        let c = conn(1, peer.clone(), "/ip4/10.0.0.1/tcp/4001");
        manager.add(&peer, c.clone());
        assert!(registry.get(&peer).unwrap().connected_address.is_some());

        let mut rx = events.subscribe();
        manager.remove(&peer, &c).await;
        assert!(registry.get(&peer).unwrap().connected_address.is_none());

        use futures::StreamExt;
        let event = rx.next().await.unwrap();
        assert!(matches!(event, SwarmEvent::PeerDisconnected(_)));
    }

    #[async_std::test]
    async fn disposing_a_connection_directly_routes_through_remove() {
        let registry = Arc::new(PeerRegistry::new(PeerId::from_bytes(vec![0])));
        let events = Arc::new(EventBus::new());
        let peer = PeerId::from_bytes(vec![1]);
        registry
            .register_peer(swarmlink_core::peer::Peer::new(peer.clone()), &Default::default(), &events)
            .unwrap();

        let manager = ConnectionManager::new(registry.clone(), events.clone());
        let c = conn(1, peer.clone(), "/ip4/10.0.0.1/tcp/4001");
        manager.add(&peer, c.clone());

        let mut rx = events.subscribe();
        c.dispose().await;

        use futures::StreamExt;
        let event = rx.next().await.unwrap();
        assert!(matches!(event, SwarmEvent::PeerDisconnected(_)));
        assert_eq!(manager.active_connection_count(), 0);
    }
}
