//! The peer registry that lives inside the Swarm.
//!
//! Interns `Peer` records keyed by `PeerId`, merges discovery updates, and
//! publishes `PeerDiscovered`/`PeerRemoved` on the swarm event bus. This is
//! deliberately not its own crate: peer bookkeeping stays folded into
//! `core`/`swarm` rather than a standalone crate, so this module stays
//! local to `swarmlink-swarm`.

use std::collections::HashMap;

use parking_lot::RwLock;
use swarmlink_core::filter::Policy;
use swarmlink_core::peer::{Peer, PeerId};

use crate::events::{EventBus, SwarmEvent};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("peer id is missing")]
    MissingPeerId,
    #[error("cannot register the local peer")]
    IsLocalPeer,
    #[error("policy denied this peer")]
    PolicyDenied,
    #[error("address must end in a peer-id protocol")]
    AddressMissingPeerId,
}

/// The swarm's table of known peers, plus the operations on it.
pub struct PeerRegistry {
    local_peer_id: PeerId,
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    pub fn new(local_peer_id: PeerId) -> PeerRegistry {
        PeerRegistry { local_peer_id, peers: RwLock::new(HashMap::new()) }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().get(id).cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Requires the address to end in a
    /// peer-id protocol; merges the address onto that peer's entry (or
    /// creates one, discovering it for the first time).
    pub fn register_peer_address(
        &self,
        addr: swarmlink_core::multiaddr::MultiAddress,
        policy: &Policy,
        events: &EventBus,
    ) -> Result<(), RegistryError> {
        if !addr.ends_in_peer_id() {
            return Err(RegistryError::AddressMissingPeerId);
        }
        let id = addr.peer_id().ok_or(RegistryError::AddressMissingPeerId)?;
        let mut incoming = Peer::new(id);
        incoming.add_address(addr);
        self.register_peer(incoming, policy, events)
    }

    /// Fails if the peer id is missing, equals the local peer id, or the
    /// composite policy denies it. Merges into an existing entry per
    /// [`Peer::merge`]; emits `PeerDiscovered` only on first insert.
    pub fn register_peer(
        &self,
        peer: Peer,
        policy: &Policy,
        events: &EventBus,
    ) -> Result<(), RegistryError> {
        if peer.id.as_bytes().is_empty() {
            return Err(RegistryError::MissingPeerId);
        }
        if peer.id == self.local_peer_id {
            return Err(RegistryError::IsLocalPeer);
        }
        if !policy.evaluate_peer(&peer) {
            return Err(RegistryError::PolicyDenied);
        }

        let mut peers = self.peers.write();
        match peers.get_mut(&peer.id) {
            Some(existing) => {
                existing.merge(&peer);
            }
            None => {
                let discovered = peer.clone();
                peers.insert(peer.id.clone(), peer);
                drop(peers);
                events.publish(SwarmEvent::PeerDiscovered(discovered));
                return Ok(());
            }
        }
        Ok(())
    }

    /// Removes and emits `PeerRemoved`.
    pub fn deregister_peer(&self, id: &PeerId, events: &EventBus) {
        let removed = self.peers.write().remove(id);
        if let Some(peer) = removed {
            events.publish(SwarmEvent::PeerRemoved(peer));
        }
    }

    /// Applies `f` to the stored peer, if present, keeping the registry's
    /// lock scope tight. Used by the connection manager to update
    /// `connected_address` and by identity completion to merge addresses.
    pub fn update<R>(&self, id: &PeerId, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.peers.write().get_mut(id).map(f)
    }

    pub fn clear(&self) {
        self.peers.write().clear();
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn id(n: u8) -> PeerId {
        PeerId::from_bytes(vec![n])
    }

    #[test]
    fn rejects_local_peer() {
        let registry = PeerRegistry::new(id(1));
        let events = EventBus::new();
        let policy = Policy::new();
        let err = registry.register_peer(Peer::new(id(1)), &policy, &events).unwrap_err();
        assert!(matches!(err, RegistryError::IsLocalPeer));
    }

    #[test]
    fn first_insert_emits_peer_discovered_only_once() {
        let registry = PeerRegistry::new(id(1));
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let policy = Policy::new();

        registry.register_peer(Peer::new(id(2)), &policy, &events).unwrap();
        registry.register_peer(Peer::new(id(2)), &policy, &events).unwrap();

        let mut discovered = 0;
        while let Ok(Some(event)) = rx.try_next() {
            if matches!(event, SwarmEvent::PeerDiscovered(_)) {
                discovered += 1;
            }
        }
        assert_eq!(discovered, 1);
    }

    #[test]
    fn policy_denies_registration() {
        let registry = PeerRegistry::new(id(1));
        let events = EventBus::new();
        let policy = Policy::new();
        let addr: swarmlink_core::multiaddr::MultiAddress = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        policy.deny.add("/ip4/10.0.0.1".parse().unwrap());
        let mut peer = Peer::new(id(2));
        peer.add_address(addr);
        let err = registry.register_peer(peer, &policy, &events).unwrap_err();
        assert!(matches!(err, RegistryError::PolicyDenied));
    }
}
