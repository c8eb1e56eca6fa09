//! Dead-peer backoff / blacklisting control loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::peer::{Peer, PeerId};

use crate::events::{EventBus, SwarmEvent};
use crate::swarm::Swarm;

/// Default backoff bounds for [`PeerManager`].
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(64 * 60);

struct DeadPeer {
    peer: Peer,
    backoff: Duration,
    next_attempt: Instant,
}

/// Subscribes to `ConnectionEstablished` / `PeerNotReachable`, maintains an
/// exponential backoff per dead peer, and periodically retries.
pub struct PeerManager {
    swarm: Arc<Swarm>,
    initial_backoff: Duration,
    max_backoff: Duration,
    dead: Mutex<HashMap<PeerId, DeadPeer>>,
}

impl PeerManager {
    pub fn spawn(
        swarm: Arc<Swarm>,
        events: Arc<EventBus>,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Arc<PeerManager> {
        let manager = Arc::new(PeerManager {
            swarm,
            initial_backoff,
            max_backoff,
            dead: Mutex::new(HashMap::new()),
        });

        let mut rx = events.subscribe();
        let event_manager = manager.clone();
        async_std::task::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = rx.next().await {
                match event {
                    SwarmEvent::ConnectionEstablished(_, peer_id) => event_manager.mark_reachable(&peer_id),
                    SwarmEvent::PeerNotReachable(peer) => event_manager.mark_unreachable(peer),
                    _ => {}
                }
            }
        });

        let retry_manager = manager.clone();
        async_std::task::spawn(async move {
            retry_manager.retry_loop().await;
        });

        manager
    }

    /// Called when a connection to `peer` succeeds: removes it from the
    /// dead set and lifts any blacklist entry.
    pub fn mark_reachable(&self, peer_id: &PeerId) {
        if self.dead.lock().remove(peer_id).is_some() {
            let pattern = blacklist_pattern(peer_id);
            self.swarm.policy().deny.remove(&pattern);
            debug!("peer {} reachable again, backoff cleared", peer_id);
        }
    }

    /// Called when a connection to `peer` fails: inserts/updates the
    /// dead-peer entry and blacklists `/p2p/<id>`. If doubling the backoff would exceed
    /// `max_backoff`, the peer is deregistered permanently instead.
    fn mark_unreachable(&self, peer: Peer) {
        let mut dead = self.dead.lock();
        let next_backoff = match dead.get(&peer.id) {
            Some(existing) => existing.backoff * 2,
            None => self.initial_backoff,
        };

        if next_backoff > self.max_backoff {
            dead.remove(&peer.id);
            drop(dead);
            self.swarm.registry().deregister_peer(&peer.id, self.swarm.events());
            debug!("peer {} exceeded max backoff, deregistered permanently", peer.id);
            return;
        }

        let pattern = blacklist_pattern(&peer.id);
        self.swarm.policy().deny.add(pattern);
        dead.insert(
            peer.id.clone(),
            DeadPeer { peer, backoff: next_backoff, next_attempt: Instant::now() + next_backoff },
        );
    }

    /// Background loop (interval = `initial_backoff`): scans for entries
    /// whose `next_attempt` has elapsed, lifts the blacklist entry
    /// temporarily, and attempts a reconnect.
    async fn retry_loop(self: Arc<Self>) {
        loop {
            async_std::task::sleep(self.initial_backoff).await;

            let due: Vec<Peer> = {
                let dead = self.dead.lock();
                let now = Instant::now();
                dead.values().filter(|entry| entry.next_attempt < now).map(|entry| entry.peer.clone()).collect()
            };

            for peer in due {
                let pattern = blacklist_pattern(&peer.id);
                self.swarm.policy().deny.remove(&pattern);
                let result = self
                    .swarm
                    .connect(peer.id.clone(), swarmlink_core::cancel::CancellationToken::never())
                    .await;
                if result.is_err() {
                    self.swarm.policy().deny.add(pattern);
                }
            }
        }
    }
}

fn blacklist_pattern(peer: &PeerId) -> MultiAddress {
    MultiAddress::empty().with("p2p", peer.to_base58())
}
