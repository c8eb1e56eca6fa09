//! Minimum-connection maintenance loop.
//!
//! Subscribes to `PeerDiscovered`/`PeerDisconnected` and dials out whenever
//! `active_connections + pending_connects` falls short of `min_connections`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rand::seq::SliceRandom;
use swarmlink_core::peer::PeerId;

use crate::events::{EventBus, SwarmEvent};
use crate::swarm::Swarm;

/// Default `min_connections`.
pub const DEFAULT_MIN_CONNECTIONS: usize = 16;

pub struct AutoDialer {
    swarm: Arc<Swarm>,
    min_connections: usize,
    pending_connects: AtomicUsize,
}

impl AutoDialer {
    /// Subscribes to the swarm's event bus and spawns the background
    /// reaction loop. Returns the `AutoDialer` handle so callers can read
    /// `pending_connects` for diagnostics; dropping it does not stop the
    /// loop. The loop is tied to the swarm's event bus, not this handle —
    /// cleanup is cancellation-driven through the swarm's own shutdown.
    pub fn spawn(swarm: Arc<Swarm>, events: Arc<EventBus>, min_connections: usize) -> Arc<AutoDialer> {
        let dialer = Arc::new(AutoDialer {
            swarm,
            min_connections,
            pending_connects: AtomicUsize::new(0),
        });
        let mut rx = events.subscribe();
        let task_dialer = dialer.clone();
        async_std::task::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = rx.next().await {
                match event {
                    SwarmEvent::PeerDiscovered(peer) => task_dialer.on_discovered(peer.id).await,
                    SwarmEvent::PeerDisconnected(peer) => task_dialer.on_disconnected(peer.id).await,
                    _ => {}
                }
            }
        });
        dialer
    }

    pub fn pending_connects(&self) -> usize {
        self.pending_connects.load(Ordering::Relaxed)
    }

    fn below_target(&self) -> bool {
        let active = self.swarm.connection_manager().active_connection_count();
        active + self.pending_connects.load(Ordering::Relaxed) < self.min_connections
    }

    async fn on_discovered(&self, discovered: PeerId) {
        if !self.swarm.is_running() || !self.below_target() {
            return;
        }
        self.dial_and_track(discovered).await;
    }

    async fn on_disconnected(&self, disconnected: PeerId) {
        if !self.swarm.is_running() || !self.below_target() {
            return;
        }
        let candidate = self.pick_reconnect_candidate(&disconnected);
        if let Some(peer) = candidate {
            self.dial_and_track(peer).await;
        }
    }

    /// Picks uniformly at random a known peer with no connected address,
    /// that isn't the peer that just disconnected, that policy allows, and
    /// that has no connection already in flight.
    fn pick_reconnect_candidate(&self, just_disconnected: &PeerId) -> Option<PeerId> {
        let mut candidates: Vec<PeerId> = self
            .swarm
            .registry()
            .all()
            .into_iter()
            .filter(|p| p.connected_address.is_none())
            .filter(|p| &p.id != just_disconnected)
            .filter(|p| self.swarm.policy().evaluate_peer(p))
            .filter(|p| !self.swarm.has_pending_dial(&p.id))
            .map(|p| p.id)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.pop()
    }

    async fn dial_and_track(&self, peer: PeerId) {
        self.pending_connects.fetch_add(1, Ordering::AcqRel);
        let result = self.swarm.connect(peer.clone(), swarmlink_core::cancel::CancellationToken::never()).await;
        self.pending_connects.fetch_sub(1, Ordering::AcqRel);
        match result {
            Ok(_) => debug!("auto-dialer connected to {}", peer),
            Err(err) => warn!("auto-dialer failed to connect to {}: {}", peer, err),
        }
    }
}
