//! The swarm-wide event bus.
//!
//! One broadcast channel per subscriber, fed from a single publish side.
//! Subscription is weak in spirit: a subscriber that stops polling its
//! receiver (or drops it) simply stops getting events — `publish` never
//! blocks on a slow or gone subscriber, it just prunes the dead sender on
//! its next attempt.

use parking_lot::Mutex;

use futures::channel::mpsc;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::peer::{Peer, PeerId};

/// Opaque identifier for a [`crate::connection::PeerConnection`], used in
/// events so the bus doesn't need to own connection lifetimes.
pub type ConnectionId = u64;

#[derive(Clone, Debug)]
pub enum SwarmEvent {
    PeerDiscovered(Peer),
    PeerRemoved(Peer),
    ConnectionEstablished(ConnectionId, PeerId),
    PeerDisconnected(Peer),
    PeerNotReachable(Peer),
    ListenerEstablished(MultiAddress),
    Closed(ConnectionId),
    SubstreamCreated(ConnectionId, u64, String),
    SubstreamClosed(ConnectionId, u64),
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SwarmEvent>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SwarmEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SwarmEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

/// A one-shot-per-dispose "Closed" signal for a single [`crate::connection::PeerConnection`].
/// Disposing a connection twice publishes `Closed` exactly once.
#[derive(Default)]
pub struct ClosedSignal {
    fired: std::sync::atomic::AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

impl ClosedSignal {
    pub fn new() -> ClosedSignal {
        ClosedSignal::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Fires the signal exactly once no matter how many times this is called.
    pub fn fire(&self) {
        if self.fired.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        for tx in self.subscribers.lock().iter() {
            let _ = tx.unbounded_send(());
        }
    }
}
