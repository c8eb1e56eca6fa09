//! The Swarm crate: the peer connection handshake pipeline,
//! connection manager, dial coordinator/listener manager, and the two
//! background control loops (AutoDialer, PeerManager) that ride on its
//! event bus.
//!
//! This crate programs against `swarmlink_core`'s seam traits
//! (`Transport`, `SecureUpgrade`, `StreamMuxer`) and `multistream-select`;
//! it does not depend on any concrete transport, secure-channel, or muxer
//! implementation — those are wired in by the top-level `swarmlink` crate.

pub mod auto_dialer;
pub mod completion;
pub mod connection;
pub mod connection_manager;
pub mod dispatch;
pub mod events;
pub mod peer_manager;
pub mod protector;
pub mod registry;
pub mod swarm;

pub use auto_dialer::{AutoDialer, DEFAULT_MIN_CONNECTIONS};
pub use completion::CompletionSlot;
pub use connection::{Direction, MuxerFactory, PeerConnection};
pub use connection_manager::ConnectionManager;
pub use dispatch::ProtocolDispatchTable;
pub use events::{ClosedSignal, ConnectionId, EventBus, SwarmEvent};
pub use peer_manager::{PeerManager, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
pub use protector::NetworkProtector;
pub use registry::{PeerRegistry, RegistryError};
pub use swarm::{Swarm, SwarmConfig};
