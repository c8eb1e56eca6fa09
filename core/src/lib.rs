//! Core traits and data types of the swarmlink connection engine: peer
//! identity, multiaddress, address filters, the message framer, the
//! transport registry, and the secure-channel/muxer seams that the higher
//! layers (`multistream-select`, `swarmlink-mplex`, `swarmlink-swarm`)
//! implement against.

pub mod bandwidth;
pub mod cancel;
pub mod error;
pub mod filter;
pub mod framer;
pub mod multiaddr;
pub mod muxing;
pub mod peer;
pub mod secure;
pub mod transport;

pub use cancel::{CancellationHandle, CancellationToken};
pub use error::SwarmError;
pub use filter::{AllowList, DenyList, Policy};
pub use multiaddr::{MultiAddress, MultiAddressError, Segment};
pub use muxing::{MuxerEvent, MuxingError, StreamMuxer};
pub use peer::{Keypair, Peer, PeerId};
pub use secure::{SecureChannelError, SecureUpgrade};
pub use transport::{AcceptHandler, BoxedStream, DuplexStream, Transport, TransportError, TransportRegistry};
