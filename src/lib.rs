//! `swarmlink`: the node-side runtime of a libp2p-compatible peer-to-peer
//! networking stack.
//!
//! This is a thin aggregator over the workspace's per-concern crates: it
//! does nothing but re-export its members behind feature flags and offer
//! a couple of convenience constructors. Application code typically only
//! needs this crate; `swarmlink-core`/`swarmlink-swarm`/etc. are depended
//! on directly only by code implementing a new transport, secure channel,
//! or muxer.

pub use swarmlink_core as core;
pub use swarmlink_swarm as swarm;

#[cfg(feature = "plaintext")]
pub use swarmlink_plaintext as plaintext;
#[cfg(feature = "secio")]
pub use swarmlink_secio as secio;
#[cfg(feature = "identify")]
pub use swarmlink_identify as identify;
#[cfg(feature = "mplex")]
pub use swarmlink_mplex as mplex;
#[cfg(feature = "tcp-async-std")]
pub use swarmlink_tcp as tcp;
#[cfg(feature = "udp")]
pub use swarmlink_udp as udp;

pub use multistream_select;

pub use crate::core::peer::{Keypair, Peer, PeerId};
pub use crate::core::multiaddr::MultiAddress;
pub use crate::swarm::{Swarm, SwarmConfig};

use std::sync::Arc;

use crate::core::muxing::StreamMuxer;
use crate::core::secure::SecureUpgrade;
use crate::core::transport::TransportRegistry;
use crate::swarm::MuxerFactory;

/// Builds a [`Swarm`] wired with every transport/secure-channel/muxer this
/// build was compiled with: a one-call setup for the common case, with
/// `Swarm::new` still available directly for anyone who wants to hand-pick
/// the candidate set.
///
/// Registers, in order: TCP (if `tcp-async-std`), then UDP (if `udp`, as a
/// registry slot only — its `listen`/`connect` always fail). Encryption
/// candidates are tried in this order during negotiation: plaintext, then
/// secio.
pub fn development_swarm(local_key: Keypair) -> Arc<Swarm> {
    let mut transports = TransportRegistry::new();
    #[cfg(feature = "tcp-async-std")]
    transports.register(tcp::PROTOCOL_NAME, Arc::new(tcp::TcpTransport::new()));
    #[cfg(feature = "udp")]
    transports.register(udp::PROTOCOL_NAME, Arc::new(udp::UdpTransport::new()));

    let mut encryption: Vec<Arc<dyn SecureUpgrade>> = Vec::new();
    #[cfg(feature = "plaintext")]
    encryption.push(Arc::new(plaintext::Plaintext::new()));
    #[cfg(feature = "secio")]
    encryption.push(Arc::new(secio::Secio::new()));

    let muxer_factory: MuxerFactory = Arc::new(|stream, initiator| {
        #[cfg(feature = "mplex")]
        {
            Arc::new(mplex::Mplex::new(stream, initiator)) as Arc<dyn StreamMuxer>
        }
        #[cfg(not(feature = "mplex"))]
        {
            let _ = (stream, initiator);
            panic!("no stream multiplexer compiled in — enable the `mplex` feature")
        }
    });

    let config = SwarmConfig::new(local_key);
    let swarm = Swarm::new(config, transports, encryption, muxer_factory);

    #[cfg(feature = "identify")]
    swarm.register_protocol("ipfs/id", "1.0.0");

    swarm
}

#[cfg(all(test, feature = "tcp-async-std", feature = "plaintext", feature = "mplex"))]
mod tests {
    use super::*;

    #[async_std::test]
    async fn development_swarm_listens_and_reports_a_concrete_address() {
        let swarm = development_swarm(Keypair::generate());
        let bound = swarm.start_listening("/ip4/127.0.0.1/tcp/0".parse().unwrap()).await.unwrap();
        assert!(bound.segments().iter().any(|s| s.protocol == "tcp" && s.value != "0"));
        swarm.shutdown().await;
    }
}
