//! The peer connection handshake pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::lock::Mutex as AsyncMutex;
use log::warn;
use swarmlink_core::bandwidth::{BandwidthSink, CountingStream};
use swarmlink_core::cancel::CancellationToken;
use swarmlink_core::error::SwarmError;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::muxing::{MuxerEvent, StreamMuxer};
use swarmlink_core::peer::{Keypair, Peer, PeerId};
use swarmlink_core::secure::SecureUpgrade;
use swarmlink_core::transport::BoxedStream;

use crate::completion::CompletionSlot;
use crate::dispatch::ProtocolDispatchTable;
use crate::events::{ClosedSignal, ConnectionId, EventBus, SwarmEvent};
use crate::protector::NetworkProtector;

pub const MPLEX_PROTOCOL_NAME: &str = "mplex";
pub const MPLEX_PROTOCOL_VERSION: &str = "6.7.0";
pub const IDENTIFY_PROTOCOL: &str = "/ipfs/id/1.0.0";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Builds a [`StreamMuxer`] over the post-security stream. Injected rather
/// than imported directly so this crate stays decoupled from any concrete
/// multiplexer implementation — the top-level aggregator crate supplies
/// the mplex one.
pub type MuxerFactory = Arc<dyn Fn(BoxedStream, bool) -> Arc<dyn StreamMuxer> + Send + Sync>;

/// Hosts the handshake pipeline, owns the base stream, and exposes the
/// three completion slots a caller can wait on independently: security,
/// muxer, and identity.
pub struct PeerConnection {
    pub id: ConnectionId,
    pub local_peer: PeerId,
    pub local_key: Option<Keypair>,
    pub remote_addr: MultiAddress,
    pub local_addr: MultiAddress,
    pub direction: Direction,
    stream: AsyncMutex<Option<BoxedStream>>,
    pub protocols: ProtocolDispatchTable,
    pub security_established: CompletionSlot<()>,
    pub muxer_established: CompletionSlot<Arc<dyn StreamMuxer>>,
    pub identity_established: CompletionSlot<Peer>,
    pub bandwidth: Arc<BandwidthSink>,
    pub closed: ClosedSignal,
    disposed: AtomicBool,
    events: Arc<EventBus>,
}

impl PeerConnection {
    pub fn new(
        id: ConnectionId,
        local_peer: PeerId,
        local_key: Option<Keypair>,
        remote_addr: MultiAddress,
        local_addr: MultiAddress,
        direction: Direction,
        raw_stream: BoxedStream,
        bandwidth: Arc<BandwidthSink>,
        events: Arc<EventBus>,
    ) -> Arc<PeerConnection> {
        let counted: BoxedStream = Box::pin(CountingStream::new(raw_stream, bandwidth.clone()));
        Arc::new(PeerConnection {
            id,
            local_peer,
            local_key,
            remote_addr,
            local_addr,
            direction,
            stream: AsyncMutex::new(Some(counted)),
            protocols: ProtocolDispatchTable::new(),
            security_established: CompletionSlot::new(),
            muxer_established: CompletionSlot::new(),
            identity_established: CompletionSlot::new(),
            bandwidth,
            closed: ClosedSignal::new(),
            disposed: AtomicBool::new(false),
            events,
        })
    }

    /// A connection is active iff it hasn't been disposed — the stream can
    /// still, in principle, read and write.
    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    /// Closes the stream exactly once, cancels any unresolved completion
    /// slots, and fires `closed` exactly once, however many times it's called.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stream.lock().await.take();
        self.security_established.cancel();
        self.muxer_established.cancel();
        self.identity_established.cancel();
        self.closed.fire();
    }

    /// Outbound handshake: multistream header, security,
    /// multistream header again, mplex, then identity.
    pub async fn initiate(
        self: &Arc<Self>,
        encryption: &[Arc<dyn SecureUpgrade>],
        muxer_factory: &MuxerFactory,
        cancel: CancellationToken,
    ) -> Result<(), SwarmError> {
        let mut guard = self.stream.lock().await;
        let mut stream = guard.take().ok_or(SwarmError::Cancelled)?;

        let negotiated = multistream_select::dialer_select(
            &mut stream,
            encryption.iter().map(|e| e.protocol_name().to_string()),
        )
        .await;
        let chosen_name = match negotiated {
            Ok(name) => name,
            Err(err) => {
                self.security_established.cancel();
                *guard = Some(stream);
                return Err(SwarmError::AllAddressesFailed(vec![err.to_string()]));
            }
        };
        let upgrade = encryption
            .iter()
            .find(|e| e.protocol_name() == chosen_name)
            .expect("negotiated name came from this exact candidate list");

        let (mut stream, _remote_id) = upgrade
            .encrypt(stream, self.local_key.as_ref(), cancel.clone())
            .await
            .map_err(|e| SwarmError::SecureChannel(e))?;
        self.security_established.try_resolve(());

        self.protocols.add_protocol(MPLEX_PROTOCOL_NAME, MPLEX_PROTOCOL_VERSION);
        self.protocols
            .establish_protocol(MPLEX_PROTOCOL_NAME, &mut stream)
            .await
            .map_err(|e| SwarmError::NegotiationExhausted(vec![e.to_string()]))?;

        let muxer = muxer_factory(stream, true);
        self.muxer_established.try_resolve(muxer.clone());

        let substream = muxer
            .create_stream(IDENTIFY_PROTOCOL)
            .await
            .map_err(|e| SwarmError::Configuration(e.to_string()))?;
        let remote_peer = self.exchange_identity_over(substream, cancel).await?;
        self.identity_established.try_resolve(remote_peer);
        Ok(())
    }

    /// Inbound handshake: header, security (listener
    /// retries over candidates until one matches), header again, mplex
    /// (same retry shape), then a background substream dispatch loop that
    /// picks the identify substream out as it arrives rather than opening
    /// one itself — the dialer is the side that initiates identify.
    pub async fn accept(
        self: &Arc<Self>,
        encryption: &[Arc<dyn SecureUpgrade>],
        muxer_factory: &MuxerFactory,
        protector: Option<&Arc<dyn NetworkProtector>>,
        cancel: CancellationToken,
    ) -> Result<(), SwarmError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.take().ok_or(SwarmError::Cancelled)?;
        let mut stream = match protector {
            Some(protector) => protector.protect(stream),
            None => stream,
        };

        if let Err(err) = multistream_select::listener_negotiate_header(&mut stream).await {
            self.security_established.cancel();
            return Err(SwarmError::NegotiationExhausted(vec![err.to_string()]));
        }

        let chosen_name = loop {
            match multistream_select::listener_select_once(&mut stream, |candidate| {
                encryption.iter().any(|e| e.protocol_name() == candidate)
            })
            .await
            {
                Ok(Some(name)) => break name,
                Ok(None) => continue,
                Err(err) => {
                    self.security_established.cancel();
                    return Err(SwarmError::NegotiationExhausted(vec![err.to_string()]));
                }
            }
        };
        let upgrade = encryption
            .iter()
            .find(|e| e.protocol_name() == chosen_name)
            .expect("negotiated name came from this exact candidate list");

        let (mut stream, _remote_id) = upgrade
            .encrypt(stream, self.local_key.as_ref(), cancel.clone())
            .await
            .map_err(SwarmError::SecureChannel)?;
        self.security_established.try_resolve(());

        multistream_select::listener_negotiate_header(&mut stream)
            .await
            .map_err(|e| SwarmError::NegotiationExhausted(vec![e.to_string()]))?;

        self.protocols.add_protocol(MPLEX_PROTOCOL_NAME, MPLEX_PROTOCOL_VERSION);
        loop {
            match multistream_select::listener_select_once(&mut stream, |candidate| self.protocols.contains(candidate))
                .await
            {
                Ok(Some(_)) => break,
                Ok(None) => continue,
                Err(err) => return Err(SwarmError::NegotiationExhausted(vec![err.to_string()])),
            }
        }

        let muxer = muxer_factory(stream, false);
        self.muxer_established.try_resolve(muxer.clone());
        drop(guard);

        self.spawn_substream_dispatch(muxer, cancel.clone());

        cancel.race(self.identity_established.wait()).await.ok_or(SwarmError::Cancelled)?;
        Ok(())
    }

    /// Shared with both directions: sends local identity info over an
    /// already-open substream, receives and validates the remote's, and
    /// builds the resulting [`Peer`] record via `verify_peer_id`, completing
    /// `identity_established`.
    async fn exchange_identity_over(
        self: &Arc<Self>,
        mut substream: BoxedStream,
        cancel: CancellationToken,
    ) -> Result<Peer, SwarmError> {
        let local_info = swarmlink_identify::IdentifyInfo {
            protocol_version: "swarmlink/1.0.0".to_string(),
            agent_version: "swarmlink-node/0.1.0".to_string(),
            public_key: self.local_key.as_ref().map(|k| k.public_key_bytes()).unwrap_or_default(),
            listen_addrs: smallvec::SmallVec::new(),
            observed_addr: Some(self.remote_addr.clone()),
        };
        swarmlink_identify::send(&mut substream, &local_info)
            .await
            .map_err(|e| SwarmError::BadIdentity(e.to_string()))?;

        let remote_info = cancel
            .race(swarmlink_identify::receive(&mut substream))
            .await
            .ok_or(SwarmError::Cancelled)?
            .map_err(|e| SwarmError::BadIdentity(e.to_string()))?;

        let claimed_id = PeerId::from_public_key(&remote_info.public_key);
        if !remote_info.verify_peer_id(&claimed_id) {
            return Err(SwarmError::BadIdentity("remote peer id does not match advertised public key".into()));
        }

        let mut remote_peer = Peer::new(claimed_id);
        remote_peer.public_key = Some(remote_info.public_key);
        remote_peer.agent_version = Some(remote_info.agent_version);
        remote_peer.protocol_version = Some(remote_info.protocol_version);
        for addr in remote_info.listen_addrs {
            remote_peer.add_address(addr);
        }
        remote_peer.connected_address = Some(self.remote_addr.clone());

        Ok(remote_peer)
    }

    /// Drains muxer events in the background for the life of the
    /// connection. The identify substream the dialer opens is consumed
    /// here directly; every substream event, including that one, is also
    /// republished onto the swarm's `EventBus` for higher-level protocol
    /// handlers.
    fn spawn_substream_dispatch(self: &Arc<Self>, muxer: Arc<dyn StreamMuxer>, cancel: CancellationToken) {
        let conn = self.clone();
        async_std::task::spawn(async move {
            loop {
                let event = match cancel.race(muxer.next_event()).await {
                    Some(Some(event)) => event,
                    _ => break,
                };
                match event {
                    MuxerEvent::SubstreamCreated { id, name, substream } if name == IDENTIFY_PROTOCOL => {
                        conn.events.publish(SwarmEvent::SubstreamCreated(conn.id, id, name.clone()));
                        match conn.exchange_identity_over(substream, cancel.clone()).await {
                            Ok(remote_peer) => {
                                conn.identity_established.try_resolve(remote_peer);
                            }
                            Err(err) => warn!("inbound identity exchange failed: {}", err),
                        }
                    }
                    MuxerEvent::SubstreamCreated { id, name, .. } => {
                        conn.events.publish(SwarmEvent::SubstreamCreated(conn.id, id, name));
                    }
                    MuxerEvent::SubstreamClosed { id } => {
                        conn.events.publish(SwarmEvent::SubstreamClosed(conn.id, id));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn double_dispose_fires_closed_once() {
        use futures::io::Cursor;
        use futures::StreamExt;

        let stream: BoxedStream = Box::pin(Cursor::new(Vec::new()));
        let bandwidth = BandwidthSink::new();
        let conn = PeerConnection::new(
            1,
            PeerId::from_bytes(vec![9]),
            None,
            "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
            "/ip4/127.0.0.1/tcp/2".parse().unwrap(),
            Direction::Outbound,
            stream,
            bandwidth,
            Arc::new(crate::events::EventBus::new()),
        );
        let mut rx = conn.closed.subscribe();
        conn.dispose().await;
        conn.dispose().await;
        assert!(rx.next().await.is_some());
        assert!(!conn.is_active());
    }
}
