//! Peer identity and the peer registry's element type.

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::multiaddr::MultiAddress;

/// A content-addressed hash of a peer's long-term public key.
///
/// Invariant: `peer.id == hash(peer.public_key)` once the key is known.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Derives the `PeerId` that corresponds to a raw public key.
    pub fn from_public_key(public_key: &[u8]) -> PeerId {
        let digest = Sha256::digest(public_key);
        PeerId(digest.to_vec())
    }

    /// Builds a `PeerId` from its already-hashed bytes, e.g. parsed out of a
    /// multiaddress's `/p2p/<id>` component.
    pub fn from_bytes(bytes: Vec<u8>) -> PeerId {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `true` iff this id is the hash of `public_key`.
    pub fn matches_public_key(&self, public_key: &[u8]) -> bool {
        *self == PeerId::from_public_key(public_key)
    }

    /// Base58-encoded textual form, as used in multiaddress `/p2p/` segments.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// A long-term keypair. Only the public half is ever sent over the wire
/// outside the (out-of-scope) secure-channel handshake.
#[derive(Clone)]
pub struct Keypair {
    signing: std::sync::Arc<ed25519_dalek::Keypair>,
}

impl Keypair {
    pub fn generate() -> Keypair {
        let mut csprng = rand::rngs::OsRng;
        let signing = ed25519_dalek::Keypair::generate(&mut csprng);
        Keypair { signing: std::sync::Arc::new(signing) }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing.public.to_bytes().to_vec()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        use ed25519_dalek::Signer;
        self.signing.sign(msg).to_bytes().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.peer_id())
    }
}

/// A networked participant.
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: PeerId,
    pub public_key: Option<Vec<u8>>,
    pub addresses: Vec<MultiAddress>,
    pub agent_version: Option<String>,
    pub protocol_version: Option<String>,
    pub latency: Option<Duration>,
    pub connected_address: Option<MultiAddress>,
}

impl Peer {
    pub fn new(id: PeerId) -> Peer {
        Peer {
            id,
            public_key: None,
            addresses: Vec::new(),
            agent_version: None,
            protocol_version: None,
            latency: None,
            connected_address: None,
        }
    }

    /// Union-merges `addr` into this peer's known addresses if not already
    /// present.
    pub fn add_address(&mut self, addr: MultiAddress) {
        if !self.addresses.contains(&addr) {
            self.addresses.push(addr);
        }
    }

    /// Merge rule: take non-null fields from `other`, union the address
    /// lists, otherwise keep what's already here.
    pub fn merge(&mut self, other: &Peer) {
        if other.public_key.is_some() {
            self.public_key = other.public_key.clone();
        }
        if other.agent_version.is_some() {
            self.agent_version = other.agent_version.clone();
        }
        if other.protocol_version.is_some() {
            self.protocol_version = other.protocol_version.clone();
        }
        if other.latency.is_some() {
            self.latency = other.latency;
        }
        for addr in &other.addresses {
            self.add_address(addr.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_matches_hash_of_public_key() {
        let kp = Keypair::generate();
        let id = kp.peer_id();
        assert!(id.matches_public_key(&kp.public_key_bytes()));
        let other = Keypair::generate();
        assert!(!id.matches_public_key(&other.public_key_bytes()));
    }

    #[test]
    fn merge_unions_addresses_and_fills_nulls() {
        let mut p = Peer::new(PeerId::from_bytes(vec![1, 2, 3]));
        let addr_a: MultiAddress = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        p.add_address(addr_a.clone());

        let mut incoming = Peer::new(p.id.clone());
        let addr_b: MultiAddress = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        incoming.add_address(addr_b.clone());
        incoming.agent_version = Some("swarmlink/0.1".into());

        p.merge(&incoming);
        assert!(p.addresses.contains(&addr_a));
        assert!(p.addresses.contains(&addr_b));
        assert_eq!(p.agent_version.as_deref(), Some("swarmlink/0.1"));
    }
}
