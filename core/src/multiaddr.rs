//! `MultiAddress`: an ordered sequence of `(protocol, value)` pairs,
//! optionally terminated by a peer-id protocol.
//!
//! The real `multiaddr` crate's binary varint encoding is out of scope —
//! we only need the textual form and the prefix-match semantics this
//! stack actually relies on, so this is a small self-contained type
//! rather than a dependency whose wire format we'd otherwise just be
//! re-deriving.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::peer::PeerId;

/// A single `/protocol/value` component.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Segment {
    pub protocol: String,
    pub value: String,
}

/// An ordered sequence of [`Segment`]s, e.g. `/ip4/127.0.0.1/tcp/4001`.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct MultiAddress {
    segments: Vec<Segment>,
}

#[derive(Debug, Error)]
pub enum MultiAddressError {
    #[error("multiaddress segment has no value: /{0}")]
    MissingValue(String),
    #[error("multiaddress must start with '/'")]
    MissingLeadingSlash,
}

impl MultiAddress {
    pub fn empty() -> MultiAddress {
        MultiAddress { segments: Vec::new() }
    }

    pub fn from_segments(segments: Vec<Segment>) -> MultiAddress {
        MultiAddress { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn push(&mut self, protocol: impl Into<String>, value: impl Into<String>) {
        self.segments.push(Segment { protocol: protocol.into(), value: value.into() });
    }

    pub fn with(mut self, protocol: impl Into<String>, value: impl Into<String>) -> MultiAddress {
        self.push(protocol, value);
        self
    }

    /// The peer id carried by a trailing `/ipfs/<id>` or `/p2p/<id>` segment,
    /// if any.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.segments
            .iter()
            .find(|s| s.protocol == "ipfs" || s.protocol == "p2p")
            .map(|s| PeerId::from_bytes(bs58::decode(&s.value).into_vec().unwrap_or_default()))
    }

    /// `true` iff the last segment names a peer-id protocol, as
    /// `register_peer_address` requires.
    pub fn ends_in_peer_id(&self) -> bool {
        matches!(self.segments.last(), Some(s) if s.protocol == "ipfs" || s.protocol == "p2p")
    }

    /// The address with any trailing peer-id segment stripped — the
    /// "transport tail" canonical form used for self-dial and listener
    /// dedup comparisons.
    pub fn transport_tail(&self) -> MultiAddress {
        let mut segments = self.segments.clone();
        if matches!(segments.last(), Some(s) if s.protocol == "ipfs" || s.protocol == "p2p") {
            segments.pop();
        }
        MultiAddress { segments }
    }

    /// Re-attaches `peer` as a trailing `/p2p/<id>` segment, replacing any
    /// existing peer-id segment.
    pub fn with_peer_id(&self, peer: &PeerId) -> MultiAddress {
        let mut addr = self.transport_tail();
        addr.push("p2p", peer.to_base58());
        addr
    }

    /// `true` iff `pattern` is a protocol-level prefix of `self` — two
    /// addresses "match" iff one is a prefix of the other at the protocol
    /// level.
    pub fn is_prefixed_by(&self, pattern: &MultiAddress) -> bool {
        if pattern.segments.len() > self.segments.len() {
            return false;
        }
        pattern.segments.iter().zip(self.segments.iter()).all(|(p, s)| p == s)
    }

    /// The protocol name at `index`, if present. Used by the dial
    /// recogniser in `dial_one` to select a transport by the third
    /// protocol in the address.
    pub fn protocol_at(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(|s| s.protocol.as_str())
    }

    pub fn is_wildcard_ip(&self) -> bool {
        self.segments.first().map_or(false, |s| {
            (s.protocol == "ip4" && s.value == "0.0.0.0") || (s.protocol == "ip6" && s.value == "::")
        })
    }
}

impl fmt::Debug for MultiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for MultiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.segments {
            write!(f, "/{}/{}", s.protocol, s.value)?;
        }
        Ok(())
    }
}

impl FromStr for MultiAddress {
    type Err = MultiAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(MultiAddress::empty());
        }
        if !s.starts_with('/') {
            return Err(MultiAddressError::MissingLeadingSlash);
        }
        let parts: Vec<&str> = s.split('/').skip(1).collect();
        let mut segments = Vec::new();
        let mut iter = parts.into_iter();
        while let Some(protocol) = iter.next() {
            if protocol.is_empty() {
                continue;
            }
            match protocol {
                // Zero-value protocols could be added here if ever needed;
                // every protocol swarmlink deals with carries a value.
                _ => {
                    let value = iter
                        .next()
                        .ok_or_else(|| MultiAddressError::MissingValue(protocol.to_string()))?;
                    segments.push(Segment { protocol: protocol.to_string(), value: value.to_string() });
                }
            }
        }
        Ok(MultiAddress { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_textual_form() {
        let addr: MultiAddress = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/4001");
    }

    #[test]
    fn prefix_match() {
        let a: MultiAddress = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let pattern: MultiAddress = "/ip4/127.0.0.1".parse().unwrap();
        assert!(a.is_prefixed_by(&pattern));
        let other_pattern: MultiAddress = "/ip4/10.0.0.1".parse().unwrap();
        assert!(!a.is_prefixed_by(&other_pattern));
    }

    #[test]
    fn transport_tail_strips_peer_id() {
        let addr: MultiAddress = "/ip4/127.0.0.1/tcp/4001/p2p/QmABC".parse().unwrap();
        assert!(addr.ends_in_peer_id());
        let tail = addr.transport_tail();
        assert!(!tail.ends_in_peer_id());
        assert_eq!(tail.to_string(), "/ip4/127.0.0.1/tcp/4001");
    }

    #[test]
    fn wildcard_ip_detection() {
        let a: MultiAddress = "/ip4/0.0.0.0/tcp/0".parse().unwrap();
        assert!(a.is_wildcard_ip());
        let b: MultiAddress = "/ip4/127.0.0.1/tcp/0".parse().unwrap();
        assert!(!b.is_wildcard_ip());
    }
}
