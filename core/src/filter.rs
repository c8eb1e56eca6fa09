//! Address/peer allow- and deny-lists.

use parking_lot::RwLock;

use crate::multiaddr::MultiAddress;
use crate::peer::Peer;

/// Default-allow; a target fails iff any pattern is a prefix-match.
#[derive(Default)]
pub struct DenyList {
    patterns: RwLock<Vec<MultiAddress>>,
}

impl DenyList {
    pub fn new() -> DenyList {
        DenyList::default()
    }

    pub fn add(&self, pattern: MultiAddress) {
        let mut patterns = self.patterns.write();
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }

    pub fn remove(&self, pattern: &MultiAddress) {
        self.patterns.write().retain(|p| p != pattern);
    }

    pub fn contains(&self, pattern: &MultiAddress) -> bool {
        self.patterns.read().contains(pattern)
    }

    /// `true` iff `addr` is denied, i.e. matched by some pattern.
    pub fn denies(&self, addr: &MultiAddress) -> bool {
        self.patterns.read().iter().any(|p| addr.is_prefixed_by(p))
    }

    pub fn clear(&self) {
        self.patterns.write().clear();
    }
}

/// Default-allow when empty; otherwise a target passes iff some pattern
/// prefix-matches it.
#[derive(Default)]
pub struct AllowList {
    patterns: RwLock<Vec<MultiAddress>>,
}

impl AllowList {
    pub fn new() -> AllowList {
        AllowList::default()
    }

    pub fn add(&self, pattern: MultiAddress) {
        let mut patterns = self.patterns.write();
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }

    pub fn remove(&self, pattern: &MultiAddress) {
        self.patterns.write().retain(|p| p != pattern);
    }

    pub fn contains(&self, pattern: &MultiAddress) -> bool {
        self.patterns.read().contains(pattern)
    }

    /// `true` iff `addr` is allowed: the list is empty, or some pattern
    /// prefix-matches it.
    pub fn allows(&self, addr: &MultiAddress) -> bool {
        let patterns = self.patterns.read();
        patterns.is_empty() || patterns.iter().any(|p| addr.is_prefixed_by(p))
    }

    pub fn clear(&self) {
        self.patterns.write().clear();
    }
}

/// The composite `deny AND allow` predicate a [`crate::transport::Transport`]
/// dial or an inbound accept must satisfy.
#[derive(Default)]
pub struct Policy {
    pub deny: DenyList,
    pub allow: AllowList,
}

impl Policy {
    pub fn new() -> Policy {
        Policy::default()
    }

    pub fn evaluate(&self, addr: &MultiAddress) -> bool {
        !self.deny.denies(addr) && self.allow.allows(addr)
    }

    /// `is_allowed(peer)` requires every one of the peer's known addresses
    /// to pass.
    pub fn evaluate_peer(&self, peer: &Peer) -> bool {
        peer.addresses.iter().all(|addr| self.evaluate(addr))
    }

    pub fn reset(&self) {
        self.deny.clear();
        self.allow.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> MultiAddress {
        s.parse().unwrap()
    }

    #[test]
    fn deny_list_denies_prefix_matches() {
        let deny = DenyList::new();
        deny.add(addr("/ip4/10.0.0.0"));
        assert!(deny.denies(&addr("/ip4/10.0.0.0/tcp/4001")));
        assert!(!deny.denies(&addr("/ip4/127.0.0.1/tcp/4001")));
    }

    #[test]
    fn empty_allow_list_allows_everything() {
        let allow = AllowList::new();
        assert!(allow.allows(&addr("/ip4/127.0.0.1/tcp/4001")));
    }

    #[test]
    fn nonempty_allow_list_requires_prefix_match() {
        let allow = AllowList::new();
        allow.add(addr("/ip4/127.0.0.1"));
        assert!(allow.allows(&addr("/ip4/127.0.0.1/tcp/4001")));
        assert!(!allow.allows(&addr("/ip4/10.0.0.1/tcp/4001")));
    }

    #[test]
    fn policy_ands_deny_and_allow() {
        let policy = Policy::new();
        policy.allow.add(addr("/ip4/127.0.0.1"));
        policy.deny.add(addr("/ip4/127.0.0.1/tcp/9999"));
        assert!(policy.evaluate(&addr("/ip4/127.0.0.1/tcp/4001")));
        assert!(!policy.evaluate(&addr("/ip4/127.0.0.1/tcp/9999")));
        assert!(!policy.evaluate(&addr("/ip4/10.0.0.1/tcp/4001")));
    }
}
