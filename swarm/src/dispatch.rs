//! Per-connection protocol dispatch table.

use futures::{AsyncRead, AsyncWrite};
use multistream_select::{dialer_select, NegotiationError};
use parking_lot::Mutex;

fn parse_versioned(name: &str) -> Option<(&str, (u32, u32, u32))> {
    let rest = name.strip_prefix('/')?;
    let (protocol, version) = rest.rsplit_once('/')?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((protocol, (major, minor, patch)))
}

/// Registers versioned protocol names (`"/" + name + "/" + version`) and
/// negotiates the highest-semver match for a given protocol name via
/// `establish_protocol`.
#[derive(Default)]
pub struct ProtocolDispatchTable {
    entries: Mutex<Vec<String>>,
}

impl ProtocolDispatchTable {
    pub fn new() -> ProtocolDispatchTable {
        ProtocolDispatchTable::default()
    }

    pub fn add_protocol(&self, name: &str, version: &str) {
        self.entries.lock().push(format!("/{}/{}", name, version));
    }

    pub fn add_protocols<'a>(&self, protocols: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (name, version) in protocols {
            self.add_protocol(name, version);
        }
    }

    pub fn contains(&self, versioned_name: &str) -> bool {
        self.entries.lock().iter().any(|e| e == versioned_name)
    }

    /// All registered versioned names, in registration order (used when
    /// mounting the "current protocols" set onto a fresh connection, or for
    /// listener-side lookups that don't care about ordering).
    pub fn all(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Candidates sharing `name`, highest semver first.
    fn candidates_for(&self, name: &str) -> Vec<String> {
        let mut matches: Vec<(String, (u32, u32, u32))> = self
            .entries
            .lock()
            .iter()
            .filter_map(|entry| {
                let (protocol, version) = parse_versioned(entry)?;
                (protocol == name).then(|| (entry.clone(), version))
            })
            .collect();
        matches.sort_by(|a, b| b.1.cmp(&a.1));
        matches.into_iter().map(|(entry, _)| entry).collect()
    }

    pub async fn establish_protocol<S>(&self, name: &str, io: &mut S) -> Result<String, NegotiationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        dialer_select(io, self.candidates_for(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_candidates_by_descending_semver() {
        let table = ProtocolDispatchTable::new();
        table.add_protocol("mplex", "1.0.0");
        table.add_protocol("mplex", "6.7.0");
        table.add_protocol("mplex", "2.0.0");
        assert_eq!(
            table.candidates_for("mplex"),
            vec!["/mplex/6.7.0".to_string(), "/mplex/2.0.0".to_string(), "/mplex/1.0.0".to_string()]
        );
    }
}
