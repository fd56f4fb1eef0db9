//! The contract a concrete lease store (SQL, key-value, flat file, HTTP,
//! ...) implements so the resolver can ask it "what should this MAC get".
//! No concrete backend lives in this crate; only the trait and the record
//! type it hands back.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use dhcp_wire::MacAddr;

/// The administrator-authored (or dynamically synthesized) configuration
/// for a single client.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Definition {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub gateways: Vec<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
    pub lease_time_secs: u32,
    pub subnet: String,
    pub serial: u64,
    pub extra: HashMap<String, String>,
}

impl Definition {
    /// A minimal definition with every optional field left empty, useful
    /// as a starting point for hooks synthesizing a dynamic binding.
    pub fn new(ip: Ipv4Addr, lease_time_secs: u32) -> Self {
        Self {
            ip,
            hostname: None,
            gateways: Vec::new(),
            subnet_mask: None,
            broadcast_address: None,
            domain_name: None,
            domain_name_servers: Vec::new(),
            ntp_servers: Vec::new(),
            lease_time_secs,
            subnet: String::new(),
            serial: 0,
            extra: HashMap::new(),
        }
    }
}

/// What a backend lookup found for a given MAC.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LookupResult {
    None,
    One(Definition),
    Many(Vec<Definition>),
}

impl LookupResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BackendError {
    /// The backend is reachable but the request itself failed (a bad
    /// query, a malformed stored record, ...). Not expected to succeed on
    /// retry without operator intervention.
    Invalid,
    /// The backend could not be reached at all (connection refused, I/O
    /// error, timeout). Callers may fall back to a persistent cache.
    Unavailable,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "backend request was invalid",
            Self::Unavailable => "backend unavailable",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for BackendError {}

/// A source of `Definition`s, keyed by client hardware address.
pub trait Backend: Send + Sync {
    fn lookup(&self, mac: MacAddr) -> Result<LookupResult, BackendError>;

    /// Re-reads/reconnects the backend's underlying store. Called on the
    /// `reload` control event; implementations that have nothing to
    /// refresh can leave this a no-op.
    fn reinitialise(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticBackend(Vec<(MacAddr, Definition)>);

    impl Backend for StaticBackend {
        fn lookup(&self, mac: MacAddr) -> Result<LookupResult, BackendError> {
            let matches: Vec<_> = self
                .0
                .iter()
                .filter(|(m, _)| *m == mac)
                .map(|(_, d)| d.clone())
                .collect();

            Ok(match matches.len() {
                0 => LookupResult::None,
                1 => LookupResult::One(matches.into_iter().next().unwrap()),
                _ => LookupResult::Many(matches),
            })
        }
    }

    #[test]
    fn lookup_reduces_to_one_or_none() {
        let mac = MacAddr([0, 1, 2, 3, 4, 5]);
        let backend = StaticBackend(vec![(mac, Definition::new(Ipv4Addr::new(10, 0, 0, 1), 3600))]);

        assert_eq!(
            backend.lookup(mac).unwrap(),
            LookupResult::One(Definition::new(Ipv4Addr::new(10, 0, 0, 1), 3600))
        );
        assert_eq!(
            backend.lookup(MacAddr([9, 9, 9, 9, 9, 9])).unwrap(),
            LookupResult::None
        );
    }

    #[test]
    fn default_reinitialise_is_a_no_op() {
        let backend = StaticBackend(Vec::new());
        assert!(backend.reinitialise().is_ok());
    }
}
