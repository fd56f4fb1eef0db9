//! A tiny TOML-table-backed `Backend`, included only so the `dhcpd` binary
//! is runnable standalone. The concrete backends this server is meant for
//! in production (SQL, HTTP, Redis, ...) are out of scope here and are left
//! to embedders implementing `dhcp_backend::Backend` themselves.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use dhcp_backend::{Backend, BackendError, Definition, LookupResult};
use dhcp_wire::MacAddr;

#[derive(Clone, Debug, Deserialize)]
pub struct StaticHost {
    pub mac: String,
    pub ip: std::net::Ipv4Addr,
    pub hostname: Option<String>,
    #[serde(default)]
    pub gateways: Vec<std::net::Ipv4Addr>,
    pub subnet_mask: Option<std::net::Ipv4Addr>,
    pub broadcast_address: Option<std::net::Ipv4Addr>,
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_name_servers: Vec<std::net::Ipv4Addr>,
    #[serde(default)]
    pub ntp_servers: Vec<std::net::Ipv4Addr>,
    pub lease_time_secs: u32,
    #[serde(default)]
    pub subnet: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticHostsFile {
    #[serde(default)]
    pub host: Vec<StaticHost>,
}

/// Holds the administrator-authored MAC -> Definition table in memory,
/// reloadable from disk on `reinitialise`.
pub struct StaticBackend {
    path: Option<std::path::PathBuf>,
    hosts: std::sync::RwLock<HashMap<MacAddr, Definition>>,
}

impl StaticBackend {
    pub fn empty() -> Self {
        Self { path: None, hosts: std::sync::RwLock::new(HashMap::new()) }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let backend = Self { path: Some(path.to_path_buf()), hosts: std::sync::RwLock::new(HashMap::new()) };
        backend.reload_from_disk()?;
        Ok(backend)
    }

    fn reload_from_disk(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let text = fs::read_to_string(path)?;
        let parsed: StaticHostsFile = toml::from_str(&text)?;

        let mut hosts = HashMap::with_capacity(parsed.host.len());
        for entry in parsed.host {
            let mac: MacAddr = entry
                .mac
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MAC address {:?}", entry.mac))?;

            let mut definition = Definition::new(entry.ip, entry.lease_time_secs);
            definition.hostname = entry.hostname;
            definition.gateways = entry.gateways;
            definition.subnet_mask = entry.subnet_mask;
            definition.broadcast_address = entry.broadcast_address;
            definition.domain_name = entry.domain_name;
            definition.domain_name_servers = entry.domain_name_servers;
            definition.ntp_servers = entry.ntp_servers;
            definition.subnet = entry.subnet;
            hosts.insert(mac, definition);
        }

        *self.hosts.write().unwrap() = hosts;
        Ok(())
    }
}

impl Backend for StaticBackend {
    fn lookup(&self, mac: MacAddr) -> Result<LookupResult, BackendError> {
        let hosts = self.hosts.read().map_err(|_| BackendError::Unavailable)?;
        Ok(match hosts.get(&mac) {
            Some(definition) => LookupResult::One(definition.clone()),
            None => LookupResult::None,
        })
    }

    fn reinitialise(&self) -> Result<(), BackendError> {
        self.reload_from_disk().map_err(|_| BackendError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_hosts_from_toml_and_looks_them_up() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"
[[host]]
mac = "aa:bb:cc:dd:ee:ff"
ip = "192.168.0.197"
lease_time_secs = 14400
subnet_mask = "255.255.255.0"
gateways = ["192.168.0.1"]
domain_name_servers = ["192.168.0.5"]
"#).unwrap();

        let backend = StaticBackend::load(file.path()).unwrap();
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let LookupResult::One(definition) = backend.lookup(mac).unwrap() else {
            panic!("expected a single match");
        };

        assert_eq!(definition.ip, std::net::Ipv4Addr::new(192, 168, 0, 197));
        assert_eq!(definition.lease_time_secs, 14400);
        assert_eq!(backend.lookup(MacAddr([1, 2, 3, 4, 5, 6])).unwrap(), LookupResult::None);
    }

    #[test]
    fn empty_backend_resolves_nothing() {
        let backend = StaticBackend::empty();
        assert_eq!(backend.lookup(MacAddr([0; 6])).unwrap(), LookupResult::None);
    }
}
