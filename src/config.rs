//! The on-disk/CLI-overridable configuration surface, covering every entry
//! the engine, cache, suspender and NetLink layer need at startup.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use dhcp_cache::CacheConfig;
use dhcp_engine::EngineConfig;
use dhcp_net::{AdmissionFilter, BindConfig};
use dhcp_suspend::SuspendConfig;

fn default_server_port() -> u16 {
    dhcp_wire::SERVER_PORT
}

fn default_client_port() -> u16 {
    dhcp_wire::CLIENT_PORT
}

fn default_thread_pool_size() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reload_grace_period_secs() -> u64 {
    5
}

fn default_suspend_threshold() -> i32 {
    10
}

fn default_unauthorized_client_timeout() -> u64 {
    60
}

fn default_misbehaving_client_timeout() -> u64 {
    150
}

/// A single 802.1Q tag to stamp on raw L2 fallback frames, outermost first
/// in the containing `Vec`.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct QtagConfig {
    #[serde(default)]
    pub pcp: u8,
    #[serde(default)]
    pub dei: bool,
    pub vid: u16,
}

/// The administrator-facing configuration document, deserialized from TOML
/// and then selectively overridden by CLI flags in `main`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// Second DHCP-like port (e.g. a PXE responder) sharing the same
    /// backend/cache/suspender, per section 4.9's "multiple DHCP ports" note.
    pub proxy_port: Option<u16>,
    /// Interface index for the raw L2 fallback socket (`ip link` order).
    pub response_interface: Option<u32>,
    pub response_interface_qtags: Vec<QtagConfig>,

    pub allow_local: bool,
    pub allow_relays: bool,
    pub allowed_relays: Vec<Ipv4Addr>,

    pub authoritative: bool,
    pub nak_renewals: bool,

    #[serde(default = "default_unauthorized_client_timeout")]
    pub unauthorized_client_timeout_secs: u64,
    #[serde(default = "default_misbehaving_client_timeout")]
    pub misbehaving_client_timeout_secs: u64,
    #[serde(default = "default_suspend_threshold")]
    pub suspend_threshold: i32,
    pub enable_suspend: bool,

    pub enable_cache: bool,
    pub cache_on_disk: bool,
    pub cache_path: Option<PathBuf>,
    pub cache_persistent_path: Option<PathBuf>,
    pub cache_negative_ttl_secs: Option<u64>,

    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub graceful_reload: bool,
    #[serde(default = "default_reload_grace_period_secs")]
    pub reload_grace_period_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_port: default_server_port(),
            client_port: default_client_port(),
            proxy_port: None,
            response_interface: None,
            response_interface_qtags: Vec::new(),
            allow_local: true,
            allow_relays: false,
            allowed_relays: Vec::new(),
            authoritative: false,
            nak_renewals: false,
            unauthorized_client_timeout_secs: default_unauthorized_client_timeout(),
            misbehaving_client_timeout_secs: default_misbehaving_client_timeout(),
            suspend_threshold: default_suspend_threshold(),
            enable_suspend: true,
            enable_cache: false,
            cache_on_disk: false,
            cache_path: None,
            cache_persistent_path: None,
            cache_negative_ttl_secs: None,
            thread_pool_size: default_thread_pool_size(),
            log_level: default_log_level(),
            graceful_reload: true,
            reload_grace_period_secs: default_reload_grace_period_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn bind_config(&self) -> BindConfig {
        BindConfig {
            server_address: self.server_ip,
            server_port: Some(self.server_port),
            client_port: Some(self.client_port),
            response_interface: self.response_interface,
            proxy_port: self.proxy_port,
            response_interface_qtags: self
                .response_interface_qtags
                .iter()
                .map(|t| dhcp_raw::ethernet::Dot1Q {
                    pcp: t.pcp,
                    dei: t.dei,
                    vid: t.vid,
                })
                .collect(),
        }
    }

    pub fn admission_filter(&self) -> AdmissionFilter {
        AdmissionFilter {
            allow_local: self.allow_local,
            allow_relays: self.allow_relays,
            allowed_relays: self.allowed_relays.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            server_ip: self.server_ip,
            authoritative: self.authoritative,
            nak_renewals: self.nak_renewals,
        }
    }

    pub fn suspend_config(&self) -> SuspendConfig {
        SuspendConfig {
            enabled: self.enable_suspend,
            suspend_threshold: self.suspend_threshold,
            misbehaving_timeout: Duration::from_secs(self.misbehaving_client_timeout_secs),
            unauthorized_client_timeout: Duration::from_secs(self.unauthorized_client_timeout_secs),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.enable_cache,
            on_disk: self.cache_on_disk,
            cache_path: self.cache_path.clone(),
            persistent_path: self.cache_persistent_path.clone(),
            negative_ttl: self.cache_negative_ttl_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_toml_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"server_ip = "192.168.0.1""#).unwrap();
        writeln!(file, "authoritative = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::new(192, 168, 0, 1));
        assert!(config.authoritative);
        assert_eq!(config.server_port, dhcp_wire::SERVER_PORT);
        assert!(config.enable_suspend);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/dhcpd.toml")).is_err());
    }

    #[test]
    fn proxy_port_and_qtags_reach_bind_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"server_ip = "192.168.0.1""#).unwrap();
        writeln!(file, "server_port = 6767").unwrap();
        writeln!(file, "client_port = 6868").unwrap();
        writeln!(file, "proxy_port = 4011").unwrap();
        writeln!(file, "[[response_interface_qtags]]").unwrap();
        writeln!(file, "pcp = 5").unwrap();
        writeln!(file, "vid = 100").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy_port, Some(4011));
        assert_eq!(config.response_interface_qtags.len(), 1);
        assert_eq!(config.response_interface_qtags[0].vid, 100);

        let bind_config = config.bind_config();
        assert_eq!(bind_config.server_port, Some(6767));
        assert_eq!(bind_config.client_port, Some(6868));
        assert_eq!(bind_config.proxy_port, Some(4011));
        assert_eq!(bind_config.response_interface_qtags.len(), 1);
        assert_eq!(bind_config.response_interface_qtags[0].pcp, 5);
        assert_eq!(bind_config.response_interface_qtags[0].vid, 100);
        assert!(!bind_config.response_interface_qtags[0].dei);
    }
}
