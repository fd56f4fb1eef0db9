use std::path::PathBuf;

use clap::Parser;

/// An RFC 2131/2132-conformant DHCPv4 server backed by an external lease
/// store.
#[derive(Parser, Debug)]
#[command(name = "dhcpd", version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/dhcpd/dhcpd.toml")]
    pub config: PathBuf,

    /// Path to a static TOML host table, used when no other backend is
    /// wired in. Optional: an empty backend (every client is Unknown) is
    /// used if omitted.
    #[arg(long)]
    pub hosts: Option<PathBuf>,

    /// Send SIGHUP to the running server's pidfile-less process instead of
    /// starting a new one. Not implemented: process discovery is left to
    /// the operator's service manager.
    #[arg(long)]
    pub reload: bool,

    /// Stay attached to the controlling terminal instead of the service
    /// manager's usual expectations; affects nothing but the log target.
    #[arg(long)]
    pub foreground: bool,
}
