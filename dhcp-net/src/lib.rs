#![allow(async_fn_in_trait)]
#![warn(clippy::large_futures)]

//! Socket binding and response-transmission-mode selection for the DHCP
//! server: which local ports get bound, which inbound datagrams are
//! admitted, and — per RFC 2131 section 4.1 — whether a reply goes back
//! unicast to a relay, unicast to an already-configured client, broadcast,
//! or (when the client has no usable address at all yet) as a hand-built
//! layer-2 frame on a raw socket.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::ops::Deref;
use std::pin::pin;

use async_io::Async;
use log::{debug, trace};

use dhcp_nal::{MacAddr, RawSend, UdpReceive, UdpSend};
use dhcp_raw::ethernet::Dot1Q;

pub use raw::{Interface, RawSocket};

pub mod raw;

/// The well-known DHCP server port.
pub const SERVER_PORT: u16 = 67;
/// The well-known DHCP client port.
pub const CLIENT_PORT: u16 = 68;

/// A UDP socket bound for DHCP traffic, wrapping a std socket driven by an
/// `async-io` reactor the same way the rest of this crate's sockets are.
pub struct UdpSocket(Async<StdUdpSocket>);

impl UdpSocket {
    /// Binds a UDP socket to `addr`, enabling broadcast sends (needed for
    /// replies to clients that don't have an address yet).
    pub fn bind(addr: SocketAddrV4) -> io::Result<Self> {
        let socket = Async::<StdUdpSocket>::bind(SocketAddr::V4(addr))?;
        socket.as_ref().set_broadcast(true)?;

        Ok(Self(socket))
    }

    pub fn release(self) -> Async<StdUdpSocket> {
        self.0
    }
}

impl Deref for UdpSocket {
    type Target = Async<StdUdpSocket>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl embedded_io_async::ErrorType for UdpSocket {
    type Error = io::Error;
}

impl UdpReceive for UdpSocket {
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, SocketAddr), Self::Error> {
        let fut = pin!(self.0.recv_from(buffer));
        fut.await
    }
}

impl UdpSend for UdpSocket {
    async fn send(&mut self, remote: SocketAddr, data: &[u8]) -> Result<(), Self::Error> {
        let mut offset = 0;

        while offset < data.len() {
            let fut = pin!(self.0.send_to(&data[offset..], remote));
            offset += fut.await?;
        }

        Ok(())
    }
}

/// Which local ports the NetLink layer should have open.
#[derive(Clone, Debug)]
pub struct BindConfig {
    /// Address the server socket binds to. Usually `0.0.0.0`.
    pub server_address: Ipv4Addr,
    /// Port the server socket binds to and relay replies target. Defaults
    /// to the well-known 67 when unset.
    pub server_port: Option<u16>,
    /// Port client-directed replies (unicast or broadcast) target.
    /// Defaults to the well-known 68 when unset.
    pub client_port: Option<u16>,
    /// Network interface index to bind the raw L2 fallback socket to, if any.
    /// Required whenever responses may need to reach a client that has no
    /// usable source address yet (the common case for DISCOVER/REQUEST).
    pub response_interface: Option<u32>,
    /// A second DHCP-like port (e.g. a PXE proxy responder) to listen on
    /// alongside the main server port, sharing the same backend/cache/
    /// suspender pipeline. Datagrams received on it are reported with
    /// their own port so callers can tell the two apart.
    pub proxy_port: Option<u16>,
    /// 802.1Q tag stack stamped on raw L2 fallback frames, outermost first.
    pub response_interface_qtags: Vec<Dot1Q>,
}

/// Decides how an outbound DHCP reply should be put on the wire, per the
/// relay/unicast/broadcast/raw-L2 selection rules of RFC 2131 section 4.1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxTarget {
    /// Relay is in the loop: unicast the reply to its address on the server port.
    Relay(Ipv4Addr),
    /// Client already has a usable address (renewing/rebinding/INFORM):
    /// unicast to it on the client port.
    Client(Ipv4Addr),
    /// Client asked for a broadcast reply, or has neither an address nor a
    /// way to receive a unicast datagram without one.
    Broadcast,
    /// No relay, no usable client address, and the client did not ask for
    /// broadcast: the reply must be framed by hand and sent on the raw
    /// socket directly to the client's MAC address.
    Raw { mac: MacAddr, ip: Ipv4Addr },
}

/// Implements the selection tree: giaddr beats everything (a relay is always
/// reachable by unicast). With no relay, a NAK is always broadcast per RFC
/// 2131 section 4.1 ("in all cases, when 'giaddr' is zero, the server
/// broadcasts any DHCPNAK messages") regardless of ciaddr, since ciaddr on a
/// NAK'd request is by definition not an address the server will vouch for.
/// Otherwise a non-zero ciaddr means the client can already receive ordinary
/// unicast traffic, the broadcast flag (or the absence of any assigned
/// address to target) forces a broadcast, and the raw fallback is what's
/// left when none of those apply.
pub fn choose_tx_mode(
    giaddr: Ipv4Addr,
    ciaddr: Ipv4Addr,
    broadcast_flag: bool,
    is_nak: bool,
    client_mac: MacAddr,
    assigned_ip: Ipv4Addr,
) -> TxTarget {
    if !giaddr.is_unspecified() {
        TxTarget::Relay(giaddr)
    } else if is_nak {
        TxTarget::Broadcast
    } else if !ciaddr.is_unspecified() {
        TxTarget::Client(ciaddr)
    } else if broadcast_flag || assigned_ip.is_unspecified() {
        TxTarget::Broadcast
    } else {
        TxTarget::Raw {
            mac: client_mac,
            ip: assigned_ip,
        }
    }
}

/// Admission rules applied to inbound datagrams before they reach the
/// resolution pipeline: plain broadcast/unspecified-source traffic is
/// always accepted, but relayed traffic (non-zero `giaddr`) is only
/// accepted from relays explicitly allow-listed, unless relay admission is
/// disabled entirely.
#[derive(Clone, Debug, Default)]
pub struct AdmissionFilter {
    pub allow_local: bool,
    pub allow_relays: bool,
    pub allowed_relays: Vec<Ipv4Addr>,
}

impl AdmissionFilter {
    pub fn admit(&self, source: SocketAddr, giaddr: Ipv4Addr) -> bool {
        if giaddr.is_unspecified() {
            return self.allow_local;
        }

        if !self.allow_relays {
            return false;
        }

        if self.allowed_relays.is_empty() {
            return true;
        }

        let SocketAddr::V4(source) = source else {
            return false;
        };

        self.allowed_relays.contains(source.ip()) || self.allowed_relays.contains(&giaddr)
    }
}

/// Bundles the sockets the server needs: the UDP server socket, an
/// (optional) second UDP socket for a proxy DHCP port, and (optionally) the
/// raw L2 socket used for the fallback transmission path.
pub struct NetLink {
    server: UdpSocket,
    server_port: u16,
    client_port: u16,
    proxy: Option<UdpSocket>,
    proxy_port: u16,
    raw: Option<RawSocket>,
    qtags: Vec<Dot1Q>,
}

impl NetLink {
    pub async fn bind(config: &BindConfig) -> io::Result<Self> {
        let server_port = config.server_port.unwrap_or(SERVER_PORT);
        let client_port = config.client_port.unwrap_or(CLIENT_PORT);

        let server = UdpSocket::bind(SocketAddrV4::new(config.server_address, server_port))?;

        let proxy_port = config.proxy_port.unwrap_or(server_port);
        let proxy = match config.proxy_port {
            Some(port) => Some(UdpSocket::bind(SocketAddrV4::new(config.server_address, port))?),
            None => None,
        };

        let raw = if let Some(ifindex) = config.response_interface {
            Some(Interface::new(ifindex).bind().await?)
        } else {
            None
        };

        Ok(Self {
            server,
            server_port,
            client_port,
            proxy,
            proxy_port,
            raw,
            qtags: config.response_interface_qtags.clone(),
        })
    }

    /// Receives one inbound datagram, racing the proxy socket (if bound)
    /// against the main server socket and reporting which port it arrived
    /// on alongside the usual length/source pair.
    pub async fn receive(&mut self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr, u16)> {
        let Self {
            server,
            server_port,
            proxy,
            proxy_port,
            ..
        } = self;

        let Some(proxy) = proxy.as_mut() else {
            let (len, source) = server.receive(buffer).await?;
            return Ok((len, source, *server_port));
        };

        enum Received {
            Server(io::Result<(usize, SocketAddr)>),
            Proxy(io::Result<(usize, SocketAddr)>),
        }

        let mut proxy_buf = vec![0u8; buffer.len()];

        let received = futures_lite::future::or(
            async { Received::Server(server.receive(buffer).await) },
            async { Received::Proxy(proxy.receive(&mut proxy_buf).await) },
        )
        .await;

        match received {
            Received::Server(result) => {
                let (len, source) = result?;
                Ok((len, source, *server_port))
            }
            Received::Proxy(result) => {
                let (len, source) = result?;
                buffer[..len].copy_from_slice(&proxy_buf[..len]);
                Ok((len, source, *proxy_port))
            }
        }
    }

    /// Sends a reply according to the transmission mode chosen for it.
    pub async fn send(&mut self, target: TxTarget, data: &[u8]) -> io::Result<()> {
        let server_port = self.server_port;
        let client_port = self.client_port;

        match target {
            TxTarget::Relay(addr) => {
                trace!("sending to relay {addr}");
                self.server
                    .send(SocketAddr::V4(SocketAddrV4::new(addr, server_port)), data)
                    .await
            }
            TxTarget::Client(addr) => {
                trace!("sending unicast to client {addr}");
                self.server
                    .send(SocketAddr::V4(SocketAddrV4::new(addr, client_port)), data)
                    .await
            }
            TxTarget::Broadcast => {
                trace!("broadcasting reply");
                self.server
                    .send(
                        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, client_port)),
                        data,
                    )
                    .await
            }
            TxTarget::Raw { mac, ip } => {
                let Some(raw) = self.raw.as_mut() else {
                    debug!("no raw socket bound, dropping reply to {ip} ({mac:02x?})");
                    return Err(io::ErrorKind::Unsupported.into());
                };

                trace!("sending raw L2 frame to {mac:02x?} carrying {ip}");

                let mut frame_buf = [0u8; 1514];
                let src = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, server_port);
                let dst = SocketAddrV4::new(ip, client_port);

                let frame = dhcp_raw::build_l2_frame(
                    &mut frame_buf,
                    mac,
                    raw.mac(),
                    &self.qtags,
                    src,
                    dst,
                    data,
                )
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;

                raw.send(mac, frame).await
            }
        }
    }
}

mod sys {
    pub use libc::*;

    #[macro_export]
    macro_rules! syscall_los {
        ($ret:expr) => {{
            let result = $ret;

            if result == -1 {
                Err(::std::io::Error::last_os_error())
            } else {
                Ok(result)
            }
        }};
    }
}

mod raw {
    use std::io;
    use std::ops::Deref;
    use std::os::fd::{AsFd, AsRawFd, FromRawFd};
    use std::pin::pin;

    use async_io::Async;

    use dhcp_nal::{MacAddr, RawReceive, RawSend};

    use crate::sys;
    use crate::syscall_los;

    /// A network interface bound for raw Ethernet frame I/O, identified by
    /// its kernel interface index (`if_nametoindex`).
    #[derive(Default)]
    pub struct Interface(u32);

    impl Interface {
        pub const fn new(ifindex: u32) -> Self {
            Self(ifindex)
        }

        pub async fn bind(&self) -> io::Result<RawSocket> {
            let socket = syscall_los!(unsafe {
                sys::socket(
                    sys::PF_PACKET,
                    sys::SOCK_DGRAM,
                    (sys::ETH_P_IP as u16).to_be() as _,
                )
            })?;

            let sockaddr = sys::sockaddr_ll {
                sll_family: sys::AF_PACKET as _,
                sll_protocol: (sys::ETH_P_IP as u16).to_be() as _,
                sll_ifindex: self.0 as _,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: 0,
                sll_addr: Default::default(),
            };

            syscall_los!(unsafe {
                sys::bind(
                    socket,
                    &sockaddr as *const _ as *const _,
                    core::mem::size_of::<sys::sockaddr_ll>() as _,
                )
            })?;

            let mac = interface_mac(self.0)?;

            let socket = unsafe { std::net::UdpSocket::from_raw_fd(socket) };
            socket.set_broadcast(true)?;

            Ok(RawSocket(Async::new(socket)?, self.0, mac))
        }
    }

    // libc's `ifreq` definition is incomplete/unstable across targets, so the
    // request struct for `SIOCGIFHWADDR` is hand-rolled here, matching the
    // kernel's `struct ifreq` layout (name, followed by a `sockaddr`).
    #[repr(C)]
    struct IfreqHwaddr {
        ifr_name: [libc::c_char; sys::IF_NAMESIZE],
        ifr_hwaddr: libc::sockaddr,
    }

    /// Looks up the hardware address of an interface via `SIOCGIFHWADDR`, so
    /// raw frames can be stamped with a correct Ethernet source address.
    fn interface_mac(ifindex: u32) -> io::Result<MacAddr> {
        let socket = syscall_los!(unsafe { sys::socket(sys::AF_INET, sys::SOCK_DGRAM, 0) })?;

        let mut req: IfreqHwaddr = unsafe { core::mem::zeroed() };

        let name = interface_name(ifindex)?;
        for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes()) {
            *dst = *src as _;
        }

        let res = unsafe { sys::ioctl(socket, sys::SIOCGIFHWADDR, &mut req) };
        unsafe { sys::close(socket) };

        syscall_los!(res)?;

        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(req.ifr_hwaddr.sa_data.iter()) {
            *dst = *src as u8;
        }

        Ok(mac)
    }

    fn interface_name(ifindex: u32) -> io::Result<String> {
        let mut buf = [0u8; sys::IF_NAMESIZE];

        let ptr = unsafe { sys::if_indextoname(ifindex, buf.as_mut_ptr() as *mut _) };
        if ptr.is_null() {
            return Err(io::Error::last_os_error());
        }

        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());

        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// A bound raw socket (`AF_PACKET`/`SOCK_DGRAM`), exposing receive/send
    /// in terms of Ethernet addresses rather than IP sockets.
    pub struct RawSocket(Async<std::net::UdpSocket>, u32, MacAddr);

    impl RawSocket {
        pub fn interface_index(&self) -> u32 {
            self.1
        }

        pub fn mac(&self) -> MacAddr {
            self.2
        }
    }

    impl Deref for RawSocket {
        type Target = Async<std::net::UdpSocket>;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl embedded_io_async::ErrorType for RawSocket {
        type Error = io::Error;
    }

    impl RawReceive for RawSocket {
        async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, MacAddr), Self::Error> {
            let fut = pin!(self.0.read_with(|io| {
                let mut storage: sys::sockaddr_storage = unsafe { core::mem::zeroed() };
                let mut addrlen = core::mem::size_of_val(&storage) as sys::socklen_t;

                let ret = syscall_los!(unsafe {
                    sys::recvfrom(
                        io.as_fd().as_raw_fd(),
                        buffer.as_mut_ptr() as *mut _,
                        buffer.len(),
                        0,
                        &mut storage as *mut _ as *mut _,
                        &mut addrlen,
                    )
                })?;

                let sockaddr = as_sockaddr_ll(&storage)?;

                let mut mac = [0; 6];
                mac.copy_from_slice(&sockaddr.sll_addr[..6]);

                Ok((ret as usize, mac))
            }));

            fut.await
        }
    }

    impl RawSend for RawSocket {
        async fn send(&mut self, mac: MacAddr, data: &[u8]) -> Result<(), Self::Error> {
            let mut sockaddr = sys::sockaddr_ll {
                sll_family: sys::AF_PACKET as _,
                sll_protocol: (sys::ETH_P_IP as u16).to_be() as _,
                sll_ifindex: self.1 as _,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: mac.len() as _,
                sll_addr: Default::default(),
            };

            sockaddr.sll_addr[..mac.len()].copy_from_slice(&mac);

            let fut = pin!(self.0.write_with(|io| {
                let len = core::cmp::min(data.len(), u16::MAX as usize);

                let ret = syscall_los!(unsafe {
                    sys::sendto(
                        io.as_fd().as_raw_fd(),
                        data.as_ptr() as *const _,
                        len,
                        sys::MSG_NOSIGNAL,
                        &sockaddr as *const _ as *const _,
                        core::mem::size_of::<sys::sockaddr_ll>() as _,
                    )
                })?;
                Ok(ret as usize)
            }));

            let len = fut.await?;
            debug_assert_eq!(len, data.len());

            Ok(())
        }
    }

    fn as_sockaddr_ll(storage: &sys::sockaddr_storage) -> io::Result<&sys::sockaddr_ll> {
        match storage.ss_family as core::ffi::c_int {
            sys::AF_PACKET => {
                Ok(unsafe { (storage as *const _ as *const sys::sockaddr_ll).as_ref() }.unwrap())
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not an AF_PACKET address")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_beats_everything() {
        let giaddr: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mode = choose_tx_mode(
            giaddr,
            "0.0.0.0".parse().unwrap(),
            true,
            false,
            [0; 6],
            "10.0.0.50".parse().unwrap(),
        );
        assert_eq!(mode, TxTarget::Relay(giaddr));
    }

    #[test]
    fn ciaddr_without_relay_is_client_unicast() {
        let ciaddr: Ipv4Addr = "10.0.0.5".parse().unwrap();
        let mode = choose_tx_mode(
            "0.0.0.0".parse().unwrap(),
            ciaddr,
            false,
            false,
            [0; 6],
            "10.0.0.50".parse().unwrap(),
        );
        assert_eq!(mode, TxTarget::Client(ciaddr));
    }

    #[test]
    fn broadcast_flag_wins_over_raw_fallback() {
        let mode = choose_tx_mode(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            true,
            false,
            [1; 6],
            "10.0.0.50".parse().unwrap(),
        );
        assert_eq!(mode, TxTarget::Broadcast);
    }

    #[test]
    fn fresh_client_falls_back_to_raw_l2() {
        let mac = [0xaa; 6];
        let ip: Ipv4Addr = "10.0.0.50".parse().unwrap();
        let mode = choose_tx_mode(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, false, false, mac, ip);
        assert_eq!(mode, TxTarget::Raw { mac, ip });
    }

    #[test]
    fn nak_with_no_assigned_address_broadcasts_rather_than_raw() {
        let mode = choose_tx_mode(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            false,
            true,
            [0xaa; 6],
            Ipv4Addr::UNSPECIFIED,
        );
        assert_eq!(mode, TxTarget::Broadcast);
    }

    #[test]
    fn nak_to_nonzero_ciaddr_still_broadcasts() {
        // RFC 2131 4.1: NAKs are always broadcast when there's no relay,
        // even if the client claimed a (wrong) ciaddr.
        let mode = choose_tx_mode(
            Ipv4Addr::UNSPECIFIED,
            "10.0.0.5".parse().unwrap(),
            false,
            true,
            [0xaa; 6],
            Ipv4Addr::UNSPECIFIED,
        );
        assert_eq!(mode, TxTarget::Broadcast);
    }

    #[test]
    fn nak_through_relay_still_unicasts_to_relay() {
        let giaddr: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mode = choose_tx_mode(
            giaddr,
            "10.0.0.5".parse().unwrap(),
            false,
            true,
            [0xaa; 6],
            Ipv4Addr::UNSPECIFIED,
        );
        assert_eq!(mode, TxTarget::Relay(giaddr));
    }

    #[test]
    fn admission_allows_unrelayed_local_traffic() {
        let filter = AdmissionFilter {
            allow_local: true,
            allow_relays: false,
            allowed_relays: vec![],
        };

        assert!(filter.admit(
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68)),
            Ipv4Addr::UNSPECIFIED
        ));
    }

    #[test]
    fn admission_rejects_unlisted_relay() {
        let filter = AdmissionFilter {
            allow_local: true,
            allow_relays: true,
            allowed_relays: vec!["10.0.0.1".parse().unwrap()],
        };

        assert!(!filter.admit(
            SocketAddr::V4(SocketAddrV4::new("10.0.0.2".parse().unwrap(), 67)),
            "10.0.0.2".parse().unwrap()
        ));
    }
}
