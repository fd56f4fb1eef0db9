#![allow(clippy::uninlined_format_args)]

//! Byte-level construction and parsing of the frames the DHCP server needs
//! to put packets on the wire itself, without relying on the kernel's IP
//! stack to do routing or ARP for it: Ethernet + (optional) 802.1Q + IPv4 +
//! UDP, all the way down to the checksum.
//!
//! A normal UDP socket is enough for almost every response a DHCP server
//! sends. The one case it isn't is a freshly-assigned client that has no
//! usable source IP yet and therefore cannot be ARPed: the server has to
//! build the whole layer-2 frame by hand and push it out a raw socket. This
//! crate is the codec half of that; `dhcp-net` owns the socket.

use core::net::{Ipv4Addr, SocketAddrV4};

use self::udp::UdpPacketHeader;

pub mod bytes;
pub mod ethernet;
pub mod ip;
pub mod udp;

use bytes::BytesIn;
use ethernet::{Dot1Q, EthernetHeader, MacAddr};
use ip::Ipv4PacketHeader;

/// An error type for decoding and encoding Ethernet, IP and UDP packets
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidFormat,
    InvalidChecksum,
}

impl From<bytes::Error> for Error {
    fn from(value: bytes::Error) -> Self {
        match value {
            bytes::Error::BufferOverflow => Self::BufferOverflow,
            bytes::Error::DataUnderflow => Self::DataUnderflow,
            bytes::Error::InvalidFormat => Self::InvalidFormat,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let str = match self {
            Self::DataUnderflow => "Data underflow",
            Self::BufferOverflow => "Buffer overflow",
            Self::InvalidFormat => "Invalid format",
            Self::InvalidChecksum => "Invalid checksum",
        };

        write!(f, "{}", str)
    }
}

impl std::error::Error for Error {}

/// Decodes an IP packet and its UDP payload
#[allow(clippy::type_complexity)]
pub fn ip_udp_decode(
    packet: &[u8],
    filter_src: Option<SocketAddrV4>,
    filter_dst: Option<SocketAddrV4>,
) -> Result<Option<(SocketAddrV4, SocketAddrV4, &[u8])>, Error> {
    if let Some((src, dst, _proto, udp_packet)) = ip::decode(
        packet,
        filter_src.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        filter_dst.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        Some(UdpPacketHeader::PROTO),
    )? {
        udp::decode(
            src,
            dst,
            udp_packet,
            filter_src.map(|a| a.port()),
            filter_dst.map(|a| a.port()),
        )
    } else {
        Ok(None)
    }
}

/// Encodes an IP packet and its UDP payload
pub fn ip_udp_encode<F>(
    buf: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    ip::encode(buf, *src.ip(), *dst.ip(), UdpPacketHeader::PROTO, |buf| {
        Ok(udp::encode(buf, src, dst, encoder)?.len())
    })
}

/// Builds a full Ethernet + (optional) 802.1Q + IPv4 + UDP frame carrying
/// `payload`, for the raw-socket fallback transmission path.
///
/// `qtags` are given outermost-first, i.e. `qtags[0]` is the tag right after
/// the Ethernet addresses/ethertype and `qtags.last()` is the one immediately
/// preceding the IPv4 header.
pub fn build_l2_frame(
    buf: &mut [u8],
    dst_mac: MacAddr,
    src_mac: MacAddr,
    qtags: &[Dot1Q],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    payload: &[u8],
) -> Result<&[u8], Error> {
    let eth = EthernetHeader::new(dst_mac, src_mac, qtags);
    let eth_buf = eth.encode(buf)?;
    let eth_len = eth_buf.len();

    let ip_buf = ip_udp_encode(&mut buf[eth_len..], src, dst, |buf| {
        if payload.len() <= buf.len() {
            buf[..payload.len()].copy_from_slice(payload);
            Ok(payload.len())
        } else {
            Err(Error::BufferOverflow)
        }
    })?;
    let total = eth_len + ip_buf.len();

    Ok(&buf[..total])
}

pub fn checksum_accumulate(bytes: &[u8], checksum_word: usize) -> u32 {
    let mut bytes = BytesIn::new(bytes);

    let mut sum: u32 = 0;
    while !bytes.is_empty() {
        let skip = (bytes.offset() >> 1) == checksum_word;
        let arr = bytes
            .arr()
            .unwrap_or_else(|_| [bytes.byte().expect("byte already confirmed present"), 0]);

        let word = if skip { 0 } else { u16::from_be_bytes(arr) };

        sum += word as u32;
    }

    sum
}

pub fn checksum_finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_frame_round_trips_ip_udp_payload() {
        let dst_mac: MacAddr = [0xff; 6];
        let src_mac: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let src = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 68);
        let dst = SocketAddrV4::new(Ipv4Addr::new(255, 255, 255, 255), 67);

        let mut buf = [0u8; 1500];
        let payload = b"hello dhcp";

        let frame = build_l2_frame(&mut buf, dst_mac, src_mac, &[], src, dst, payload).unwrap();

        let eth = EthernetHeader::decode(frame).unwrap();
        assert_eq!(eth.0.dst, dst_mac);
        assert_eq!(eth.0.src, src_mac);
        assert!(eth.0.qtags.is_empty());

        let (decoded_src, decoded_dst, data) =
            ip_udp_decode(eth.1, None, None).unwrap().unwrap();
        assert_eq!(decoded_src, src);
        assert_eq!(decoded_dst, dst);
        assert_eq!(data, payload);
    }
}
