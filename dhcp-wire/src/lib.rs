//! Parsing and serialization of DHCPv4 messages (RFC 2131) and their
//! options (RFC 2132 and successors), plus a handful of BOOTP compatibility
//! behaviors (option 52 overload, minimum packet padding) that the wire
//! format still carries.

use std::fmt;
use std::net::Ipv4Addr;

pub mod mac;
pub mod options;
pub mod rfc;

pub use mac::MacAddr;
pub use options::DhcpOptions;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidFormat,
    InvalidMessageType,
    MissingCookie,
    InvalidHlen,
    /// A non-contiguous repeat of an option code was encountered during
    /// decode. Not fatal: the first occurrence wins and the rest is logged
    /// and discarded.
    DuplicateOption,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DataUnderflow => "data underflow",
            Self::BufferOverflow => "buffer overflow",
            Self::InvalidFormat => "invalid format",
            Self::InvalidMessageType => "invalid or missing message type",
            Self::MissingCookie => "missing DHCP magic cookie",
            Self::InvalidHlen => "unsupported hardware address length",
            Self::DuplicateOption => "duplicate option code",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for Error {}

/// The DHCP magic cookie that follows the BOOTP fixed fields and precedes
/// the options area.
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Minimum total message size mandated for BOOTP compatibility (RFC 1542);
/// messages shorter than this are padded with zero bytes.
pub const MIN_MESSAGE_SIZE: usize = 300;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
const FLAG_BROADCAST: u16 = 0x8000;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

const OVERLOAD_FILE: u8 = 1;
const OVERLOAD_SNAME: u8 = 2;
const OVERLOAD_BOTH: u8 = 3;

/// DHCP message type (option 53), per RFC 2131 Table 2 and RFC 2132
/// section 9.6.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return Err(Error::InvalidMessageType),
        })
    }
}

/// A parsed DHCP message: the BOOTP fixed fields plus the options area.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// `true` for a reply (server -> client), `false` for a request.
    pub reply: bool,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub options: DhcpOptions,
}

impl Message {
    pub fn new_request(chaddr: MacAddr, xid: u32, secs: u16, ciaddr: Option<Ipv4Addr>) -> Self {
        Self {
            reply: false,
            hops: 0,
            xid,
            secs,
            broadcast: ciaddr.is_none(),
            ciaddr: ciaddr.unwrap_or(Ipv4Addr::UNSPECIFIED),
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: DhcpOptions::new(),
        }
    }

    /// Builds the skeleton of a reply to `self`: same transaction id,
    /// client hardware address and broadcast flag, fresh options.
    pub fn new_reply(&self) -> Self {
        Self {
            reply: true,
            hops: 0,
            xid: self.xid,
            secs: 0,
            broadcast: self.broadcast,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            options: DhcpOptions::new(),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.message_type()
    }

    /// Parses a message out of its UDP payload.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        let op = bytes.byte()?;
        let reply = match op {
            OP_BOOTREQUEST => false,
            OP_BOOTREPLY => true,
            _ => return Err(Error::InvalidFormat),
        };

        let _htype = bytes.byte()?;
        let hlen = bytes.byte()?;
        if hlen != HLEN_ETHERNET {
            return Err(Error::InvalidHlen);
        }

        let hops = bytes.byte()?;
        let xid = u32::from_be_bytes(bytes.arr()?);
        let secs = u16::from_be_bytes(bytes.arr()?);
        let flags = u16::from_be_bytes(bytes.arr()?);
        let ciaddr = Ipv4Addr::from(bytes.arr::<4>()?);
        let yiaddr = Ipv4Addr::from(bytes.arr::<4>()?);
        let siaddr = Ipv4Addr::from(bytes.arr::<4>()?);
        let giaddr = Ipv4Addr::from(bytes.arr::<4>()?);

        let chaddr_full: [u8; 16] = bytes.arr()?;
        let mut chaddr = [0u8; 6];
        chaddr.copy_from_slice(&chaddr_full[..6]);

        let sname: [u8; SNAME_LEN] = bytes.arr()?;
        let file: [u8; FILE_LEN] = bytes.arr()?;

        let cookie: [u8; 4] = bytes.arr()?;
        if cookie != MAGIC_COOKIE {
            return Err(Error::MissingCookie);
        }

        let mut options = DhcpOptions::decode(bytes.remaining())?;

        // RFC 2132 section 9.3: option 52 says whether the sname and/or
        // file fields were overloaded to carry extra option bytes.
        if let Some(&[overload]) = options.get(options::codes::OPTION_OVERLOAD) {
            if overload == OVERLOAD_FILE || overload == OVERLOAD_BOTH {
                let extra = DhcpOptions::decode(&file)?;
                merge(&mut options, extra);
            }
            if overload == OVERLOAD_SNAME || overload == OVERLOAD_BOTH {
                let extra = DhcpOptions::decode(&sname)?;
                merge(&mut options, extra);
            }
            options.delete(options::codes::OPTION_OVERLOAD);
        }

        Ok(Self {
            reply,
            hops,
            xid,
            secs,
            broadcast: flags & FLAG_BROADCAST != 0,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr: MacAddr(chaddr),
            options,
        })
    }

    /// Encodes the message into `buf`, padding to [`MIN_MESSAGE_SIZE`] if
    /// necessary. No option overload is performed: the options area is
    /// simply allowed to grow past the legacy 312-byte BOOTP frame.
    pub fn encode<'o>(&self, buf: &'o mut Vec<u8>) -> Result<&'o [u8], Error> {
        buf.clear();

        buf.push(if self.reply { OP_BOOTREPLY } else { OP_BOOTREQUEST });
        buf.push(HTYPE_ETHERNET);
        buf.push(HLEN_ETHERNET);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&(if self.broadcast { FLAG_BROADCAST } else { 0 }).to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());

        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&self.chaddr.octets());
        buf.extend_from_slice(&chaddr);

        buf.extend(std::iter::repeat(0u8).take(SNAME_LEN + FILE_LEN));
        buf.extend_from_slice(&MAGIC_COOKIE);

        self.options.encode(buf);
        buf.push(options::codes::END);

        while buf.len() < MIN_MESSAGE_SIZE {
            buf.push(options::codes::PAD);
        }

        Ok(buf.as_slice())
    }
}

/// Merges options decoded from an overloaded sname/file area into the main
/// option set, without clobbering a code the main options area already set.
fn merge(into: &mut DhcpOptions, extra: DhcpOptions) {
    for (code, value) in extra.iter() {
        if !into.is_set(code) {
            into.set(code, value.to_vec());
        }
    }
}

struct BytesIn<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BytesIn<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn byte(&mut self) -> Result<u8, Error> {
        self.arr::<1>().map(|a| a[0])
    }

    fn arr<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let slice = self
            .data
            .get(self.offset..self.offset + N)
            .ok_or(Error::DataUnderflow)?;
        self.offset += N;

        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn remaining(&mut self) -> &'a [u8] {
        let data = &self.data[self.offset..];
        self.offset = self.data.len();
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Message {
        let mut msg = Message::new_request(MacAddr([0x02, 0, 0, 0, 0, 1]), 0xdeadbeef, 0, None);
        msg.options.set_message_type(MessageType::Discover);
        msg.options.set_parameter_request_list(&[
            options::codes::SUBNET_MASK,
            options::codes::ROUTER,
        ]);
        msg
    }

    #[test]
    fn round_trips_a_discover() {
        let msg = sample_request();

        let mut buf = Vec::new();
        let encoded = msg.encode(&mut buf).unwrap().to_vec();

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encoded_message_meets_bootp_minimum_size() {
        let msg = sample_request();

        let mut buf = Vec::new();
        let encoded = msg.encode(&mut buf).unwrap();

        assert!(encoded.len() >= MIN_MESSAGE_SIZE);
    }

    #[test]
    fn rejects_missing_cookie() {
        let mut buf = vec![0u8; 240];
        buf[0] = OP_BOOTREQUEST;
        buf[2] = HLEN_ETHERNET;

        assert_eq!(Message::decode(&buf), Err(Error::MissingCookie));
    }

    #[test]
    fn option_overload_is_merged_into_main_options() {
        // Fixed-field layout up to and including sname/file, mirroring
        // `encode`/`decode`: op,htype,hlen,hops(4) + xid(4) + secs+flags(4)
        // + ciaddr+yiaddr+siaddr+giaddr(16) + chaddr(16) + sname(64) + file(128).
        let mut buf = vec![0u8; 4 + 4 + 4 + 16 + 16 + SNAME_LEN + FILE_LEN];
        buf[0] = OP_BOOTREQUEST;
        buf[2] = HLEN_ETHERNET;

        let mut file_opts = DhcpOptions::new();
        file_opts.set_parameter_request_list(&[options::codes::SUBNET_MASK]);
        file_opts.set_hostname("overloaded-client");
        let mut file_area = Vec::new();
        file_opts.encode(&mut file_area);
        file_area.push(options::codes::END);
        assert!(file_area.len() <= FILE_LEN);

        let file_start = buf.len() - FILE_LEN;
        buf[file_start..file_start + file_area.len()].copy_from_slice(&file_area);

        buf.extend_from_slice(&MAGIC_COOKIE);

        let mut main_opts = DhcpOptions::new();
        main_opts.set_message_type(MessageType::Discover);
        main_opts.set(options::codes::OPTION_OVERLOAD, vec![OVERLOAD_FILE]);
        main_opts.encode(&mut buf);
        buf.push(options::codes::END);

        let decoded = Message::decode(&buf).unwrap();
        assert_eq!(
            decoded.options.hostname().as_deref(),
            Some("overloaded-client")
        );
        assert_eq!(
            decoded.options.get(options::codes::PARAMETER_REQUEST_LIST),
            Some([options::codes::SUBNET_MASK].as_slice())
        );
        assert!(!decoded.options.is_set(options::codes::OPTION_OVERLOAD));
    }
}
