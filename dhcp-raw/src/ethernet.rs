use super::bytes::{BytesIn, BytesOut};
use super::Error;

/// A MAC address, in the same shape as `dhcp_nal::MacAddr` so the two crates
/// don't need a conversion at the boundary.
pub type MacAddr = [u8; 6];

pub const BROADCAST: MacAddr = [0xff; 6];

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_8021Q: u16 = 0x8100;

/// A single 802.1Q tag: priority code point, drop-eligible indicator and VLAN id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Dot1Q {
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
}

impl Dot1Q {
    pub fn new(vid: u16) -> Self {
        Self {
            pcp: 0,
            dei: false,
            vid,
        }
    }

    fn tci(&self) -> u16 {
        ((self.pcp as u16 & 0x7) << 13) | ((self.dei as u16) << 12) | (self.vid & 0x0fff)
    }

    fn from_tci(tci: u16) -> Self {
        Self {
            pcp: ((tci >> 13) & 0x7) as u8,
            dei: (tci >> 12) & 1 != 0,
            vid: tci & 0x0fff,
        }
    }
}

/// A parsed Ethernet header, with zero or more 802.1Q tags (outermost first).
#[derive(Clone, Debug)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub qtags: Vec<Dot1Q>,
}

impl EthernetHeader {
    pub const MIN_SIZE: usize = 14;

    pub fn new(dst: MacAddr, src: MacAddr, qtags: &[Dot1Q]) -> Self {
        Self {
            dst,
            src,
            qtags: qtags.to_vec(),
        }
    }

    /// Encodes the header (addresses, any 802.1Q tags, and the trailing
    /// IPv4 ethertype) into `buf`, returning the prefix written.
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes.push(&self.dst)?.push(&self.src)?;

        for tag in &self.qtags {
            bytes
                .push(&u16::to_be_bytes(ETHERTYPE_8021Q))?
                .push(&u16::to_be_bytes(tag.tci()))?;
        }

        bytes.push(&u16::to_be_bytes(ETHERTYPE_IPV4))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// Decodes the Ethernet header (including any 802.1Q tags) from `packet`,
    /// returning the header and the remaining IPv4 payload.
    pub fn decode(packet: &[u8]) -> Result<(Self, &[u8]), Error> {
        let mut bytes = BytesIn::new(packet);

        let dst: MacAddr = bytes.arr()?;
        let src: MacAddr = bytes.arr()?;

        let mut qtags = Vec::new();

        loop {
            let ethertype = u16::from_be_bytes(bytes.arr()?);

            if ethertype == ETHERTYPE_8021Q {
                let tci = u16::from_be_bytes(bytes.arr()?);
                qtags.push(Dot1Q::from_tci(tci));
            } else if ethertype == ETHERTYPE_IPV4 {
                break;
            } else {
                return Err(Error::InvalidFormat);
            }
        }

        let hdr = Self { dst, src, qtags };
        let consumed = bytes.offset();

        Ok((hdr, &packet[consumed..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_survive_tci_round_trip() {
        let tag = Dot1Q {
            pcp: 5,
            dei: true,
            vid: 100,
        };
        assert_eq!(Dot1Q::from_tci(tag.tci()), tag);
    }

    #[test]
    fn header_round_trips_with_two_tags() {
        let dst = [1, 2, 3, 4, 5, 6];
        let src = [6, 5, 4, 3, 2, 1];
        let qtags = [Dot1Q::new(10), Dot1Q::new(20)];

        let mut buf = [0u8; 64];
        let encoded = EthernetHeader::new(dst, src, &qtags).encode(&mut buf).unwrap();

        let (hdr, rest) = EthernetHeader::decode(encoded).unwrap();
        assert_eq!(hdr.dst, dst);
        assert_eq!(hdr.src, src);
        assert_eq!(hdr.qtags, qtags);
        assert!(rest.is_empty());
    }
}
