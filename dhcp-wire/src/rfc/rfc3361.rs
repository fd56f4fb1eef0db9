//! RFC 3361 — SIP Servers option (option 120).
//!
//! The first payload byte is an encoding discriminator: `0` means the rest
//! is a domain-search-list-style name list (RFC 3397 encoding), `1` means
//! the rest is a flat list of IPv4 addresses.

use core::net::Ipv4Addr;

use crate::rfc::rfc3397;
use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SipServers {
    Domains(Vec<String>),
    Addresses(Vec<Ipv4Addr>),
}

const ENCODING_DOMAINS: u8 = 0;
const ENCODING_ADDRESSES: u8 = 1;

pub fn decode(data: &[u8]) -> Result<SipServers, Error> {
    let (&tag, rest) = data.split_first().ok_or(Error::DataUnderflow)?;

    match tag {
        ENCODING_DOMAINS => Ok(SipServers::Domains(rfc3397::decode(rest)?)),
        ENCODING_ADDRESSES => {
            if rest.len() % 4 != 0 {
                return Err(Error::InvalidFormat);
            }

            Ok(SipServers::Addresses(
                rest.chunks_exact(4)
                    .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                    .collect(),
            ))
        }
        _ => Err(Error::InvalidFormat),
    }
}

pub fn encode(servers: &SipServers) -> Vec<u8> {
    let mut out = Vec::new();

    match servers {
        SipServers::Domains(domains) => {
            out.push(ENCODING_DOMAINS);
            out.extend(rfc3397::encode(domains));
        }
        SipServers::Addresses(addrs) => {
            out.push(ENCODING_ADDRESSES);
            for addr in addrs {
                out.extend_from_slice(&addr.octets());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_address_list() {
        let servers = SipServers::Addresses(vec![Ipv4Addr::new(192, 0, 2, 1)]);
        assert_eq!(decode(&encode(&servers)).unwrap(), servers);
    }

    #[test]
    fn round_trips_domain_list() {
        let servers = SipServers::Domains(vec!["sip.example.com".to_string()]);
        assert_eq!(decode(&encode(&servers)).unwrap(), servers);
    }
}
