//! RFC 4280 — Broadcast and Multicast Service (BCMCS) options. Option 88
//! carries BCMCS controller addresses, which (same as the SIP servers
//! option) may be encoded either as a domain name list or as a flat IPv4
//! address list.

use core::net::Ipv4Addr;

use crate::rfc::rfc3397;
use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BcmcsControllers {
    Domains(Vec<String>),
    Addresses(Vec<Ipv4Addr>),
}

pub fn decode_domains(data: &[u8]) -> Result<BcmcsControllers, Error> {
    Ok(BcmcsControllers::Domains(rfc3397::decode(data)?))
}

pub fn decode_addresses(data: &[u8]) -> Result<BcmcsControllers, Error> {
    if data.len() % 4 != 0 {
        return Err(Error::InvalidFormat);
    }

    Ok(BcmcsControllers::Addresses(
        data.chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
            .collect(),
    ))
}

pub fn encode(controllers: &BcmcsControllers) -> Vec<u8> {
    match controllers {
        BcmcsControllers::Domains(domains) => rfc3397::encode(domains),
        BcmcsControllers::Addresses(addrs) => {
            let mut out = Vec::with_capacity(addrs.len() * 4);
            for addr in addrs {
                out.extend_from_slice(&addr.octets());
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_address_shape() {
        let controllers = BcmcsControllers::Addresses(vec![Ipv4Addr::new(198, 51, 100, 1)]);
        assert_eq!(
            decode_addresses(&encode(&controllers)).unwrap(),
            controllers
        );
    }

    #[test]
    fn round_trips_domain_shape() {
        let controllers = BcmcsControllers::Domains(vec!["bcmcs.example.net".to_string()]);
        assert_eq!(decode_domains(&encode(&controllers)).unwrap(), controllers);
    }
}
