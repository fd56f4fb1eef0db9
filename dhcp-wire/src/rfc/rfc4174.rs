//! RFC 4174 — iSNS option (option 83): a fixed-layout header followed by
//! one or more iSNS server addresses.

use core::net::Ipv4Addr;

use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Isns {
    pub functions: u16,
    pub discovery_domain_control: u16,
    pub administrative_flags: u16,
    pub server_security_bitmap: u32,
    pub servers: Vec<Ipv4Addr>,
}

const HEADER_LEN: usize = 2 + 2 + 2 + 4;

pub fn decode(data: &[u8]) -> Result<Isns, Error> {
    if data.len() < HEADER_LEN {
        return Err(Error::DataUnderflow);
    }

    let functions = u16::from_be_bytes([data[0], data[1]]);
    let discovery_domain_control = u16::from_be_bytes([data[2], data[3]]);
    let administrative_flags = u16::from_be_bytes([data[4], data[5]]);
    let server_security_bitmap = u32::from_be_bytes([data[6], data[7], data[8], data[9]]);

    let rest = &data[HEADER_LEN..];
    if rest.len() % 4 != 0 {
        return Err(Error::InvalidFormat);
    }

    let servers = rest
        .chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect();

    Ok(Isns {
        functions,
        discovery_domain_control,
        administrative_flags,
        server_security_bitmap,
        servers,
    })
}

pub fn encode(isns: &Isns) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + isns.servers.len() * 4);

    out.extend_from_slice(&isns.functions.to_be_bytes());
    out.extend_from_slice(&isns.discovery_domain_control.to_be_bytes());
    out.extend_from_slice(&isns.administrative_flags.to_be_bytes());
    out.extend_from_slice(&isns.server_security_bitmap.to_be_bytes());

    for server in &isns.servers {
        out.extend_from_slice(&server.octets());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_servers() {
        let isns = Isns {
            functions: 1,
            discovery_domain_control: 2,
            administrative_flags: 3,
            server_security_bitmap: 4,
            servers: vec![Ipv4Addr::new(192, 0, 2, 10), Ipv4Addr::new(192, 0, 2, 11)],
        };

        assert_eq!(decode(&encode(&isns)).unwrap(), isns);
    }
}
