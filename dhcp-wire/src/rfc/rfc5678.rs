//! RFC 5678 — MoS (Mobility Services) options for SeamolessBYOD: option 139
//! carries enterprise-keyed IPv4 addresses, option 140 enterprise-keyed
//! domain names. Both share the same `(enterprise number, length, value)`
//! repeated framing.

use core::net::Ipv4Addr;

use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MosIpv4Entry {
    pub enterprise_number: u32,
    pub addresses: Vec<Ipv4Addr>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MosDomainEntry {
    pub enterprise_number: u32,
    pub domain: String,
}

pub fn decode_ipv4(data: &[u8]) -> Result<Vec<MosIpv4Entry>, Error> {
    let mut entries = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let enterprise_number = u32::from_be_bytes(
            data.get(i..i + 4)
                .ok_or(Error::DataUnderflow)?
                .try_into()
                .map_err(|_| Error::DataUnderflow)?,
        );
        i += 4;

        let len = *data.get(i).ok_or(Error::DataUnderflow)? as usize;
        i += 1;

        if len % 4 != 0 {
            return Err(Error::InvalidFormat);
        }

        let addrs = data.get(i..i + len).ok_or(Error::DataUnderflow)?;
        i += len;

        entries.push(MosIpv4Entry {
            enterprise_number,
            addresses: addrs
                .chunks_exact(4)
                .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                .collect(),
        });
    }

    Ok(entries)
}

pub fn encode_ipv4(entries: &[MosIpv4Entry]) -> Vec<u8> {
    let mut out = Vec::new();

    for entry in entries {
        out.extend_from_slice(&entry.enterprise_number.to_be_bytes());
        out.push((entry.addresses.len() * 4) as u8);
        for addr in &entry.addresses {
            out.extend_from_slice(&addr.octets());
        }
    }

    out
}

pub fn decode_domain(data: &[u8]) -> Result<Vec<MosDomainEntry>, Error> {
    let mut entries = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let enterprise_number = u32::from_be_bytes(
            data.get(i..i + 4)
                .ok_or(Error::DataUnderflow)?
                .try_into()
                .map_err(|_| Error::DataUnderflow)?,
        );
        i += 4;

        let len = *data.get(i).ok_or(Error::DataUnderflow)? as usize;
        i += 1;

        let domain_bytes = data.get(i..i + len).ok_or(Error::DataUnderflow)?;
        i += len;

        entries.push(MosDomainEntry {
            enterprise_number,
            domain: String::from_utf8_lossy(domain_bytes).into_owned(),
        });
    }

    Ok(entries)
}

pub fn encode_domain(entries: &[MosDomainEntry]) -> Vec<u8> {
    let mut out = Vec::new();

    for entry in entries {
        out.extend_from_slice(&entry.enterprise_number.to_be_bytes());
        out.push(entry.domain.len() as u8);
        out.extend_from_slice(entry.domain.as_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4_entries() {
        let entries = vec![MosIpv4Entry {
            enterprise_number: 1,
            addresses: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        }];

        assert_eq!(decode_ipv4(&encode_ipv4(&entries)).unwrap(), entries);
    }

    #[test]
    fn round_trips_domain_entries() {
        let entries = vec![MosDomainEntry {
            enterprise_number: 2,
            domain: "mos.example.com".to_string(),
        }];

        assert_eq!(decode_domain(&encode_domain(&entries)).unwrap(), entries);
    }
}
