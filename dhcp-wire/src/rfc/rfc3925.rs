//! RFC 3925 — Vendor-Identifying Vendor Class and Vendor-Specific
//! Information options (124 and 125).
//!
//! Both options are a sequence of enterprise-keyed blocks: a 4-byte IANA
//! enterprise number followed by a length byte and that many bytes of
//! opaque (for option 124) or further-TLV-encoded (for option 125) data.
//! This module only unpacks the enterprise framing; the nested sub-options
//! of option 125 are left as raw bytes for the caller to interpret.

use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VendorBlock {
    pub enterprise_number: u32,
    pub data: Vec<u8>,
}

pub fn decode(data: &[u8]) -> Result<Vec<VendorBlock>, Error> {
    let mut blocks = Vec::new();
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

        let block_data = data.get(i..i + len).ok_or(Error::DataUnderflow)?.to_vec();
        i += len;

        blocks.push(VendorBlock {
            enterprise_number,
            data: block_data,
        });
    }

    Ok(blocks)
}

pub fn encode(blocks: &[VendorBlock]) -> Vec<u8> {
    let mut out = Vec::new();

    for block in blocks {
        out.extend_from_slice(&block.enterprise_number.to_be_bytes());
        out.push(block.data.len() as u8);
        out.extend_from_slice(&block.data);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_enterprises() {
        let blocks = vec![
            VendorBlock {
                enterprise_number: 3561,
                data: b"docsis3.0".to_vec(),
            },
            VendorBlock {
                enterprise_number: 4491,
                data: vec![1, 2, 3],
            },
        ];

        assert_eq!(decode(&encode(&blocks)).unwrap(), blocks);
    }
}
