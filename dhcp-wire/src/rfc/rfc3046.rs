//! RFC 3046 — DHCP Relay Agent Information Option (option 82).
//!
//! The option's payload is itself a sequence of sub-options, each a plain
//! `code, length, value` TLV. Sub-option 1 is the circuit ID and 2 is the
//! remote ID; anything else is preserved opaquely so an unrecognized
//! sub-option doesn't get dropped on the floor.

use crate::Error;

pub const SUBOPT_CIRCUIT_ID: u8 = 1;
pub const SUBOPT_REMOTE_ID: u8 = 2;

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct RelayAgentInfo {
    pub sub_options: Vec<(u8, Vec<u8>)>,
}

impl RelayAgentInfo {
    pub fn circuit_id(&self) -> Option<&[u8]> {
        self.get(SUBOPT_CIRCUIT_ID)
    }

    pub fn remote_id(&self) -> Option<&[u8]> {
        self.get(SUBOPT_REMOTE_ID)
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.sub_options
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_slice())
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut sub_options = Vec::new();
        let mut i = 0;

        while i < data.len() {
            let code = data[i];
            let len = *data.get(i + 1).ok_or(Error::DataUnderflow)? as usize;
            let value = data
                .get(i + 2..i + 2 + len)
                .ok_or(Error::DataUnderflow)?
                .to_vec();

            sub_options.push((code, value));
            i += 2 + len;
        }

        Ok(Self { sub_options })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for (code, value) in &self.sub_options {
            out.push(*code);
            out.push(value.len() as u8);
            out.extend_from_slice(value);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_circuit_and_remote_id() {
        let info = RelayAgentInfo {
            sub_options: vec![
                (SUBOPT_CIRCUIT_ID, b"eth0".to_vec()),
                (SUBOPT_REMOTE_ID, vec![1, 2, 3, 4]),
            ],
        };

        let encoded = info.encode();
        let decoded = RelayAgentInfo::decode(&encoded).unwrap();

        assert_eq!(decoded.circuit_id(), Some(b"eth0".as_slice()));
        assert_eq!(decoded.remote_id(), Some([1, 2, 3, 4].as_slice()));
    }
}
