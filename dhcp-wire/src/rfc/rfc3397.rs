//! RFC 3397 — DNS domain search list (option 119).
//!
//! Encoded as a sequence of length-prefixed labels terminated by a zero
//! length byte, same as a DNS question name; unlike full DNS encoding this
//! never emits compression pointers, since the option is self-contained.

use crate::Error;

pub fn decode(data: &[u8]) -> Result<Vec<String>, Error> {
    let mut domains = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let mut labels = Vec::new();

        loop {
            let len = *data.get(i).ok_or(Error::DataUnderflow)? as usize;
            i += 1;

            if len == 0 {
                break;
            }

            if len & 0xc0 != 0 {
                // Compression pointer: unsupported, bail out cleanly.
                return Err(Error::InvalidFormat);
            }

            let label = data.get(i..i + len).ok_or(Error::DataUnderflow)?;
            labels.push(String::from_utf8_lossy(label).into_owned());
            i += len;
        }

        domains.push(labels.join("."));
    }

    Ok(domains)
}

pub fn encode(domains: &[String]) -> Vec<u8> {
    let mut out = Vec::new();

    for domain in domains {
        for label in domain.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_domains() {
        let domains = vec!["eng.example.com".to_string(), "example.org".to_string()];
        let encoded = encode(&domains);
        assert_eq!(decode(&encoded).unwrap(), domains);
    }
}
