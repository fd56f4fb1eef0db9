//! RFC 5223 — LoST server domain name list (option 137). Same encoding as
//! the RFC 3397 domain search list.

use crate::rfc::rfc3397;
use crate::Error;

pub fn decode(data: &[u8]) -> Result<Vec<String>, Error> {
    rfc3397::decode(data)
}

pub fn encode(domains: &[String]) -> Vec<u8> {
    rfc3397::encode(domains)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_lost_server_domains() {
        let domains = vec!["lost.example.com".to_string()];
        assert_eq!(decode(&encode(&domains)).unwrap(), domains);
    }
}
