use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::{Error, MessageType};

/// Well-known DHCP/BOOTP option codes this crate gives typed access to.
/// Anything not listed here is still carried (as raw bytes, keyed by its
/// code) but has no dedicated accessor.
pub mod codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DOMAIN_NAME_SERVER: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const NTP_SERVERS: u8 = 42;
    pub const REQUESTED_IP_ADDRESS: u8 = 50;
    pub const IP_ADDRESS_LEASE_TIME: u8 = 51;
    pub const OPTION_OVERLOAD: u8 = 52;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const MESSAGE: u8 = 56;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME_T1: u8 = 58;
    pub const REBINDING_TIME_T2: u8 = 59;
    pub const VENDOR_CLASS_IDENTIFIER: u8 = 60;
    pub const CLIENT_IDENTIFIER: u8 = 61;
    pub const TFTP_SERVER_NAME: u8 = 66;
    pub const BOOTFILE_NAME: u8 = 67;
    pub const RELAY_AGENT_INFORMATION: u8 = 82;
    pub const ISNS: u8 = 83;
    pub const BCMCS_DOMAIN_LIST: u8 = 88;
    pub const BCMCS_ADDRESS_LIST: u8 = 89;
    pub const DOMAIN_SEARCH: u8 = 119;
    pub const SIP_SERVERS: u8 = 120;
    pub const CLASSLESS_STATIC_ROUTES: u8 = 121;
    pub const VENDOR_IDENTIFYING_VENDOR_CLASS: u8 = 124;
    pub const VENDOR_IDENTIFYING_VENDOR_SPECIFIC: u8 = 125;
    pub const LOST_SERVER_DOMAIN_NAME: u8 = 137;
    pub const MOS_IPV4_ADDRESS: u8 = 139;
    pub const MOS_DOMAIN_NAME: u8 = 140;
    pub const END: u8 = 255;
}

use codes::*;

/// The decoded option area of a DHCP message: a sparse, ordered map from
/// option code to its raw payload bytes. Typed accessors decode/encode the
/// commonly-used options on top of this; anything else is reachable via
/// [`DhcpOptions::get`]/[`DhcpOptions::set`].
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct DhcpOptions(BTreeMap<u8, Vec<u8>>);

impl DhcpOptions {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.0.get(&code).map(|v| v.as_slice())
    }

    pub fn set(&mut self, code: u8, data: Vec<u8>) {
        self.0.insert(code, data);
    }

    pub fn delete(&mut self, code: u8) {
        self.0.remove(&code);
    }

    pub fn is_set(&self, code: u8) -> bool {
        self.0.contains_key(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.0.iter().map(|(c, v)| (*c, v.as_slice()))
    }

    /// Whether `code` is present in the client's parameter request list
    /// (option 55), i.e. whether the client explicitly asked for it.
    pub fn is_requested_option(&self, code: u8) -> bool {
        self.get(PARAMETER_REQUEST_LIST)
            .map(|list| list.contains(&code))
            .unwrap_or(false)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.get(MESSAGE_TYPE)
            .and_then(|v| v.first())
            .and_then(|&b| MessageType::try_from(b).ok())
    }

    pub fn set_message_type(&mut self, mt: MessageType) {
        self.set(MESSAGE_TYPE, vec![mt as u8]);
    }

    pub fn requested_ip_address(&self) -> Option<Ipv4Addr> {
        self.ipv4(REQUESTED_IP_ADDRESS)
    }

    pub fn set_requested_ip_address(&mut self, ip: Ipv4Addr) {
        self.set_ipv4(REQUESTED_IP_ADDRESS, ip);
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.ipv4(SERVER_IDENTIFIER)
    }

    pub fn set_server_identifier(&mut self, ip: Ipv4Addr) {
        self.set_ipv4(SERVER_IDENTIFIER, ip);
    }

    pub fn lease_time_secs(&self) -> Option<u32> {
        self.u32(IP_ADDRESS_LEASE_TIME)
    }

    pub fn set_lease_time_secs(&mut self, secs: u32) {
        self.set_u32(IP_ADDRESS_LEASE_TIME, secs);
    }

    pub fn renewal_time_secs(&self) -> Option<u32> {
        self.u32(RENEWAL_TIME_T1)
    }

    pub fn set_renewal_time_secs(&mut self, secs: u32) {
        self.set_u32(RENEWAL_TIME_T1, secs);
    }

    pub fn rebinding_time_secs(&self) -> Option<u32> {
        self.u32(REBINDING_TIME_T2)
    }

    pub fn set_rebinding_time_secs(&mut self, secs: u32) {
        self.set_u32(REBINDING_TIME_T2, secs);
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.ipv4(SUBNET_MASK)
    }

    pub fn set_subnet_mask(&mut self, ip: Ipv4Addr) {
        self.set_ipv4(SUBNET_MASK, ip);
    }

    pub fn broadcast_address(&self) -> Option<Ipv4Addr> {
        self.ipv4(BROADCAST_ADDRESS)
    }

    pub fn set_broadcast_address(&mut self, ip: Ipv4Addr) {
        self.set_ipv4(BROADCAST_ADDRESS, ip);
    }

    pub fn routers(&self) -> Vec<Ipv4Addr> {
        self.ipv4_list(ROUTER)
    }

    pub fn set_routers(&mut self, ips: &[Ipv4Addr]) {
        self.set_ipv4_list(ROUTER, ips);
    }

    pub fn domain_name_servers(&self) -> Vec<Ipv4Addr> {
        self.ipv4_list(DOMAIN_NAME_SERVER)
    }

    pub fn set_domain_name_servers(&mut self, ips: &[Ipv4Addr]) {
        self.set_ipv4_list(DOMAIN_NAME_SERVER, ips);
    }

    pub fn ntp_servers(&self) -> Vec<Ipv4Addr> {
        self.ipv4_list(NTP_SERVERS)
    }

    pub fn set_ntp_servers(&mut self, ips: &[Ipv4Addr]) {
        self.set_ipv4_list(NTP_SERVERS, ips);
    }

    pub fn domain_name(&self) -> Option<String> {
        self.get(DOMAIN_NAME).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_domain_name(&mut self, name: &str) {
        self.set(DOMAIN_NAME, name.as_bytes().to_vec());
    }

    pub fn hostname(&self) -> Option<String> {
        self.get(HOSTNAME).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_hostname(&mut self, name: &str) {
        self.set(HOSTNAME, name.as_bytes().to_vec());
    }

    pub fn message(&self) -> Option<String> {
        self.get(MESSAGE).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_message(&mut self, msg: &str) {
        self.set(MESSAGE, msg.as_bytes().to_vec());
    }

    pub fn set_parameter_request_list(&mut self, codes: &[u8]) {
        self.set(PARAMETER_REQUEST_LIST, codes.to_vec());
    }

    /// Option 82: relay agent information, as attached by a relay on the
    /// way in. `None` if absent; `Some(Err(_))` if present but malformed.
    pub fn relay_agent_info(&self) -> Option<Result<crate::rfc::rfc3046::RelayAgentInfo, Error>> {
        self.get(RELAY_AGENT_INFORMATION).map(crate::rfc::rfc3046::RelayAgentInfo::decode)
    }

    pub fn set_relay_agent_info(&mut self, info: &crate::rfc::rfc3046::RelayAgentInfo) {
        self.set(RELAY_AGENT_INFORMATION, info.encode());
    }

    /// Option 83: iSNS server record.
    pub fn isns(&self) -> Option<Result<crate::rfc::rfc4174::Isns, Error>> {
        self.get(ISNS).map(crate::rfc::rfc4174::decode)
    }

    pub fn set_isns(&mut self, isns: &crate::rfc::rfc4174::Isns) {
        self.set(ISNS, crate::rfc::rfc4174::encode(isns));
    }

    /// Option 88: BCMCS controllers, either a domain list or an address
    /// list depending on which leading byte the payload carries.
    pub fn bcmcs_controllers(&self) -> Option<Result<crate::rfc::rfc4280::BcmcsControllers, Error>> {
        self.get(BCMCS_DOMAIN_LIST)
            .map(crate::rfc::rfc4280::decode_domains)
            .or_else(|| self.get(BCMCS_ADDRESS_LIST).map(crate::rfc::rfc4280::decode_addresses))
    }

    pub fn set_bcmcs_controllers(&mut self, controllers: &crate::rfc::rfc4280::BcmcsControllers) {
        let code = match controllers {
            crate::rfc::rfc4280::BcmcsControllers::Domains(_) => BCMCS_DOMAIN_LIST,
            crate::rfc::rfc4280::BcmcsControllers::Addresses(_) => BCMCS_ADDRESS_LIST,
        };
        self.set(code, crate::rfc::rfc4280::encode(controllers));
    }

    /// Option 119: DNS domain search list.
    pub fn domain_search(&self) -> Option<Result<Vec<String>, Error>> {
        self.get(DOMAIN_SEARCH).map(crate::rfc::rfc3397::decode)
    }

    pub fn set_domain_search(&mut self, domains: &[String]) {
        self.set(DOMAIN_SEARCH, crate::rfc::rfc3397::encode(domains));
    }

    /// Option 120: SIP servers, either a name list or an address list.
    pub fn sip_servers(&self) -> Option<Result<crate::rfc::rfc3361::SipServers, Error>> {
        self.get(SIP_SERVERS).map(crate::rfc::rfc3361::decode)
    }

    pub fn set_sip_servers(&mut self, servers: &crate::rfc::rfc3361::SipServers) {
        self.set(SIP_SERVERS, crate::rfc::rfc3361::encode(servers));
    }

    /// Option 121: classless static routes.
    pub fn classless_static_routes(&self) -> Option<Result<Vec<crate::rfc::rfc3442::ClasslessRoute>, Error>> {
        self.get(CLASSLESS_STATIC_ROUTES).map(crate::rfc::rfc3442::decode)
    }

    pub fn set_classless_static_routes(&mut self, routes: &[crate::rfc::rfc3442::ClasslessRoute]) {
        self.set(CLASSLESS_STATIC_ROUTES, crate::rfc::rfc3442::encode(routes));
    }

    /// Option 124: vendor-identifying vendor class, enterprise-keyed blocks.
    pub fn vendor_identifying_vendor_class(&self) -> Option<Result<Vec<crate::rfc::rfc3925::VendorBlock>, Error>> {
        self.get(VENDOR_IDENTIFYING_VENDOR_CLASS).map(crate::rfc::rfc3925::decode)
    }

    pub fn set_vendor_identifying_vendor_class(&mut self, blocks: &[crate::rfc::rfc3925::VendorBlock]) {
        self.set(VENDOR_IDENTIFYING_VENDOR_CLASS, crate::rfc::rfc3925::encode(blocks));
    }

    /// Option 125: vendor-identifying vendor-specific information, same
    /// enterprise framing as option 124.
    pub fn vendor_identifying_vendor_specific(&self) -> Option<Result<Vec<crate::rfc::rfc3925::VendorBlock>, Error>> {
        self.get(VENDOR_IDENTIFYING_VENDOR_SPECIFIC).map(crate::rfc::rfc3925::decode)
    }

    pub fn set_vendor_identifying_vendor_specific(&mut self, blocks: &[crate::rfc::rfc3925::VendorBlock]) {
        self.set(VENDOR_IDENTIFYING_VENDOR_SPECIFIC, crate::rfc::rfc3925::encode(blocks));
    }

    /// Option 137: LoST server domain names.
    pub fn lost_server_domains(&self) -> Option<Result<Vec<String>, Error>> {
        self.get(LOST_SERVER_DOMAIN_NAME).map(crate::rfc::rfc5223::decode)
    }

    pub fn set_lost_server_domains(&mut self, domains: &[String]) {
        self.set(LOST_SERVER_DOMAIN_NAME, crate::rfc::rfc5223::encode(domains));
    }

    /// Option 139: MoS IPv4 addresses, enterprise-keyed.
    pub fn mos_ipv4(&self) -> Option<Result<Vec<crate::rfc::rfc5678::MosIpv4Entry>, Error>> {
        self.get(MOS_IPV4_ADDRESS).map(crate::rfc::rfc5678::decode_ipv4)
    }

    pub fn set_mos_ipv4(&mut self, entries: &[crate::rfc::rfc5678::MosIpv4Entry]) {
        self.set(MOS_IPV4_ADDRESS, crate::rfc::rfc5678::encode_ipv4(entries));
    }

    /// Option 140: MoS domain names, enterprise-keyed.
    pub fn mos_domain(&self) -> Option<Result<Vec<crate::rfc::rfc5678::MosDomainEntry>, Error>> {
        self.get(MOS_DOMAIN_NAME).map(crate::rfc::rfc5678::decode_domain)
    }

    pub fn set_mos_domain(&mut self, entries: &[crate::rfc::rfc5678::MosDomainEntry]) {
        self.set(MOS_DOMAIN_NAME, crate::rfc::rfc5678::encode_domain(entries));
    }

    fn ipv4(&self, code: u8) -> Option<Ipv4Addr> {
        self.get(code)
            .and_then(|v| <[u8; 4]>::try_from(v).ok())
            .map(Ipv4Addr::from)
    }

    fn set_ipv4(&mut self, code: u8, ip: Ipv4Addr) {
        self.set(code, ip.octets().to_vec());
    }

    fn ipv4_list(&self, code: u8) -> Vec<Ipv4Addr> {
        self.get(code)
            .map(|v| {
                v.chunks_exact(4)
                    .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_ipv4_list(&mut self, code: u8, ips: &[Ipv4Addr]) {
        let mut data = Vec::with_capacity(ips.len() * 4);
        for ip in ips {
            data.extend_from_slice(&ip.octets());
        }
        self.set(code, data);
    }

    fn u32(&self, code: u8) -> Option<u32> {
        self.get(code)
            .and_then(|v| <[u8; 4]>::try_from(v).ok())
            .map(u32::from_be_bytes)
    }

    fn set_u32(&mut self, code: u8, value: u32) {
        self.set(code, value.to_be_bytes().to_vec());
    }

    /// Decodes a run of options (everything between the magic cookie and
    /// the terminating `END`/trailing padding, already having any
    /// sname/file overload areas concatenated in by the caller).
    ///
    /// A code repeated back-to-back (no other code in between) is an RFC
    /// 3396 continuation and is reassembled into one value. A code that
    /// reappears after other options have intervened is a true duplicate:
    /// the first occurrence wins and the rest is logged and discarded.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut options = Self::new();
        let mut i = 0;
        let mut last_code: Option<u8> = None;

        while i < data.len() {
            let code = data[i];
            i += 1;

            if code == PAD {
                last_code = None;
                continue;
            }

            if code == END {
                break;
            }

            let len = *data.get(i).ok_or(Error::DataUnderflow)? as usize;
            i += 1;

            let value = data.get(i..i + len).ok_or(Error::DataUnderflow)?;
            i += len;

            if last_code == Some(code) {
                options
                    .0
                    .get_mut(&code)
                    .expect("code just inserted on the previous iteration")
                    .extend_from_slice(value);
            } else if options.0.contains_key(&code) {
                log::warn!("{}: code {code}, keeping first occurrence", Error::DuplicateOption);
            } else {
                options.0.insert(code, value.to_vec());
            }

            last_code = Some(code);
        }

        Ok(options)
    }

    /// Encodes the options in ascending code order, without the
    /// terminating `END` byte or any padding (the caller adds those as
    /// part of the full message layout).
    pub fn encode(&self, out: &mut Vec<u8>) {
        for (code, value) in self.0.iter() {
            if value.is_empty() {
                out.push(*code);
                out.push(0);
                continue;
            }

            for chunk in value.chunks(255) {
                out.push(*code);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_typed_accessors() {
        let mut opts = DhcpOptions::new();
        opts.set_message_type(MessageType::Offer);
        opts.set_lease_time_secs(3600);
        opts.set_routers(&[Ipv4Addr::new(10, 0, 0, 1)]);
        opts.set_domain_name("example.com");

        let mut buf = Vec::new();
        opts.encode(&mut buf);
        buf.push(END);

        let decoded = DhcpOptions::decode(&buf).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::Offer));
        assert_eq!(decoded.lease_time_secs(), Some(3600));
        assert_eq!(decoded.routers(), vec![Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(decoded.domain_name().as_deref(), Some("example.com"));
    }

    #[test]
    fn split_long_option_reassembles_per_rfc3396() {
        let value: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let mut opts = DhcpOptions::new();
        opts.set(VENDOR_CLASS_IDENTIFIER, value.clone());

        let mut buf = Vec::new();
        opts.encode(&mut buf);
        buf.push(END);

        let decoded = DhcpOptions::decode(&buf).unwrap();
        assert_eq!(decoded.get(VENDOR_CLASS_IDENTIFIER), Some(value.as_slice()));
    }

    #[test]
    fn non_contiguous_duplicate_code_keeps_first_occurrence() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[HOSTNAME, 4]);
        buf.extend_from_slice(b"host");
        buf.extend_from_slice(&[SUBNET_MASK, 4, 255, 255, 255, 0]);
        buf.extend_from_slice(&[HOSTNAME, 5]);
        buf.extend_from_slice(b"other");
        buf.push(END);

        let decoded = DhcpOptions::decode(&buf).unwrap();
        assert_eq!(decoded.hostname().as_deref(), Some("host"));
    }

    #[test]
    fn is_requested_option_reads_parameter_request_list() {
        let mut opts = DhcpOptions::new();
        opts.set_parameter_request_list(&[SUBNET_MASK, ROUTER]);

        assert!(opts.is_requested_option(SUBNET_MASK));
        assert!(!opts.is_requested_option(DOMAIN_NAME));
    }

    #[test]
    fn classless_static_routes_round_trip_through_options() {
        use crate::rfc::rfc3442::ClasslessRoute;

        let routes = vec![ClasslessRoute {
            destination: Ipv4Addr::new(10, 17, 0, 0),
            prefix_len: 16,
            router: Ipv4Addr::new(10, 0, 0, 1),
        }];

        let mut opts = DhcpOptions::new();
        opts.set_classless_static_routes(&routes);

        assert_eq!(opts.classless_static_routes().unwrap().unwrap(), routes);
    }

    #[test]
    fn relay_agent_info_round_trips_through_options() {
        use crate::rfc::rfc3046::{RelayAgentInfo, SUBOPT_CIRCUIT_ID};

        let info = RelayAgentInfo { sub_options: vec![(SUBOPT_CIRCUIT_ID, b"eth0".to_vec())] };

        let mut opts = DhcpOptions::new();
        opts.set_relay_agent_info(&info);

        assert_eq!(opts.relay_agent_info().unwrap().unwrap().circuit_id(), Some(b"eth0".as_slice()));
    }

    #[test]
    fn missing_structured_option_is_none() {
        let opts = DhcpOptions::new();
        assert!(opts.domain_search().is_none());
        assert!(opts.sip_servers().is_none());
    }
}
