//! The per-packet decision matrix: classifies a message, resolves the
//! client's `Definition`, builds the appropriate response (or decides to
//! stay silent), and picks how it should leave the wire.

pub mod hooks;

pub use hooks::{FilterDecision, Hooks, LoadDecision};

use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use dhcp_backend::{Backend, BackendError, Definition};
use dhcp_net::{choose_tx_mode, TxTarget};
use dhcp_resolve::{resolve, PacketMeta, Resolution};
use dhcp_suspend::{SourceKey, SourceState, Suspender};
use dhcp_wire::options::codes;
use dhcp_wire::{MacAddr, Message, MessageType};
use log::{debug, error, trace, warn};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub server_ip: Ipv4Addr,
    /// NAK unrecognized addresses instead of staying silent.
    pub authoritative: bool,
    /// Unconditionally NAK RENEWING/REBINDING requests, forcing clients
    /// back through DISCOVER after a network-wide change.
    pub nak_renewals: bool,
}

/// What the caller's NetLink layer observed about how the request arrived,
/// needed to distinguish RENEWING from REBINDING (RFC 2131 section 4.3.2)
/// and to pass through to the `load` hook.
#[derive(Copy, Clone, Debug)]
pub struct RequestContext {
    pub source: SocketAddr,
    pub port: u16,
    /// Whether the request's destination was the broadcast address rather
    /// than the server's own unicast IP.
    pub received_broadcast: bool,
}

/// The outcome of handling one request.
pub enum Outcome {
    Send(Message, TxTarget),
    Silent,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum RequestSubState {
    Selecting,
    InitReboot,
    Renewing,
    Rebinding,
}

fn classify_request(request: &Message, received_broadcast: bool) -> RequestSubState {
    if request.options.server_identifier().is_some() {
        return RequestSubState::Selecting;
    }

    if request.ciaddr.is_unspecified() && request.options.requested_ip_address().is_some() {
        return RequestSubState::InitReboot;
    }

    if received_broadcast {
        RequestSubState::Rebinding
    } else {
        RequestSubState::Renewing
    }
}

/// T1/T2 per RFC 2131 section 4.4.1's suggested defaults (lease/2, lease*7/8).
fn derive_renewal_times(lease_time_secs: u32) -> (u32, u32) {
    (lease_time_secs / 2, lease_time_secs / 8 * 7)
}

fn apply_definition(response: &mut Message, server_ip: Ipv4Addr, definition: &Definition) {
    response.options.set_server_identifier(server_ip);

    if let Some(mask) = definition.subnet_mask {
        response.options.set_subnet_mask(mask);
    }
    if let Some(bcast) = definition.broadcast_address {
        response.options.set_broadcast_address(bcast);
    }
    if !definition.gateways.is_empty() {
        response.options.set_routers(&definition.gateways);
    }
    if let Some(domain) = &definition.domain_name {
        response.options.set_domain_name(domain);
    }
    if !definition.domain_name_servers.is_empty() {
        response.options.set_domain_name_servers(&definition.domain_name_servers);
    }
    if !definition.ntp_servers.is_empty() {
        response.options.set_ntp_servers(&definition.ntp_servers);
    }
    if let Some(hostname) = &definition.hostname {
        response.options.set_hostname(hostname);
    }
}

fn apply_lease(response: &mut Message, lease_time_secs: u32) {
    response.options.set_lease_time_secs(lease_time_secs);
    let (t1, t2) = derive_renewal_times(lease_time_secs);
    response.options.set_renewal_time_secs(t1);
    response.options.set_rebinding_time_secs(t2);
}

fn nak(request: &Message, server_ip: Ipv4Addr) -> Message {
    let mut response = request.new_reply();
    response.options.set_message_type(MessageType::Nak);
    response.options.set_server_identifier(server_ip);
    response.yiaddr = Ipv4Addr::UNSPECIFIED;
    response.ciaddr = Ipv4Addr::UNSPECIFIED;
    response
}

pub struct Engine<B, H> {
    backend: B,
    hooks: H,
    suspender: Suspender,
    config: EngineConfig,
}

impl<B: Backend, H: Hooks> Engine<B, H> {
    pub fn new(backend: B, hooks: H, suspender: Suspender, config: EngineConfig) -> Self {
        Self { backend, hooks, suspender, config }
    }

    /// Drains the queue's control-event equivalent of a `reload`: re-reads
    /// the backend's underlying store. The cache layer, if any, is wrapped
    /// into `B` itself and so is flushed transitively by its own
    /// `reinitialise`.
    pub fn reinitialise(&self) -> Result<(), BackendError> {
        self.backend.reinitialise()
    }

    /// Drives the suspender's ~1 Hz score decay and idle-entry eviction.
    /// Intended to be called from a dedicated tick thread.
    pub fn tick(&self) {
        self.suspender.tick();
    }

    /// Registers a decode failure against its source, for callers that
    /// can't reach `handle` because the datagram never parsed into a
    /// `Message` at all (section 7: "drop packet, mark source").
    pub fn mark_malformed(&self, mac: MacAddr, relay_ip: Ipv4Addr) {
        self.suspender.block(SourceKey::new(mac, relay_ip));
    }

    pub fn handle(&self, request: &Message, ctx: &RequestContext) -> Outcome {
        let mac = request.chaddr;
        let key = SourceKey::new(mac, request.giaddr);

        if matches!(self.suspender.state(key), SourceState::Throttled | SourceState::Blocked) {
            trace!("{mac} suspended, dropping request silently");
            return Outcome::Silent;
        }

        let Some(message_type) = request.message_type() else {
            warn!("{mac}: request carries no message type, dropping and marking source");
            self.suspender.block(key);
            return Outcome::Silent;
        };

        if self.suspender.record_request(key) == SourceState::Throttled {
            return Outcome::Silent;
        }

        match self.call_filter(request, mac, request.ciaddr, request.giaddr, ctx.port) {
            FilterDecision::Reject => {
                self.suspender.block(key);
                return Outcome::Silent;
            }
            FilterDecision::Ignore => return Outcome::Silent,
            FilterDecision::Accept => {}
        }

        let meta = PacketMeta {
            message_type,
            ciaddr: request.ciaddr,
            relay_ip: request.giaddr,
            port: ctx.port,
        };

        let resolution = match resolve(&self.backend, &self.hooks, mac, &meta) {
            Ok(r) => r,
            Err(e) => {
                error!("{mac}: backend error during resolution: {e}");
                return Outcome::Silent;
            }
        };

        if matches!(resolution, Resolution::Unknown) {
            self.suspender.block_unauthorized(key);
        }

        let response = match message_type {
            MessageType::Discover => self.handle_discover(request, &resolution),
            MessageType::Request => {
                let sub_state = classify_request(request, ctx.received_broadcast);
                self.handle_request(request, &resolution, sub_state)
            }
            MessageType::Inform => self.handle_inform(request, &resolution),
            MessageType::Decline | MessageType::Release => {
                debug!("{mac}: observed {message_type:?}, no response due");
                None
            }
            _ => {
                debug!("{mac}: ignoring server-originated message type {message_type:?}");
                None
            }
        };

        let Some(mut response) = response else { return Outcome::Silent };

        let definition = match &resolution {
            Resolution::Known(d) => Some(d),
            Resolution::Unknown => None,
        };

        if self.call_load(&mut response, message_type, mac, definition, request.giaddr, ctx.port, ctx.source)
            == LoadDecision::Reject
        {
            return Outcome::Silent;
        }

        let is_nak = response.options.message_type() == Some(MessageType::Nak);

        let target = choose_tx_mode(
            request.giaddr,
            request.ciaddr,
            request.broadcast,
            is_nak,
            mac.octets(),
            response.yiaddr,
        );

        Outcome::Send(response, target)
    }

    fn handle_discover(&self, request: &Message, resolution: &Resolution) -> Option<Message> {
        let Resolution::Known(definition) = resolution else {
            // DHCP forbids NAKing a DISCOVER even in authoritative mode.
            return None;
        };

        let mut response = request.new_reply();
        response.options.set_message_type(MessageType::Offer);
        response.yiaddr = definition.ip;
        apply_definition(&mut response, self.config.server_ip, definition);
        apply_lease(&mut response, definition.lease_time_secs);

        Some(response)
    }

    fn handle_request(
        &self,
        request: &Message,
        resolution: &Resolution,
        sub_state: RequestSubState,
    ) -> Option<Message> {
        if self.config.nak_renewals
            && matches!(sub_state, RequestSubState::Renewing | RequestSubState::Rebinding)
        {
            return Some(nak(request, self.config.server_ip));
        }

        let Resolution::Known(definition) = resolution else {
            return if self.config.authoritative {
                Some(nak(request, self.config.server_ip))
            } else {
                None
            };
        };

        if sub_state == RequestSubState::Selecting {
            let server_id = request.options.server_identifier();
            if server_id != Some(self.config.server_ip) {
                // A SELECTING REQUEST naming a different server is not
                // addressed to us.
                return None;
            }

            let requested = request.options.requested_ip_address();
            return if requested == Some(definition.ip) {
                Some(self.ack(request, definition))
            } else {
                Some(nak(request, self.config.server_ip))
            };
        }

        let claimed = request
            .options
            .requested_ip_address()
            .or(Some(request.ciaddr).filter(|ip| !ip.is_unspecified()));

        if claimed == Some(definition.ip) {
            Some(self.ack(request, definition))
        } else if self.config.authoritative {
            Some(nak(request, self.config.server_ip))
        } else {
            None
        }
    }

    fn handle_inform(&self, request: &Message, resolution: &Resolution) -> Option<Message> {
        let Resolution::Known(definition) = resolution else { return None };

        let mut response = request.new_reply();
        response.options.set_message_type(MessageType::Ack);
        response.yiaddr = Ipv4Addr::UNSPECIFIED;
        apply_definition(&mut response, self.config.server_ip, definition);
        // INFORM carries no lease: the client already has its address.
        response.options.delete(codes::IP_ADDRESS_LEASE_TIME);
        response.options.delete(codes::RENEWAL_TIME_T1);
        response.options.delete(codes::REBINDING_TIME_T2);

        Some(response)
    }

    fn ack(&self, request: &Message, definition: &Definition) -> Message {
        let mut response = request.new_reply();
        response.options.set_message_type(MessageType::Ack);
        response.yiaddr = definition.ip;
        apply_definition(&mut response, self.config.server_ip, definition);
        apply_lease(&mut response, definition.lease_time_secs);
        response
    }

    fn call_filter(
        &self,
        request: &Message,
        mac: MacAddr,
        ciaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        port: u16,
    ) -> FilterDecision {
        catch_unwind(AssertUnwindSafe(|| self.hooks.filter(request, mac, ciaddr, giaddr, port)))
            .unwrap_or_else(|_| {
                error!("{mac}: filter hook panicked, treating as reject");
                FilterDecision::Reject
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn call_load(
        &self,
        response: &mut Message,
        method: MessageType,
        mac: MacAddr,
        definition: Option<&Definition>,
        giaddr: Ipv4Addr,
        port: u16,
        source: SocketAddr,
    ) -> LoadDecision {
        catch_unwind(AssertUnwindSafe(|| {
            self.hooks.load(response, method, mac, definition, giaddr, port, source)
        }))
        .unwrap_or_else(|_| {
            error!("{mac}: load hook panicked, treating as reject");
            LoadDecision::Reject
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcp_backend::{BackendError, LookupResult};
    use dhcp_resolve::NoHooks;
    use std::net::Ipv4Addr;

    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

    struct StaticBackend(LookupResult);

    impl Backend for StaticBackend {
        fn lookup(&self, _mac: MacAddr) -> Result<LookupResult, BackendError> {
            Ok(self.0.clone())
        }
    }

    fn engine(result: LookupResult, authoritative: bool) -> Engine<StaticBackend, NoHooks> {
        Engine::new(
            StaticBackend(result),
            NoHooks,
            Suspender::new(dhcp_suspend::SuspendConfig::default()),
            EngineConfig { server_ip: SERVER_IP, authoritative, nak_renewals: false },
        )
    }

    fn discover(mac: MacAddr) -> Message {
        let mut msg = Message::new_request(mac, 1, 0, None);
        msg.options.set_message_type(MessageType::Discover);
        msg
    }

    fn ctx() -> RequestContext {
        RequestContext {
            source: "10.0.0.5:68".parse().unwrap(),
            port: 67,
            received_broadcast: true,
        }
    }

    fn definition() -> Definition {
        let mut d = Definition::new(Ipv4Addr::new(192, 168, 0, 197), 14400);
        d.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        d.gateways = vec![Ipv4Addr::new(192, 168, 0, 1)];
        d.domain_name_servers = vec![Ipv4Addr::new(192, 168, 0, 5)];
        d
    }

    #[test]
    fn known_mac_discover_yields_offer_with_full_definition() {
        let engine = engine(LookupResult::One(definition()), false);
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let request = discover(mac);

        let Outcome::Send(response, _) = engine.handle(&request, &ctx()) else {
            panic!("expected a response");
        };

        assert_eq!(response.options.message_type(), Some(MessageType::Offer));
        assert_eq!(response.yiaddr, Ipv4Addr::new(192, 168, 0, 197));
        assert_eq!(response.options.lease_time_secs(), Some(14400));
        assert_eq!(response.options.renewal_time_secs(), Some(7200));
        assert_eq!(response.options.rebinding_time_secs(), Some(12600));
        assert_eq!(response.options.server_identifier(), Some(SERVER_IP));
    }

    #[test]
    fn unknown_mac_discover_non_authoritative_is_silent() {
        let engine = engine(LookupResult::None, false);
        let request = discover(MacAddr([1, 2, 3, 4, 5, 6]));

        assert!(matches!(engine.handle(&request, &ctx()), Outcome::Silent));
    }

    #[test]
    fn unknown_mac_request_authoritative_naks() {
        let engine = engine(LookupResult::None, true);
        let mut request = Message::new_request(MacAddr([1, 2, 3, 4, 5, 6]), 2, 0, None);
        request.options.set_message_type(MessageType::Request);
        request.options.set_requested_ip_address(Ipv4Addr::new(10, 0, 0, 5));

        let Outcome::Send(response, _) = engine.handle(&request, &ctx()) else {
            panic!("expected a NAK");
        };

        assert_eq!(response.options.message_type(), Some(MessageType::Nak));
        assert_eq!(response.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(response.ciaddr, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn renew_to_wrong_address_naks() {
        let engine = engine(LookupResult::One(definition()), false);
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut request = Message::new_request(mac, 3, 0, Some(Ipv4Addr::new(10, 0, 0, 5)));
        request.options.set_message_type(MessageType::Request);

        let mut renew_ctx = ctx();
        renew_ctx.received_broadcast = false;

        let Outcome::Send(response, target) = engine.handle(&request, &renew_ctx) else {
            panic!("expected a NAK");
        };

        assert_eq!(response.options.message_type(), Some(MessageType::Nak));
        // A NAK is always broadcast when there's no relay, even to a client
        // that claimed a (wrong) ciaddr.
        assert_eq!(target, TxTarget::Broadcast);
    }

    #[test]
    fn inform_ack_carries_no_lease_time() {
        let engine = engine(LookupResult::One(definition()), false);
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut request = Message::new_request(mac, 4, 0, Some(Ipv4Addr::new(192, 168, 0, 197)));
        request.options.set_message_type(MessageType::Inform);

        let Outcome::Send(response, _) = engine.handle(&request, &ctx()) else {
            panic!("expected an ACK");
        };

        assert_eq!(response.options.message_type(), Some(MessageType::Ack));
        assert_eq!(response.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(response.options.lease_time_secs(), None);
    }

    #[test]
    fn nak_renewals_override_forces_nak_on_renew() {
        let mut engine = engine(LookupResult::One(definition()), false);
        engine.config.nak_renewals = true;

        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let mut request = Message::new_request(mac, 5, 0, Some(Ipv4Addr::new(192, 168, 0, 197)));
        request.options.set_message_type(MessageType::Request);

        let mut renew_ctx = ctx();
        renew_ctx.received_broadcast = false;

        let Outcome::Send(response, _) = engine.handle(&request, &renew_ctx) else {
            panic!("expected a forced NAK");
        };

        assert_eq!(response.options.message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn mark_malformed_suspends_the_source() {
        let engine = engine(LookupResult::One(definition()), false);
        let mac = MacAddr([9, 9, 9, 9, 9, 9]);

        engine.mark_malformed(mac, Ipv4Addr::UNSPECIFIED);

        let key = SourceKey::new(mac, Ipv4Addr::UNSPECIFIED);
        assert_eq!(engine.suspender.state(key), SourceState::Blocked);
    }

    #[test]
    fn decline_and_release_produce_no_response() {
        let engine = engine(LookupResult::One(definition()), true);
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut request = Message::new_request(mac, 6, 0, Some(Ipv4Addr::new(192, 168, 0, 197)));
        request.options.set_message_type(MessageType::Release);

        assert!(matches!(engine.handle(&request, &ctx()), Outcome::Silent));
    }
}
