//! The three user-callable extension points: filtering inbound requests,
//! synthesizing a `Definition` for an unknown client, and mutating the
//! response before it goes out. All three have a total default so an
//! embedder can opt into only the ones it needs.

use std::net::{Ipv4Addr, SocketAddr};

use dhcp_backend::Definition;
use dhcp_resolve::DefinitionHooks;
use dhcp_wire::{MacAddr, Message, MessageType};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FilterDecision {
    Accept,
    Reject,
    Ignore,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LoadDecision {
    Accept,
    Reject,
}

/// Extends [`DefinitionHooks`] (the resolver's two extension points) with
/// the request-level filter and the response-mutating `load` hook, so a
/// single implementation can be handed to both the resolver and the
/// engine's decision matrix.
pub trait Hooks: DefinitionHooks {
    fn filter(
        &self,
        request: &Message,
        mac: MacAddr,
        ciaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        port: u16,
    ) -> FilterDecision {
        let _ = (request, mac, ciaddr, giaddr, port);
        FilterDecision::Accept
    }

    fn load(
        &self,
        response: &mut Message,
        method: MessageType,
        mac: MacAddr,
        definition: Option<&Definition>,
        giaddr: Ipv4Addr,
        port: u16,
        source: SocketAddr,
    ) -> LoadDecision {
        let _ = (response, method, mac, definition, giaddr, port, source);
        LoadDecision::Accept
    }
}

impl Hooks for dhcp_resolve::NoHooks {}
