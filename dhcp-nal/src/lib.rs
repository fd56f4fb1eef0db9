#![allow(async_fn_in_trait)]

//! Transport-level traits consumed by `dhcp-net`.
//!
//! Kept deliberately narrow: a DHCP server only ever needs to receive/send UDP
//! datagrams on a handful of bound ports, plus (for the layer-2 fallback path)
//! raw Ethernet frames on one interface. Everything else a general-purpose
//! network-abstraction crate would carry (TCP, DNS, multicast group
//! management) is irrelevant here and has been left out.

pub use raw::*;
pub use udp::*;

mod raw;
mod udp;
