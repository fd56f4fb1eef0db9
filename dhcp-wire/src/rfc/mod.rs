//! Structured encode/decode for the handful of DHCP options whose payload
//! is itself a small TLV or tuple format rather than a flat list of a single
//! primitive type.

pub mod rfc3046;
pub mod rfc3361;
pub mod rfc3397;
pub mod rfc3442;
pub mod rfc3925;
pub mod rfc4174;
pub mod rfc4280;
pub mod rfc5223;
pub mod rfc5678;
