//! Glues a backend lookup to the two hook points that disambiguate a
//! multi-match result and synthesize a binding for an unknown client.

use std::net::Ipv4Addr;
use std::panic::{catch_unwind, AssertUnwindSafe};

use dhcp_backend::{Backend, BackendError, Definition, LookupResult};
use dhcp_wire::{MacAddr, MessageType};
use log::{error, warn};

/// The request-scoped facts the hooks need to make a decision, independent
/// of the full wire message.
#[derive(Copy, Clone, Debug)]
pub struct PacketMeta {
    pub message_type: MessageType,
    pub ciaddr: Ipv4Addr,
    pub relay_ip: Ipv4Addr,
    pub port: u16,
}

/// The two resolver-facing extension points. `dhcp-engine`'s `Hooks` trait
/// extends this one so the engine can hand a single hook implementation
/// down to both the resolver and its own decision matrix.
pub trait DefinitionHooks: Send + Sync {
    /// Called when the backend returned more than one `Definition` for a
    /// MAC; must reduce the list to at most one surviving candidate. The
    /// default keeps the first entry, which is the same precedence the
    /// registry-ordering invariant elsewhere in this codebase already
    /// relies on (first-wins on duplicates).
    fn filter_definitions(&self, definitions: &[Definition], meta: &PacketMeta) -> Option<Definition> {
        let _ = meta;
        definitions.first().cloned()
    }

    /// Called when the backend returned no `Definition` at all; may
    /// synthesize one for a dynamically-admitted client.
    fn handle_unknown_mac(&self, meta: &PacketMeta) -> Option<Definition> {
        let _ = meta;
        None
    }
}

/// A hooks implementation that never disambiguates beyond the default and
/// never admits unknown clients — the resolver's behavior with no
/// embedder-supplied policy at all.
#[derive(Default)]
pub struct NoHooks;

impl DefinitionHooks for NoHooks {}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Known(Definition),
    Unknown,
}

/// Resolves `mac` to a `Definition`, per the algorithm in the backend
/// interface's consuming component: backend lookup, hook-mediated
/// disambiguation of multi-matches, hook-mediated synthesis for unknown
/// clients.
pub fn resolve<B: Backend + ?Sized, H: DefinitionHooks + ?Sized>(
    backend: &B,
    hooks: &H,
    mac: MacAddr,
    meta: &PacketMeta,
) -> Result<Resolution, BackendError> {
    let result = backend.lookup(mac)?;

    let definition = match result {
        LookupResult::None => None,
        LookupResult::One(d) => Some(d),
        LookupResult::Many(ds) => {
            let chosen = catch_unwind(AssertUnwindSafe(|| hooks.filter_definitions(&ds, meta)))
                .unwrap_or_else(|_| {
                    error!("filter_definitions panicked for {mac}, treating as no survivor");
                    None
                });
            if chosen.is_none() {
                warn!("{mac} had {} candidate definitions, none survived disambiguation", ds.len());
            }
            chosen
        }
    };

    match definition {
        Some(d) => Ok(Resolution::Known(d)),
        None => {
            let synthesized = catch_unwind(AssertUnwindSafe(|| hooks.handle_unknown_mac(meta)))
                .unwrap_or_else(|_| {
                    error!("handle_unknown_mac panicked for {mac}, treating as unknown");
                    None
                });

            match synthesized {
                Some(d) => Ok(Resolution::Known(d)),
                None => Ok(Resolution::Unknown),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PacketMeta {
        PacketMeta {
            message_type: MessageType::Discover,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            relay_ip: Ipv4Addr::UNSPECIFIED,
            port: 67,
        }
    }

    fn def(last_octet: u8) -> Definition {
        Definition::new(Ipv4Addr::new(10, 0, 0, last_octet), 3600)
    }

    struct StubBackend(LookupResult);

    impl Backend for StubBackend {
        fn lookup(&self, _mac: MacAddr) -> Result<LookupResult, BackendError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn single_match_resolves_directly() {
        let backend = StubBackend(LookupResult::One(def(1)));
        let resolved = resolve(&backend, &NoHooks, MacAddr([0; 6]), &meta()).unwrap();
        assert_eq!(resolved, Resolution::Known(def(1)));
    }

    #[test]
    fn no_match_with_no_hook_is_unknown() {
        let backend = StubBackend(LookupResult::None);
        let resolved = resolve(&backend, &NoHooks, MacAddr([0; 6]), &meta()).unwrap();
        assert_eq!(resolved, Resolution::Unknown);
    }

    #[test]
    fn multi_match_defaults_to_first_entry() {
        let backend = StubBackend(LookupResult::Many(vec![def(1), def(2)]));
        let resolved = resolve(&backend, &NoHooks, MacAddr([0; 6]), &meta()).unwrap();
        assert_eq!(resolved, Resolution::Known(def(1)));
    }

    #[test]
    fn unknown_mac_hook_can_synthesize_a_definition() {
        struct SynthesizeHook;
        impl DefinitionHooks for SynthesizeHook {
            fn handle_unknown_mac(&self, _meta: &PacketMeta) -> Option<Definition> {
                Some(def(99))
            }
        }

        let backend = StubBackend(LookupResult::None);
        let resolved = resolve(&backend, &SynthesizeHook, MacAddr([0; 6]), &meta()).unwrap();
        assert_eq!(resolved, Resolution::Known(def(99)));
    }

    #[test]
    fn backend_error_propagates() {
        struct FailingBackend;
        impl Backend for FailingBackend {
            fn lookup(&self, _mac: MacAddr) -> Result<LookupResult, BackendError> {
                Err(BackendError::Unavailable)
            }
        }

        let err = resolve(&FailingBackend, &NoHooks, MacAddr([0; 6]), &meta()).unwrap_err();
        assert_eq!(err, BackendError::Unavailable);
    }
}
