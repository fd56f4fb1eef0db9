//! Per-source flood/misbehaviour tracking. Every handled request bumps a
//! score for its source; a ticker decays scores over time; sources that
//! cross a threshold are throttled, and sources explicitly marked bad
//! (failed decode, denied by a hook) are blocked outright for a cooldown.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use dhcp_wire::MacAddr;
use log::debug;

/// Identifies a request source for suspension purposes: the client MAC
/// combined with the relaying gateway, if any (two clients behind
/// different relays, or the same client switching relays, are tracked
/// separately).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SourceKey {
    pub mac: MacAddr,
    pub relay_ip: Ipv4Addr,
}

impl SourceKey {
    pub fn new(mac: MacAddr, relay_ip: Ipv4Addr) -> Self {
        Self { mac, relay_ip }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SourceState {
    Allowed,
    Throttled,
    Blocked,
}

#[derive(Clone, Debug)]
pub struct SuspendConfig {
    pub enabled: bool,
    pub suspend_threshold: i32,
    pub misbehaving_timeout: Duration,
    pub unauthorized_client_timeout: Duration,
}

impl Default for SuspendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suspend_threshold: 10,
            misbehaving_timeout: Duration::from_secs(150),
            unauthorized_client_timeout: Duration::from_secs(60),
        }
    }
}

struct Entry {
    score: AtomicI32,
    blocked_until: Mutex<Option<Instant>>,
}

impl Entry {
    fn new() -> Self {
        Self { score: AtomicI32::new(0), blocked_until: Mutex::new(None) }
    }

    fn state(&self, threshold: i32) -> SourceState {
        if let Ok(mut guard) = self.blocked_until.lock() {
            if let Some(until) = *guard {
                if Instant::now() < until {
                    return SourceState::Blocked;
                }
                *guard = None;
            }
        }

        if self.score.load(Ordering::SeqCst) > threshold {
            SourceState::Throttled
        } else {
            SourceState::Allowed
        }
    }

    fn is_idle(&self) -> bool {
        self.score.load(Ordering::SeqCst) == 0
            && self.blocked_until.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

pub struct Suspender {
    config: SuspendConfig,
    sources: RwLock<HashMap<SourceKey, Entry>>,
}

impl Suspender {
    pub fn new(config: SuspendConfig) -> Self {
        Self { config, sources: RwLock::new(HashMap::new()) }
    }

    /// Looks up the current state of `key` without affecting its score.
    pub fn state(&self, key: SourceKey) -> SourceState {
        if !self.config.enabled {
            return SourceState::Allowed;
        }

        match self.sources.read().unwrap().get(&key) {
            Some(entry) => entry.state(self.config.suspend_threshold),
            None => SourceState::Allowed,
        }
    }

    /// Records a handled request from `key`, incrementing its score by
    /// one, and returns the state that results.
    pub fn record_request(&self, key: SourceKey) -> SourceState {
        if !self.config.enabled {
            return SourceState::Allowed;
        }

        let state = {
            let sources = self.sources.read().unwrap();
            if let Some(entry) = sources.get(&key) {
                entry.score.fetch_add(1, Ordering::SeqCst);
                entry.state(self.config.suspend_threshold)
            } else {
                drop(sources);
                let mut sources = self.sources.write().unwrap();
                let entry = sources.entry(key).or_insert_with(Entry::new);
                entry.score.fetch_add(1, Ordering::SeqCst);
                entry.state(self.config.suspend_threshold)
            }
        };

        if state == SourceState::Throttled {
            debug!("source {:?} throttled", key);
        }

        state
    }

    /// Explicitly marks `key` as misbehaving (bad decode, a hook denying
    /// the request): blocked for `misbehaving_timeout`.
    pub fn block(&self, key: SourceKey) {
        self.block_for(key, self.config.misbehaving_timeout);
    }

    /// Marks `key` blocked for `unauthorized_client_timeout`, the penalty
    /// for an unknown-MAC response.
    pub fn block_unauthorized(&self, key: SourceKey) {
        self.block_for(key, self.config.unauthorized_client_timeout);
    }

    fn block_for(&self, key: SourceKey, duration: Duration) {
        if !self.config.enabled {
            return;
        }

        let until = Instant::now() + duration;
        let sources = self.sources.read().unwrap();
        if let Some(entry) = sources.get(&key) {
            *entry.blocked_until.lock().unwrap() = Some(until);
            return;
        }
        drop(sources);

        let mut sources = self.sources.write().unwrap();
        let entry = sources.entry(key).or_insert_with(Entry::new);
        *entry.blocked_until.lock().unwrap() = Some(until);
    }

    /// Decrements every nonzero score by one and evicts sources that have
    /// gone fully idle. Intended to be called from a dedicated tick thread
    /// at roughly 1 Hz.
    pub fn tick(&self) {
        if !self.config.enabled {
            return;
        }

        let sources = self.sources.read().unwrap();
        for entry in sources.values() {
            let _ = entry.score.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                if s > 0 {
                    Some(s - 1)
                } else {
                    None
                }
            });
        }
        drop(sources);

        self.sources.write().unwrap().retain(|_, entry| !entry.is_idle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SourceKey {
        SourceKey::new(MacAddr([0, 1, 2, 3, 4, 5]), Ipv4Addr::UNSPECIFIED)
    }

    #[test]
    fn source_sending_past_threshold_is_throttled() {
        let suspender = Suspender::new(SuspendConfig { suspend_threshold: 3, ..SuspendConfig::default() });

        for _ in 0..3 {
            assert_eq!(suspender.record_request(key()), SourceState::Allowed);
        }
        assert_eq!(suspender.record_request(key()), SourceState::Throttled);
    }

    #[test]
    fn ticking_below_threshold_restores_allowed() {
        let suspender = Suspender::new(SuspendConfig { suspend_threshold: 1, ..SuspendConfig::default() });

        suspender.record_request(key());
        assert_eq!(suspender.record_request(key()), SourceState::Throttled);

        suspender.tick();
        suspender.tick();
        assert_eq!(suspender.state(key()), SourceState::Allowed);
    }

    #[test]
    fn blocked_source_stays_blocked_until_timeout_elapses() {
        let suspender = Suspender::new(SuspendConfig {
            misbehaving_timeout: Duration::from_millis(20),
            ..SuspendConfig::default()
        });

        suspender.block(key());
        assert_eq!(suspender.state(key()), SourceState::Blocked);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(suspender.state(key()), SourceState::Allowed);
    }

    #[test]
    fn disabled_suspender_always_allows() {
        let suspender = Suspender::new(SuspendConfig { enabled: false, ..SuspendConfig::default() });

        for _ in 0..100 {
            assert_eq!(suspender.record_request(key()), SourceState::Allowed);
        }
    }

    #[test]
    fn idle_sources_are_evicted_on_tick() {
        let suspender = Suspender::new(SuspendConfig::default());
        suspender.record_request(key());

        suspender.tick();
        assert_eq!(suspender.sources.read().unwrap().len(), 0);
    }
}
