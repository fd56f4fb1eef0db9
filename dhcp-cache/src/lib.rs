//! A memoizing `Backend` decorator: wraps a real backend and short-circuits
//! repeated lookups for the same MAC, optionally backed by an on-disk
//! table and a separate persistent fallback store consulted only when the
//! wrapped backend is unavailable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

use dhcp_backend::{Backend, BackendError, LookupResult};
use dhcp_wire::MacAddr;
use log::{debug, error, warn};
use redb::{Database, ReadableTable, TableDefinition};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dhcp_cache");

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Back the cache table with an on-disk `redb` database instead of an
    /// in-memory map. Requires `cache_path`.
    pub on_disk: bool,
    pub cache_path: Option<PathBuf>,
    /// Preserved across restarts and consulted as a degraded fallback when
    /// the wrapped backend is `Unavailable`.
    pub persistent_path: Option<PathBuf>,
    /// Negative results (`LookupResult::None`) are not cached unless this
    /// is set, since an unknown MAC may be provisioned at any moment.
    pub negative_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_disk: false,
            cache_path: None,
            persistent_path: None,
            negative_ttl: None,
        }
    }
}

struct Entry {
    result: LookupResult,
    inserted_at: SystemTime,
}

enum Store {
    Memory(RwLock<HashMap<MacAddr, Entry>>),
    Disk(Mutex<Database>),
}

impl Store {
    fn open(config: &CacheConfig) -> Result<Self, BackendError> {
        if !config.on_disk {
            return Ok(Self::Memory(RwLock::new(HashMap::new())));
        }

        let path = config
            .cache_path
            .as_ref()
            .ok_or(BackendError::Invalid)?;

        let db = Database::create(path).map_err(|e| {
            error!("failed to open on-disk cache at {}: {e}", path.display());
            BackendError::Unavailable
        })?;

        Ok(Self::Disk(Mutex::new(db)))
    }

    fn get(&self, mac: MacAddr) -> Option<(LookupResult, SystemTime)> {
        match self {
            Self::Memory(map) => map
                .read()
                .ok()?
                .get(&mac)
                .map(|e| (e.result.clone(), e.inserted_at)),
            Self::Disk(db) => {
                let db = db.lock().ok()?;
                let txn = db.begin_read().ok()?;
                let table = txn.open_table(TABLE).ok()?;
                let guard = table.get(mac.to_string().as_str()).ok()??;
                decode(guard.value())
            }
        }
    }

    fn set(&self, mac: MacAddr, result: LookupResult, now: SystemTime) {
        match self {
            Self::Memory(map) => {
                if let Ok(mut map) = map.write() {
                    map.insert(mac, Entry { result, inserted_at: now });
                }
            }
            Self::Disk(db) => {
                if let Err(e) = write_entry(db, &mac, &result, now) {
                    warn!("failed to persist cache entry for {mac}: {e}");
                }
            }
        }
    }

    /// Drops every cached entry, as happens on `reinitialise`.
    fn flush(&self) {
        match self {
            Self::Memory(map) => {
                if let Ok(mut map) = map.write() {
                    map.clear();
                }
            }
            Self::Disk(db) => {
                let Ok(db) = db.lock() else { return };
                let Ok(txn) = db.begin_write() else { return };
                let _ = txn.delete_table(TABLE);
                let _ = txn.commit();
            }
        }
    }
}

fn write_entry(
    db: &Mutex<Database>,
    mac: &MacAddr,
    result: &LookupResult,
    now: SystemTime,
) -> Result<(), String> {
    let db = db.lock().map_err(|e| e.to_string())?;
    let txn = db.begin_write().map_err(|e| e.to_string())?;
    {
        let mut table = txn.open_table(TABLE).map_err(|e| e.to_string())?;
        let bytes = encode(result, now).map_err(|e| e.to_string())?;
        table
            .insert(mac.to_string().as_str(), bytes.as_slice())
            .map_err(|e| e.to_string())?;
    }
    txn.commit().map_err(|e| e.to_string())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredEntry {
    result: LookupResult,
    inserted_at_secs: u64,
}

fn encode(result: &LookupResult, now: SystemTime) -> Result<Vec<u8>, serde_json::Error> {
    let inserted_at_secs = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    serde_json::to_vec(&StoredEntry { result: result.clone(), inserted_at_secs })
}

fn decode(bytes: &[u8]) -> Option<(LookupResult, SystemTime)> {
    let stored: StoredEntry = serde_json::from_slice(bytes).ok()?;
    let inserted_at = std::time::UNIX_EPOCH + Duration::from_secs(stored.inserted_at_secs);
    Some((stored.result, inserted_at))
}

/// Wraps `B` with the caching semantics described on [`CacheConfig`].
pub struct Cache<B> {
    inner: B,
    config: CacheConfig,
    store: Store,
    persistent: Option<Mutex<Database>>,
}

impl<B: Backend> Cache<B> {
    pub fn new(inner: B, config: CacheConfig) -> Result<Self, BackendError> {
        let store = Store::open(&config)?;

        let persistent = match &config.persistent_path {
            Some(path) => {
                let db = Database::create(path).map_err(|e| {
                    error!(
                        "failed to open persistent fallback cache at {}: {e}",
                        path.display()
                    );
                    BackendError::Unavailable
                })?;
                Some(Mutex::new(db))
            }
            None => None,
        };

        Ok(Self { inner, config, store, persistent })
    }

    fn is_fresh(&self, result: &LookupResult, inserted_at: SystemTime) -> bool {
        if !result.is_empty() {
            // Positive entries never expire on their own; only a flush
            // (reinitialise) evicts them.
            return true;
        }

        match self.config.negative_ttl {
            Some(ttl) => inserted_at.elapsed().map(|age| age < ttl).unwrap_or(false),
            None => false,
        }
    }

    fn remember_positive(&self, mac: MacAddr, result: &LookupResult) {
        let Some(persistent) = &self.persistent else { return };
        if result.is_empty() {
            return;
        }

        if let Err(e) = write_entry(persistent, &mac, result, SystemTime::now()) {
            warn!("failed to update persistent fallback cache for {mac}: {e}");
        }
    }

    fn fallback(&self, mac: MacAddr) -> Option<LookupResult> {
        let persistent = self.persistent.as_ref()?;
        let db = persistent.lock().ok()?;
        let txn = db.begin_read().ok()?;
        let table = txn.open_table(TABLE).ok()?;
        let guard = table.get(mac.to_string().as_str()).ok()??;
        decode(guard.value()).map(|(result, _)| result)
    }
}

impl<B: Backend> Backend for Cache<B> {
    fn lookup(&self, mac: MacAddr) -> Result<LookupResult, BackendError> {
        if !self.config.enabled {
            return self.inner.lookup(mac);
        }

        if let Some((result, inserted_at)) = self.store.get(mac) {
            if self.is_fresh(&result, inserted_at) {
                debug!("cache hit for {mac}");
                return Ok(result);
            }
        }

        match self.inner.lookup(mac) {
            Ok(result) => {
                self.store.set(mac, result.clone(), SystemTime::now());
                self.remember_positive(mac, &result);
                Ok(result)
            }
            Err(BackendError::Unavailable) => {
                if let Some(result) = self.fallback(mac) {
                    error!("backend unavailable for {mac}, serving persistent fallback cache");
                    return Ok(result);
                }
                Err(BackendError::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    fn reinitialise(&self) -> Result<(), BackendError> {
        self.store.flush();
        self.inner.reinitialise()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcp_backend::Definition;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        result: LookupResult,
    }

    impl Backend for CountingBackend {
        fn lookup(&self, _mac: MacAddr) -> Result<LookupResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    fn mac() -> MacAddr {
        MacAddr([0, 1, 2, 3, 4, 5])
    }

    #[test]
    fn positive_lookup_is_served_from_memory_on_second_call() {
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::One(Definition::new(Ipv4Addr::new(10, 0, 0, 1), 3600)),
        };
        let cache = Cache::new(backend, CacheConfig { enabled: true, ..Default::default() }).unwrap();

        cache.lookup(mac()).unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn negative_lookup_is_not_cached_without_ttl() {
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::None,
        };
        let cache = Cache::new(backend, CacheConfig { enabled: true, ..Default::default() }).unwrap();

        cache.lookup(mac()).unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn negative_lookup_is_cached_when_ttl_configured() {
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::None,
        };
        let cache = Cache::new(
            backend,
            CacheConfig {
                enabled: true,
                negative_ttl: Some(Duration::from_secs(60)),
                ..Default::default()
            },
        )
        .unwrap();

        cache.lookup(mac()).unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reinitialise_flushes_cached_entries() {
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::One(Definition::new(Ipv4Addr::new(10, 0, 0, 1), 3600)),
        };
        let cache = Cache::new(backend, CacheConfig { enabled: true, ..Default::default() }).unwrap();

        cache.lookup(mac()).unwrap();
        cache.reinitialise().unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_cache_always_calls_through() {
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::One(Definition::new(Ipv4Addr::new(10, 0, 0, 1), 3600)),
        };
        let cache = Cache::new(backend, CacheConfig::default()).unwrap();

        cache.lookup(mac()).unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn on_disk_cache_persists_within_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            enabled: true,
            on_disk: true,
            cache_path: Some(dir.path().join("cache.redb")),
            ..Default::default()
        };

        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            result: LookupResult::One(Definition::new(Ipv4Addr::new(10, 0, 0, 2), 1800)),
        };
        let cache = Cache::new(backend, config).unwrap();

        cache.lookup(mac()).unwrap();
        cache.lookup(mac()).unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 1);
    }
}
