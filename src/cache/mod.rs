//! Time-bounded response cache with lazy expiry, capacity eviction and
//! optional persistence through a [`KeyValueStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::config::CacheSettings;

pub mod key;
mod persist;
pub mod store;
pub mod ttl;

pub use key::{canonicalize, CacheKey};
use persist::{PendingWrite, Persister};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use ttl::{ttl_for, TtlPolicy, MAX_TTL_MS, MIN_TTL_MS};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub created_at: i64,
    pub ttl_ms: u64,
    pub provider: String,
    pub endpoint: String,
    pub args: Value,
    pub args_fingerprint: String,
}

impl CacheEntry {
    pub fn expires_at(&self) -> i64 {
        self.created_at.saturating_add(self.ttl_ms as i64)
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.expires_at()
    }
}

/// Diagnostic view of one entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetadata {
    pub key: String,
    pub created_at: i64,
    pub provider: String,
    pub endpoint: String,
    pub args: Value,
    pub ttl_ms: u64,
    pub expires_at: i64,
    pub age_ms: i64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    /// Bytes of the serialized payloads.
    pub total_size: usize,
    pub provider_stats: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(Value),
    Stale,
    Miss,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    policy: TtlPolicy,
}

pub struct ResponseCache {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
    persister: Option<Arc<Persister>>,
    namespace: String,
}

impl ResponseCache {
    /// In-memory cache with no persistence.
    pub fn new(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                max_entries: settings.max_entries.max(1),
                policy: TtlPolicy::from(settings),
            }),
            clock,
            persister: None,
            namespace: settings.namespace.clone(),
        }
    }

    /// Cache backed by `store`, restoring whatever snapshot it holds.
    pub fn with_store(
        settings: &CacheSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let mut cache = Self::new(settings, clock);
        let restored = load_snapshot(store.as_ref(), &cache.namespace);
        if !restored.is_empty() {
            debug!("Restored {} cache entries from storage", restored.len());
        }
        cache.lock_state().entries = restored
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        cache.persister = Some(Arc::new(Persister::new(store, cache.namespace.clone())));
        cache
    }

    /// Startup sweep of entries that expired while the process was not running.
    pub fn initialize(&self) -> usize {
        let removed = self.clear_expired();
        if removed > 0 {
            info!("Dropped {removed} expired cache entries at startup");
        }
        removed
    }

    /// Update the capacity and TTL bounds; shrinking evicts immediately.
    pub fn configure(&self, settings: &CacheSettings) {
        let mut state = self.lock_state();
        state.max_entries = settings.max_entries.max(1);
        state.policy = TtlPolicy::from(settings);
        if evict_over_capacity(&mut state) > 0 {
            self.persist(&state);
        }
    }

    /// Fresh payload for `key`. An expired entry is deleted on the way out.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let id = key.to_string();
        let now = self.clock.now_ms();
        let mut state = self.lock_state();

        let fresh = match state.entries.get(&id) {
            Some(entry) => entry.is_fresh(now),
            None => {
                debug!("Cache miss for {id}");
                return None;
            }
        };

        if fresh {
            debug!("Cache hit for {id}");
            state.entries.get(&id).map(|entry| entry.payload.clone())
        } else {
            debug!("Cache entry {id} expired");
            state.entries.remove(&id);
            self.persist(&state);
            None
        }
    }

    /// Freshness check that leaves expired entries in place for a later [`Self::get_stale`].
    pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let now = self.clock.now_ms();
        match self.lock_state().entries.get(&key.to_string()) {
            Some(entry) if entry.is_fresh(now) => CacheLookup::Fresh(entry.payload.clone()),
            Some(_) => CacheLookup::Stale,
            None => CacheLookup::Miss,
        }
    }

    /// Payload for `key` whether or not it is still fresh.
    pub fn get_stale(&self, key: &CacheKey) -> Option<Value> {
        self.lock_state()
            .entries
            .get(&key.to_string())
            .map(|entry| entry.payload.clone())
    }

    pub fn set(&self, key: &CacheKey, payload: Value, ttl: Duration) {
        let id = key.to_string();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = CacheEntry {
            key: id.clone(),
            payload,
            created_at: self.clock.now_ms(),
            ttl_ms,
            provider: key.provider.clone(),
            endpoint: key.endpoint.clone(),
            args: key.args.clone(),
            args_fingerprint: key.fingerprint.clone(),
        };

        let now = entry.created_at;
        let mut state = self.lock_state();
        state.entries.insert(id.clone(), entry);
        let swept = sweep_expired(&mut state, now);
        let evicted = evict_over_capacity(&mut state);
        info!("Cached {id} for {ttl_ms} ms");
        if swept + evicted > 0 {
            debug!("Cache write removed {swept} expired and {evicted} evicted entries");
        }
        self.persist(&state);
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        if let Some(persister) = &self.persister {
            persister.submit(PendingWrite::Remove);
        }
    }

    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.lock_state();
        let removed = sweep_expired(&mut state, now);
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    pub fn clear_by_provider(&self, provider: &str) -> usize {
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.provider != provider);
        let removed = before - state.entries.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    pub fn metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
        let now = self.clock.now_ms();
        let state = self.lock_state();
        state.entries.get(&key.to_string()).map(|entry| CacheMetadata {
            key: entry.key.clone(),
            created_at: entry.created_at,
            provider: entry.provider.clone(),
            endpoint: entry.endpoint.clone(),
            args: entry.args.clone(),
            ttl_ms: entry.ttl_ms,
            expires_at: entry.expires_at(),
            age_ms: now.saturating_sub(entry.created_at),
            is_stale: !entry.is_fresh(now),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let state = self.lock_state();
        let mut stats = CacheStats {
            total_entries: state.entries.len(),
            ..CacheStats::default()
        };

        for entry in state.entries.values() {
            if entry.is_fresh(now) {
                stats.active_entries += 1;
            } else {
                stats.expired_entries += 1;
            }
            stats.total_size += entry.payload.to_string().len();
            *stats
                .provider_stats
                .entry(entry.provider.clone())
                .or_default() += 1;
        }
        stats
    }

    pub fn ttl_for(&self, provider: &str, endpoint: &str) -> Duration {
        Duration::from_millis(self.lock_state().policy.ttl_ms(provider, endpoint))
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until every queued snapshot write has reached the store.
    pub fn flush(&self) {
        if let Some(persister) = &self.persister {
            persister.drain();
        }
    }

    /// Serialize under the state lock; the store write itself happens in [`Persister`].
    fn persist(&self, state: &CacheState) {
        let Some(persister) = &self.persister else {
            return;
        };
        if persister.is_degraded() {
            return;
        }

        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };

        match serde_json::to_string(&snapshot) {
            Ok(json) => persister.submit(PendingWrite::Snapshot(json)),
            Err(err) => warn!("Could not serialize cache snapshot: {err}"),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_snapshot(store: &dyn KeyValueStore, namespace: &str) -> Vec<CacheEntry> {
    let raw = match store.get_item(namespace) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!("Failed to read persisted cache, starting empty: {err}");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Snapshot>(&raw) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.entries,
        Ok(snapshot) => {
            warn!(
                "Ignoring persisted cache with unsupported version {}",
                snapshot.version
            );
            Vec::new()
        }
        Err(err) => {
            warn!("Failed to parse persisted cache, starting empty: {err}");
            Vec::new()
        }
    }
}

fn sweep_expired(state: &mut CacheState, now: i64) -> usize {
    let before = state.entries.len();
    state.entries.retain(|_, entry| entry.is_fresh(now));
    before - state.entries.len()
}

fn evict_over_capacity(state: &mut CacheState) -> usize {
    let overflow = state.entries.len().saturating_sub(state.max_entries);
    if overflow == 0 {
        return 0;
    }

    let mut order: Vec<(i64, i64, String)> = state
        .entries
        .values()
        .map(|entry| (entry.expires_at(), entry.created_at, entry.key.clone()))
        .collect();
    order.sort();

    for (_, _, key) in order.into_iter().take(overflow) {
        state.entries.remove(&key);
    }
    overflow
}
