use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    model::{Constraints, SessionId},
    results::{AgentResult, ResearchFinding},
};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a research finding.
    #[must_use]
    pub fn research(constraints: &Constraints) -> Self {
        Self(format!("research:{}", constraints.fingerprint()))
    }

    /// Key for a route plan built from a finding.
    #[must_use]
    pub fn route(constraints: &Constraints, finding: &ResearchFinding) -> Self {
        Self(format!(
            "route:{}:{}",
            constraints.fingerprint(),
            finding.fingerprint()
        ))
    }

    /// Key for session-scoped analytics.
    #[must_use]
    pub fn analytics(session: SessionId) -> Self {
        Self(format!("analytics:{session}"))
    }

    /// Raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored value plus its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached payload.
    pub payload: V,
    /// Instant from which the entry counts as a miss.
    pub expires_at: DateTime<Utc>,
}

/// Usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries purged because they had expired.
    pub expirations: u64,
    /// Entries written.
    pub writes: u64,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory key/value store with per-entry expiry and lazy eviction.
///
/// Entries are replaced wholesale on `put`; a payload is never mutated in
/// place. Safe to share between concurrently running sessions.
pub struct CacheStore<V = AgentResult> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    stats: Mutex<CacheStats>,
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.read().len())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl<V: Clone> CacheStore<V> {
    /// Creates a store using the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store using a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub fn put(&self, key: CacheKey, value: V, ttl: Duration) {
        let expires_at = add_duration(self.clock.now(), ttl);
        self.entries.write().insert(
            key,
            CacheEntry {
                payload: value,
                expires_at,
            },
        );
        self.stats.lock().writes += 1;
    }

    /// Returns the live value under `key`. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.stats.lock().hits += 1;
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
                None => {
                    self.stats.lock().misses += 1;
                    return None;
                }
            }
        }
        let mut entries = self.entries.write();
        // Another writer may have refreshed the entry between the two locks.
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                self.stats.lock().hits += 1;
                return Some(entry.payload.clone());
            }
            entries.remove(key);
            let mut stats = self.stats.lock();
            stats.expirations += 1;
            stats.misses += 1;
            return None;
        }
        self.stats.lock().misses += 1;
        None
    }

    /// Drops the entry under `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        self.stats.lock().expirations += purged as u64;
        purged
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Usage counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<ManualClock>, CacheStore<String>) {
        let clock = Arc::new(ManualClock::default());
        let store = CacheStore::with_clock(clock.clone());
        (clock, store)
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey(raw.into())
    }

    #[test]
    fn returns_value_until_ttl_elapses() {
        let (clock, store) = store();
        store.put(key("k"), "v".into(), Duration::from_secs(300));
        assert_eq!(store.get(&key("k")).as_deref(), Some("v"));
        clock.advance(Duration::from_secs(299));
        assert_eq!(store.get(&key("k")).as_deref(), Some("v"));
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get(&key("k")), None);
        assert!(store.is_empty(), "expired entry must be purged on read");
        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn put_replaces_previous_generation() {
        let (clock, store) = store();
        store.put(key("k"), "old".into(), Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        store.put(key("k"), "new".into(), Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        assert_eq!(store.get(&key("k")).as_deref(), Some("new"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_and_invalidate() {
        let (clock, store) = store();
        store.put(key("a"), "1".into(), Duration::from_secs(1));
        store.put(key("b"), "2".into(), Duration::from_secs(100));
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.invalidate(&key("b")));
        assert!(!store.invalidate(&key("b")));
        assert_eq!(store.get(&key("missing")), None);
        assert!(store.stats().hit_rate() < f64::EPSILON);
    }
}
