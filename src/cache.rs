//! # Multi-Tier Cache
//!
//! Three independent keyed stores (pool/analysis, price, token) with per-key
//! TTLs, per-key single-flight locks for fill operations, and boundary-matched
//! invalidation of every entry touching a token address.
//!
//! The lock map holds wait-start timestamps; a waiter that has waited past the
//! configured timeout force-removes the lock entry and falls through to a
//! fresh read, so a wedged fetcher can never stall the key permanently.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::config::CacheSettings;
use crate::errors::CacheError;
use crate::types::{addr_key, AnalysisResult, Pool, RoutePlan, TokenInfo};
use ethers::types::Address;

//================================================================================================//
//                                       KEY VALIDATION                                           //
//================================================================================================//

static ADDRESS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex"));
static GENERIC_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_x]{1,100}$").expect("static regex"));

fn is_address_key(key: &str) -> bool {
    ADDRESS_KEY.is_match(key)
}

/// Pool-store keys: a bare address, a `v2_`/`v3_`/`pool_`/`analysis_`
/// prefixed address, or a `route_<a>_<b>` pair key.
fn is_pool_key(key: &str) -> bool {
    if !GENERIC_KEY.is_match(key) {
        return false;
    }
    if is_address_key(key) {
        return true;
    }
    for prefix in ["v2_", "v3_", "pool_", "analysis_"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            return is_address_key(rest);
        }
    }
    if let Some(rest) = key.strip_prefix("route_") {
        if let Some((a, b)) = rest.split_once('_') {
            return is_address_key(a) && is_address_key(b);
        }
    }
    false
}

/// True when `needle` appears in `key` as a full `_`-delimited segment.
fn contains_delimited(key: &str, needle: &str) -> bool {
    key.split('_').any(|segment| segment == needle)
}

//================================================================================================//
//                                           STORE                                                //
//================================================================================================//

#[derive(Clone)]
struct Entry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() > self.ttl
    }
}

/// Per-store counters reported by `cache_stats`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StoreStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// One keyed TTL store with per-key single-flight fill.
pub struct Store<V: Clone> {
    name: &'static str,
    entries: DashMap<String, Entry<V>>,
    locks: DashMap<String, Instant>,
    default_ttl: Duration,
    lock_timeout: Duration,
    validate: fn(&str) -> bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

impl<V: Clone> Store<V> {
    fn new(
        name: &'static str,
        default_ttl: Duration,
        lock_timeout: Duration,
        validate: fn(&str) -> bool,
    ) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            locks: DashMap::new(),
            default_ttl,
            lock_timeout,
            validate,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn check_key(&self, key: &str) -> Result<(), CacheError> {
        if (self.validate)(key) {
            Ok(())
        } else {
            Err(CacheError::InvalidKey {
                store: self.name,
                key: key.to_string(),
            })
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with_age(key).map(|(v, _)| v)
    }

    /// Fetch a live entry together with its age. Expired entries are removed
    /// on read and never returned.
    pub fn get_with_age(&self, key: &str) -> Option<(V, Duration)> {
        if self.check_key(key).is_err() {
            return None;
        }
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some((entry.value.clone(), entry.inserted.elapsed()));
            }
        }
        // Drop the read guard before removing.
        if self
            .entries
            .get(key)
            .map(|e| e.is_expired())
            .unwrap_or(false)
        {
            self.entries.remove(key);
            trace!(store = self.name, key, "expired entry evicted on read");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: &str, value: V) -> Result<(), CacheError> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    pub fn insert_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        self.check_key(key)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every entry whose key contains `needle` as a delimited segment.
    pub fn remove_matching(&self, needle: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| contains_delimited(e.key(), needle))
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }

    pub fn purge_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Read-through fill with per-key single-flight.
    ///
    /// Exactly one caller runs `fetch` per key at a time; concurrent callers
    /// poll for the filled value. A waiter that exceeds the lock timeout
    /// force-removes the lock entry, re-reads, and (if still empty) takes the
    /// lock over itself.
    pub async fn get_or_fill<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        let wait_start = Instant::now();
        loop {
            match self.locks.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(Instant::now());
                    break;
                }
                dashmap::mapref::entry::Entry::Occupied(_) => {}
            }
            if wait_start.elapsed() >= self.lock_timeout {
                debug!(store = self.name, key, "lock wait timed out, force-removing");
                self.locks.remove(key);
                if let Some(value) = self.get(key) {
                    return Ok(Some(value));
                }
                self.locks.insert(key.to_string(), Instant::now());
                break;
            }
            sleep(LOCK_POLL_INTERVAL).await;
            if let Some(value) = self.get(key) {
                return Ok(Some(value));
            }
        }

        // Re-read under the lock: another filler may have won the race
        // between our miss and our lock acquisition.
        if let Some(value) = self.get(key) {
            self.locks.remove(key);
            return Ok(Some(value));
        }

        let outcome = fetch().await;
        match &outcome {
            Ok(Some(value)) => {
                let _ = self.insert_with_ttl(key, value.clone(), ttl.unwrap_or(self.default_ttl));
            }
            Ok(None) => {
                trace!(store = self.name, key, "fetch produced no value, nothing cached");
            }
            Err(_) => {}
        }
        self.locks.remove(key);
        outcome
    }
}

//================================================================================================//
//                                       POOL STORE VALUE                                         //
//================================================================================================//

/// The pool store holds three shapes of entry under its key namespace:
/// reconstructed pools, full analysis results, and pre-warmed route plans.
#[derive(Clone, Debug)]
pub enum PoolEntry {
    Pool(Arc<Pool>),
    Analysis(Arc<AnalysisResult>),
    Routes(Arc<RoutePlan>),
}

impl PoolEntry {
    pub fn as_analysis(&self) -> Option<Arc<AnalysisResult>> {
        match self {
            Self::Analysis(a) => Some(a.clone()),
            _ => None,
        }
    }

    pub fn as_routes(&self) -> Option<Arc<RoutePlan>> {
        match self {
            Self::Routes(r) => Some(r.clone()),
            _ => None,
        }
    }
}

//================================================================================================//
//                                      ANALYTICS CACHE                                           //
//================================================================================================//

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub pools: StoreStats,
    pub prices: StoreStats,
    pub tokens: StoreStats,
}

/// The engine-wide cache: pool/analysis store, price store, token store.
pub struct AnalyticsCache {
    pub pools: Store<PoolEntry>,
    pub prices: Store<f64>,
    tokens: moka::future::Cache<String, TokenInfo>,
    token_hits: AtomicU64,
    token_misses: AtomicU64,
}

impl AnalyticsCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            pools: Store::new(
                "pool",
                settings.pool_ttl(),
                settings.lock_timeout(),
                is_pool_key,
            ),
            prices: Store::new(
                "price",
                settings.price_ttl(),
                settings.lock_timeout(),
                is_address_key,
            ),
            tokens: moka::future::Cache::builder()
                .max_capacity(50_000)
                .time_to_live(settings.token_ttl())
                .build(),
            token_hits: AtomicU64::new(0),
            token_misses: AtomicU64::new(0),
        }
    }

    pub fn analysis_key(token: Address) -> String {
        format!("analysis_{}", addr_key(token))
    }

    pub fn route_key(token_in: Address, token_out: Address) -> String {
        format!("route_{}_{}", addr_key(token_in), addr_key(token_out))
    }

    pub async fn token_get(&self, address: Address) -> Option<TokenInfo> {
        let hit = self.tokens.get(&addr_key(address)).await;
        match &hit {
            Some(_) => self.token_hits.fetch_add(1, Ordering::Relaxed),
            None => self.token_misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    pub async fn token_insert(&self, info: TokenInfo) {
        self.tokens.insert(addr_key(info.address), info).await;
    }

    pub async fn token_remove(&self, address: Address) {
        self.tokens.invalidate(&addr_key(address)).await;
    }

    /// Invalidate everything recorded about a token: its analysis entry, its
    /// token and price entries, and every pool-store key that carries the
    /// address as a delimited segment (substring-only matches are left alone).
    pub async fn clear_token_analysis(&self, token: Address) -> usize {
        let key = addr_key(token);
        let mut removed = 0usize;
        if self.pools.remove(&Self::analysis_key(token)) {
            removed += 1;
        }
        removed += self.pools.remove_matching(&key);
        if self.prices.remove(&key) {
            removed += 1;
        }
        self.token_remove(token).await;
        debug!(token = %key, removed, "token analysis invalidated");
        removed
    }

    pub fn clear_pools(&self) {
        self.pools.clear();
    }

    pub fn clear_prices(&self) {
        self.prices.clear();
    }

    pub async fn clear_all(&self) {
        self.pools.clear();
        self.prices.clear();
        self.tokens.invalidate_all();
    }

    /// Drop expired pool and price entries; returns the number purged.
    pub fn purge_expired(&self) -> usize {
        self.pools.purge_expired() + self.prices.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pools: self.pools.stats(),
            prices: self.prices.stats(),
            tokens: StoreStats {
                entries: self.tokens.entry_count() as usize,
                hits: self.token_hits.load(Ordering::Relaxed),
                misses: self.token_misses.load(Ordering::Relaxed),
            },
        }
    }
}
