//! Traversal result cache with least-used eviction, sliding expiry and
//! node-targeted invalidation

use crate::error::Result;
use serde::Serialize;
use spangraph_core::{CacheConfig, EdgeType, ExpansionStrategy, GraphExpansion, TraversalResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Canonical form of a request. Start symbols and edge types are sets, so
/// they are sorted and deduplicated; every other field is kept as is.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKey<'a> {
    query: &'a str,
    start_symbols: Vec<&'a str>,
    max_depth: usize,
    token_budget: usize,
    edge_types: Vec<EdgeType>,
    expansion_strategy: ExpansionStrategy,
}

/// Key under which a request's result is cached.
pub fn cache_key(expansion: &GraphExpansion) -> Result<String> {
    let mut start_symbols: Vec<&str> = expansion.start_symbols.iter().map(String::as_str).collect();
    start_symbols.sort_unstable();
    start_symbols.dedup();
    let mut edge_types = expansion.edge_types.clone();
    edge_types.sort_unstable();
    edge_types.dedup();

    let key = CacheKey {
        query: &expansion.query,
        start_symbols,
        max_depth: expansion.max_depth,
        token_budget: expansion.token_budget,
        edge_types,
        expansion_strategy: expansion.expansion_strategy,
    };
    Ok(serde_json::to_string(&key)?)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: TraversalResult,
    timestamp: Instant,
    access_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl CacheState {
    /// Drop entries idle for longer than `max_age`.
    fn purge_expired(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.timestamp) <= max_age);
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    /// Remove the least accessed entry, oldest first among equals.
    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.timestamp.cmp(&b.timestamp))
            })
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            tracing::debug!("Evicted traversal cache entry");
        }
    }
}

/// Shared cache of traversal results.
///
/// All reads and writes go through one lock; critical sections are map
/// operations only.
#[derive(Debug)]
pub struct TraversalCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    max_age: Duration,
}

impl TraversalCache {
    /// Fails on a zero capacity or zero max age.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(CacheState::default()),
            max_entries: config.max_entries,
            max_age: config.max_age(),
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// A fresh copy of the cached result, marked as a cache hit.
    ///
    /// A hit counts as an access and restarts the entry's age. An expired
    /// entry is removed and reported as a miss.
    pub async fn get(&self, expansion: &GraphExpansion) -> Option<TraversalResult> {
        let key = match cache_key(expansion) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Uncacheable traversal request");
                return None;
            }
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();

        let Some(entry) = state.entries.get_mut(&key) else {
            state.stats.misses += 1;
            return None;
        };
        if now.saturating_duration_since(entry.timestamp) > self.max_age {
            state.entries.remove(&key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        entry.access_count += 1;
        entry.timestamp = now;
        state.stats.hits += 1;
        let mut result = entry.result.clone();
        result.cache_hit = true;
        Some(result)
    }

    /// Store a result, evicting the least used entry when full.
    pub async fn set(&self, expansion: &GraphExpansion, mut result: TraversalResult) {
        let key = match cache_key(expansion) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Uncacheable traversal request");
                return;
            }
        };
        result.cache_hit = false;

        let mut state = self.state.lock().await;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.evict_one();
        }
        state.entries.insert(
            key,
            CacheEntry {
                result,
                timestamp: Instant::now(),
                access_count: 0,
            },
        );
    }

    /// Remove every entry that started from or visited one of `node_ids`.
    /// Returns how many were removed.
    pub async fn invalidate_for_nodes<S: AsRef<str>>(&self, node_ids: &[S]) -> usize {
        if node_ids.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !node_ids.iter().any(|id| entry.result.touches(id.as_ref())));
        let removed = before - state.entries.len();
        state.stats.invalidations += removed as u64;
        if removed > 0 {
            tracing::debug!(removed, nodes = node_ids.len(), "Invalidated cached traversals");
        }
        removed
    }

    /// Remove everything. Returns how many entries were dropped.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Drop every entry older than the max age.
    pub async fn cleanup_expired(&self) -> usize {
        let max_age = self.max_age;
        self.state.lock().await.purge_expired(Instant::now(), max_age)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    /// Sweep expired entries every `interval` until the cache is dropped
    /// or the returned handle is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired traversal cache entries");
                }
            }
        })
    }
}
