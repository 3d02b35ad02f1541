//! Cache-first decorator over a traversal engine

use crate::cache::{CacheStats, TraversalCache};
use crate::engine::{BfsTraversalEngine, TraversalEngine};
use crate::error::Result;
use async_trait::async_trait;
use spangraph_core::{CacheConfig, GraphExpansion, TraversalResult};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Answers from the cache when it can, otherwise from the wrapped engine,
/// storing what the engine returns.
///
/// Owns the periodic sweep of its cache; the sweep stops on
/// [`shutdown`](Self::shutdown) or drop.
#[derive(Debug)]
pub struct CachedTraversalEngine<E = BfsTraversalEngine> {
    inner: E,
    cache: Arc<TraversalCache>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<E: TraversalEngine> CachedTraversalEngine<E> {
    /// Wrap `inner` with a fresh cache. When called inside a tokio runtime
    /// the periodic sweep starts right away.
    pub fn new(inner: E, config: &CacheConfig) -> Result<Self> {
        let cache = Arc::new(TraversalCache::new(config)?);
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(cache.spawn_cleanup(config.cleanup_interval())),
            Err(_) => {
                tracing::debug!("No runtime, traversal cache sweep disabled");
                None
            }
        };
        Ok(Self {
            inner,
            cache,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Wrap `inner` with an existing cache, without a sweep.
    pub fn with_cache(inner: E, cache: Arc<TraversalCache>) -> Self {
        Self {
            inner,
            cache,
            sweeper: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<TraversalCache> {
        &self.cache
    }

    pub async fn invalidate_for_nodes<S: AsRef<str>>(&self, node_ids: &[S]) -> usize {
        self.cache.invalidate_for_nodes(node_ids).await
    }

    pub async fn clear(&self) -> usize {
        self.cache.clear().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Stop the sweep and empty the cache.
    pub async fn shutdown(&self) {
        self.stop_sweeper();
        let dropped = self.cache.clear().await;
        tracing::debug!(dropped, "Traversal cache shut down");
    }

    fn stop_sweeper(&self) {
        let handle = match self.sweeper.lock() {
            Ok(mut sweeper) => sweeper.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl<E> Drop for CachedTraversalEngine<E> {
    fn drop(&mut self) {
        let sweeper = match self.sweeper.get_mut() {
            Ok(sweeper) => sweeper.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = sweeper {
            handle.abort();
        }
    }
}

#[async_trait]
impl<E: TraversalEngine> TraversalEngine for CachedTraversalEngine<E> {
    async fn expand_graph(&self, expansion: &GraphExpansion) -> TraversalResult {
        if let Some(hit) = self.cache.get(expansion).await {
            tracing::debug!(query = %expansion.query, "Traversal served from cache");
            return hit;
        }
        let result = self.inner.expand_graph(expansion).await;
        self.cache.set(expansion, result.clone()).await;
        result
    }
}
