//! Breadth-first graph expansion under a token budget

use crate::budget::TokenGuard;
use async_trait::async_trait;
use spangraph_core::{
    EdgeKey, EdgeType, ExpansionStrategy, GraphEdge, GraphExpansion, GraphStorage, SpanId,
    TraversalResult,
};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default latency above which a traversal is reported as slow.
pub const DEFAULT_PERFORMANCE_THRESHOLD: Duration = Duration::from_millis(100);

/// Anything that answers a [`GraphExpansion`]. Never fails: degraded
/// conditions are encoded in the result.
#[async_trait]
pub trait TraversalEngine: Send + Sync {
    async fn expand_graph(&self, expansion: &GraphExpansion) -> TraversalResult;
}

/// Level-by-level expansion over a [`GraphStorage`], following edges in
/// both directions.
pub struct BfsTraversalEngine {
    storage: Arc<dyn GraphStorage>,
    performance_threshold_ms: AtomicU64,
}

impl fmt::Debug for BfsTraversalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BfsTraversalEngine")
            .field("performance_threshold", &self.performance_threshold())
            .finish_non_exhaustive()
    }
}

impl BfsTraversalEngine {
    pub fn new(storage: Arc<dyn GraphStorage>) -> Self {
        Self {
            storage,
            performance_threshold_ms: AtomicU64::new(DEFAULT_PERFORMANCE_THRESHOLD.as_millis() as u64),
        }
    }

    pub fn with_performance_threshold(self, threshold: Duration) -> Self {
        self.set_performance_threshold(threshold);
        self
    }

    pub fn storage(&self) -> &Arc<dyn GraphStorage> {
        &self.storage
    }

    pub fn performance_threshold(&self) -> Duration {
        Duration::from_millis(self.performance_threshold_ms.load(Ordering::Relaxed))
    }

    /// Only affects logging; slow traversals still complete.
    pub fn set_performance_threshold(&self, threshold: Duration) {
        self.performance_threshold_ms
            .store(threshold.as_millis() as u64, Ordering::Relaxed);
    }

    /// Outgoing then incoming edges of `node`. Storage failures count as
    /// no edges.
    async fn neighbours(&self, node: &str, edge_types: Option<&[EdgeType]>) -> Vec<GraphEdge> {
        let mut edges = match self.storage.outgoing_edges(node, edge_types).await {
            Ok(edges) => edges,
            Err(e) => {
                tracing::warn!(node, error = %e, "Failed to load outgoing edges");
                Vec::new()
            }
        };
        match self.storage.incoming_edges(node, edge_types).await {
            Ok(incoming) => edges.extend(incoming),
            Err(e) => tracing::warn!(node, error = %e, "Failed to load incoming edges"),
        }
        edges
    }
}

#[async_trait]
impl TraversalEngine for BfsTraversalEngine {
    async fn expand_graph(&self, expansion: &GraphExpansion) -> TraversalResult {
        let started = Instant::now();
        let mut result = TraversalResult::empty(expansion);
        if expansion.start_symbols.is_empty() {
            result.performance_ms = elapsed_ms(started);
            return result;
        }

        let edge_types = expansion.edge_filter();
        let mut guard = TokenGuard::new(expansion.token_budget);
        let mut visited: BTreeSet<SpanId> = expansion.start_symbols.iter().cloned().collect();
        // Seeds in sorted order, so the result does not depend on how the
        // caller ordered them.
        let mut frontier: Vec<SpanId> = visited.iter().cloned().collect();
        let mut seen_edges: HashSet<EdgeKey> = HashSet::new();

        for level in 1..=expansion.max_depth {
            if frontier.is_empty() {
                break;
            }

            let mut candidates = Vec::new();
            for node in &frontier {
                for edge in self.neighbours(node, edge_types).await {
                    if seen_edges.insert(edge.key()) {
                        candidates.push(edge);
                    }
                }
            }
            if expansion.expansion_strategy == ExpansionStrategy::QualityFirst {
                candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            }

            let mut next = Vec::new();
            let mut accepted = 0usize;
            for edge in candidates {
                if !guard.try_add(&edge) {
                    result.truncated = true;
                    break;
                }
                accepted += 1;
                for endpoint in [&edge.source_id, &edge.target_id] {
                    if visited.insert(endpoint.clone()) {
                        next.push(endpoint.clone());
                    }
                }
                result.edges.push(edge);
            }

            if accepted > 0 {
                result.expansion_depth = level;
            }
            if result.truncated {
                tracing::debug!(level, used = guard.used(), "Token budget exhausted");
                break;
            }
            frontier = next;
        }

        result.visited_nodes = visited;
        result.tokens_used = guard.used();
        result.performance_ms = elapsed_ms(started);

        let threshold = self.performance_threshold();
        if started.elapsed() > threshold {
            tracing::warn!(
                query = %expansion.query,
                duration_ms = result.performance_ms,
                threshold_ms = threshold.as_millis() as u64,
                "Slow traversal"
            );
        }
        tracing::debug!(
            nodes = result.visited_nodes.len(),
            edges = result.edges.len(),
            depth = result.expansion_depth,
            truncated = result.truncated,
            "Traversal finished"
        );
        result
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
