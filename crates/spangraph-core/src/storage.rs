//! Graph storage capability consumed by traversal, plus an in-memory backend

use crate::error::Result;
use crate::graph::{EdgeUpsert, SpanGraph};
use crate::model::{EdgeType, GraphEdge, Span, SpanId};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::RwLock;

/// Edge lookups the traversal engine depends on.
///
/// Implemented by whatever persists the graph (relational, embedded, or
/// in-memory). `edge_types` of `None` means every type.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    async fn outgoing_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>>;

    async fn incoming_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>>;

    async fn edges_between(
        &self,
        source_id: &str,
        target_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>>;

    async fn node_exists(&self, node_id: &str) -> Result<bool>;

    async fn node_metadata(&self, node_id: &str) -> Result<Option<serde_json::Value>>;
}

fn type_matches(edge: &GraphEdge, edge_types: Option<&[EdgeType]>) -> bool {
    edge_types.is_none_or(|types| types.contains(&edge.edge_type))
}

/// Counts from one ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    pub replaced: usize,
    pub kept: usize,
}

/// `GraphStorage` over a [`SpanGraph`] held behind an async lock.
#[derive(Debug, Default)]
pub struct MemoryGraphStorage {
    graph: RwLock<SpanGraph>,
}

impl MemoryGraphStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build storage from parsed spans and builder output in one go.
    pub async fn from_parts(spans: &[Span], edges: Vec<GraphEdge>) -> Self {
        let storage = Self::new();
        storage.insert_spans(spans).await;
        storage.insert_edges(edges).await;
        storage
    }

    pub async fn insert_spans(&self, spans: &[Span]) {
        let mut graph = self.graph.write().await;
        for span in spans {
            graph.add_span(span.clone());
        }
    }

    /// Ingest edges with the same reconciliation rule as the builder:
    /// one edge per key, highest confidence wins.
    pub async fn insert_edges(&self, edges: Vec<GraphEdge>) -> IngestStats {
        let mut graph = self.graph.write().await;
        let mut stats = IngestStats::default();
        for edge in edges {
            match graph.upsert_edge(edge) {
                EdgeUpsert::Inserted => stats.inserted += 1,
                EdgeUpsert::Replaced => stats.replaced += 1,
                EdgeUpsert::Kept => stats.kept += 1,
            }
        }
        tracing::debug!(
            inserted = stats.inserted,
            replaced = stats.replaced,
            kept = stats.kept,
            "Ingested edges"
        );
        stats
    }

    /// Remove a node and its edges. Returns whether the node existed.
    pub async fn remove_node(&self, node_id: &str) -> bool {
        self.graph.write().await.remove_node(node_id).is_some()
    }

    /// Remove every node whose span lives in `path` (re-indexing a file).
    /// Returns the removed ids so dependent caches can be invalidated.
    pub async fn remove_file(&self, path: &Path) -> Vec<SpanId> {
        let mut graph = self.graph.write().await;
        let ids = graph.nodes_in_file(path);
        for id in &ids {
            graph.remove_node(id);
        }
        ids
    }

    pub async fn node_count(&self) -> usize {
        self.graph.read().await.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.graph.read().await.edge_count()
    }

    /// Snapshot of every stored edge.
    pub async fn all_edges(&self) -> Vec<GraphEdge> {
        self.graph.read().await.all_edges().cloned().collect()
    }
}

#[async_trait]
impl GraphStorage for MemoryGraphStorage {
    async fn outgoing_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>> {
        let graph = self.graph.read().await;
        Ok(graph
            .edges_from(node_id)
            .into_iter()
            .filter(|e| type_matches(e, edge_types))
            .cloned()
            .collect())
    }

    async fn incoming_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>> {
        let graph = self.graph.read().await;
        Ok(graph
            .edges_to(node_id)
            .into_iter()
            .filter(|e| type_matches(e, edge_types))
            .cloned()
            .collect())
    }

    async fn edges_between(
        &self,
        source_id: &str,
        target_id: &str,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<GraphEdge>> {
        let graph = self.graph.read().await;
        Ok(graph
            .edges_between(source_id, target_id)
            .into_iter()
            .filter(|e| type_matches(e, edge_types))
            .cloned()
            .collect())
    }

    async fn node_exists(&self, node_id: &str) -> Result<bool> {
        Ok(self.graph.read().await.contains_node(node_id))
    }

    async fn node_metadata(&self, node_id: &str) -> Result<Option<serde_json::Value>> {
        let graph = self.graph.read().await;
        let Some(span) = graph.node(node_id).and_then(|n| n.span.as_ref()) else {
            return Ok(None);
        };
        serde_json::to_value(span)
            .map(Some)
            .map_err(|e| crate::error::GraphError::Storage(e.to_string()))
    }
}
