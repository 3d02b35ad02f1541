//! Span graph wrapper using petgraph::StableDiGraph keyed by span id

use crate::model::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// A graph node: a span id, plus the span itself when it is known.
///
/// Edges may reference ids the graph has never seen a span for; those nodes
/// exist with `span: None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanNode {
    pub id: SpanId,
    pub span: Option<Span>,
}

/// Outcome of inserting an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpsert {
    Inserted,
    /// An edge with the same key existed with lower confidence and was replaced.
    Replaced,
    /// An edge with the same key and equal or higher confidence was kept.
    Kept,
}

/// The span graph: a directed graph with at most one edge per
/// `(source, target, type)` key.
pub struct SpanGraph {
    inner: StableDiGraph<SpanNode, GraphEdge>,
    nodes: HashMap<SpanId, NodeIndex>,
    edges: HashMap<EdgeKey, EdgeIndex>,
}

impl std::fmt::Debug for SpanGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl SpanGraph {
    pub fn new() -> Self {
        SpanGraph {
            inner: StableDiGraph::new(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    /// Add or refresh a span node. Returns its index.
    pub fn add_span(&mut self, span: Span) -> NodeIndex {
        let idx = self.ensure_node(&span.id);
        if let Some(node) = self.inner.node_weight_mut(idx) {
            node.span = Some(span);
        }
        idx
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(id) {
            return idx;
        }
        let idx = self.inner.add_node(SpanNode {
            id: id.to_string(),
            span: None,
        });
        self.nodes.insert(id.to_string(), idx);
        idx
    }

    /// Insert an edge, reconciling with an existing edge of the same key by
    /// confidence. Equal confidence keeps the existing edge.
    pub fn upsert_edge(&mut self, edge: GraphEdge) -> EdgeUpsert {
        let key = edge.key();
        if let Some(&idx) = self.edges.get(&key) {
            if let Some(existing) = self.inner.edge_weight_mut(idx) {
                if edge.confidence > existing.confidence {
                    *existing = edge;
                    return EdgeUpsert::Replaced;
                }
                return EdgeUpsert::Kept;
            }
        }
        let source = self.ensure_node(&edge.source_id);
        let target = self.ensure_node(&edge.target_id);
        let idx = self.inner.add_edge(source, target, edge);
        self.edges.insert(key, idx);
        EdgeUpsert::Inserted
    }

    /// Get a node by span id.
    pub fn node(&self, id: &str) -> Option<&SpanNode> {
        self.nodes.get(id).and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Iterate over all edges.
    pub fn all_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.inner
            .edge_indices()
            .filter_map(move |idx| self.inner.edge_weight(idx))
    }

    /// Get all outgoing edges from a node.
    pub fn edges_from(&self, source: &str) -> Vec<&GraphEdge> {
        self.edges_directed(source, Direction::Outgoing)
    }

    /// Get all incoming edges to a node.
    pub fn edges_to(&self, target: &str) -> Vec<&GraphEdge> {
        self.edges_directed(target, Direction::Incoming)
    }

    fn edges_directed(&self, id: &str, direction: Direction) -> Vec<&GraphEdge> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        // petgraph yields adjacency in reverse insertion order; flip it so
        // callers see edges in the order they were added.
        let mut edges: Vec<&GraphEdge> = self
            .inner
            .edges_directed(idx, direction)
            .filter_map(|edge_ref| self.inner.edge_weight(edge_ref.id()))
            .collect();
        edges.reverse();
        edges
    }

    /// Edges from `source` to `target`, any type.
    pub fn edges_between(&self, source: &str, target: &str) -> Vec<&GraphEdge> {
        self.edges_from(source)
            .into_iter()
            .filter(|e| e.target_id == target)
            .collect()
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<SpanNode> {
        let idx = self.nodes.remove(id)?;
        let touching: Vec<EdgeIndex> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.inner.edges_directed(idx, Direction::Incoming))
            .map(|e| e.id())
            .collect();
        for edge_idx in touching {
            if let Some(edge) = self.inner.remove_edge(edge_idx) {
                self.edges.remove(&edge.key());
            }
        }
        self.inner.remove_node(idx)
    }

    /// Ids of every node whose span lives in `path`.
    pub fn nodes_in_file(&self, path: &std::path::Path) -> Vec<SpanId> {
        self.inner
            .node_indices()
            .filter_map(|idx| self.inner.node_weight(idx))
            .filter(|n| n.span.as_ref().is_some_and(|s| s.path == path))
            .map(|n| n.id.clone())
            .collect()
    }
}

impl Default for SpanGraph {
    fn default() -> Self {
        Self::new()
    }
}
