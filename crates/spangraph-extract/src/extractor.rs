//! Edge extractor trait definition

use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use spangraph_core::{EdgeKey, EdgeType, GraphEdge, Span};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Limits handed to an extractor for one invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub timeout: Duration,
    pub max_edges: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            max_edges: 1_000,
        }
    }
}

/// A strategy that derives typed edges from a batch of spans.
///
/// Built-in extractors degrade instead of failing: an internal error or an
/// expired deadline yields `Ok` with whatever edges were found (usually
/// none). An `Err` is still recorded by the builder on the
/// `ExtractionResult` so a misbehaving implementation cannot take down a
/// build.
#[async_trait]
pub trait EdgeExtractor: Send + Sync {
    /// Stable identifier, e.g. `"scip"`.
    fn id(&self) -> &str;

    /// Prior confidence assigned to every edge this extractor emits.
    fn confidence(&self) -> f32;

    /// Whether the backing tool is available. Must not block for long.
    fn is_supported(&self) -> bool;

    async fn extract_edges(&self, spans: &[Span], options: &ExtractOptions) -> Result<Vec<GraphEdge>>;
}

/// Run extraction work under the option deadline, degrading to an empty
/// edge list on error or timeout.
pub(crate) async fn degrade_within<F>(extractor: &str, options: &ExtractOptions, work: F) -> Vec<GraphEdge>
where
    F: Future<Output = Result<Vec<GraphEdge>>>,
{
    match tokio::time::timeout(options.timeout, work).await {
        Ok(Ok(mut edges)) => {
            edges.truncate(options.max_edges);
            edges
        }
        Ok(Err(e)) => {
            tracing::warn!(extractor, error = %e, "Extraction failed, returning no edges");
            Vec::new()
        }
        Err(_) => {
            let e = ExtractError::Timeout {
                operation: format!("{extractor} extraction"),
                timeout: options.timeout,
            };
            tracing::warn!(extractor, error = %e, "Extraction abandoned");
            Vec::new()
        }
    }
}

/// Collects edges for one extractor run: stamps the prior confidence,
/// drops self-loops and repeats, and stops accepting at capacity.
#[derive(Debug)]
pub(crate) struct EdgeSink {
    extractor_id: String,
    confidence: f32,
    capacity: usize,
    edges: Vec<GraphEdge>,
    seen: HashSet<EdgeKey>,
}

impl EdgeSink {
    pub fn new(extractor_id: &str, confidence: f32, capacity: usize) -> Self {
        Self {
            extractor_id: extractor_id.to_string(),
            confidence,
            capacity,
            edges: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.edges.len() >= self.capacity
    }

    /// Returns whether the edge was accepted.
    pub fn push(&mut self, source: &Span, target: &Span, edge_type: EdgeType, method: &str) -> bool {
        if source.id == target.id || self.is_full() {
            return false;
        }
        let edge = GraphEdge::new(
            source.id.as_str(),
            target.id.as_str(),
            edge_type,
            self.confidence,
            self.extractor_id.as_str(),
            method,
        );
        if !self.seen.insert(edge.key()) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn into_edges(self) -> Vec<GraphEdge> {
        self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spangraph_core::SpanKind;
    use std::path::PathBuf;

    fn span(id: &str) -> Span {
        Span {
            id: id.to_string(),
            repo_id: "r".to_string(),
            path: PathBuf::from("a.py"),
            byte_start: 0,
            byte_end: 1,
            kind: SpanKind::Function,
            name: id.to_string(),
        }
    }

    #[test]
    fn sink_rejects_loops_repeats_and_overflow() {
        let (a, b, c) = (span("a"), span("b"), span("c"));
        let mut sink = EdgeSink::new("heuristic", 0.6, 2);

        assert!(!sink.push(&a, &a, EdgeType::Call, "call-pattern"));
        assert!(sink.push(&a, &b, EdgeType::Call, "call-pattern"));
        assert!(!sink.push(&a, &b, EdgeType::Call, "call-pattern"));
        assert!(sink.push(&a, &b, EdgeType::Import, "import-pattern"));
        assert!(sink.is_full());
        assert!(!sink.push(&a, &c, EdgeType::Call, "call-pattern"));

        let edges = sink.into_edges();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| (e.confidence - 0.6).abs() < f32::EPSILON));
        assert_eq!(edges[0].metadata.extractor_id, "heuristic");
    }

    #[tokio::test]
    async fn degrade_within_swallows_errors_and_timeouts() {
        let options = ExtractOptions {
            timeout: Duration::from_millis(20),
            max_edges: 1,
        };

        let failed = degrade_within("x", &options, async {
            Err(ExtractError::Other("boom".into()))
        })
        .await;
        assert!(failed.is_empty());

        let slow = degrade_within("x", &options, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![GraphEdge::new("a", "b", EdgeType::Call, 0.6, "x", "m")])
        })
        .await;
        assert!(slow.is_empty());

        let capped = degrade_within("x", &options, async {
            Ok(vec![
                GraphEdge::new("a", "b", EdgeType::Call, 0.6, "x", "m"),
                GraphEdge::new("a", "c", EdgeType::Call, 0.6, "x", "m"),
            ])
        })
        .await;
        assert_eq!(capped.len(), 1);
    }
}
