//! Runs registered extractors concurrently and merges their output into
//! one deduplicated, confidence-ordered edge set.

use crate::extractor::{EdgeExtractor, ExtractOptions};
use crate::heuristics::HeuristicExtractor;
use crate::lsp::LspExtractor;
use crate::registry::ExtractorRegistry;
use crate::scip::ScipExtractor;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use spangraph_core::{
    BuilderConfig, EdgeKey, EdgeType, EngineConfig, ExtractionResult, GraphEdge, Span,
    HEURISTIC_EXTRACTOR, LSP_EXTRACTOR, SCIP_EXTRACTOR,
};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for one build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Extractor ids to run, in result order.
    pub extractors: Vec<String>,
    /// Deadline for each extractor, applied independently.
    pub timeout: Duration,
    pub max_edges_per_extractor: usize,
    /// Edges below this confidence are dropped before deduplication.
    pub confidence_threshold: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuilderConfig::default())
    }
}

impl From<&BuilderConfig> for BuildOptions {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            extractors: config.extractors.clone(),
            timeout: config.timeout(),
            max_edges_per_extractor: config.max_edges_per_extractor,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

impl BuildOptions {
    pub fn extractors<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extractors = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn max_edges_per_extractor(mut self, max: usize) -> Self {
        self.max_edges_per_extractor = max;
        self
    }

    fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            timeout: self.timeout,
            max_edges: self.max_edges_per_extractor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub total_edges: usize,
    pub edges_by_type: BTreeMap<EdgeType, usize>,
    pub edges_by_extractor: BTreeMap<String, usize>,
    /// Mean edge confidence, rounded to two decimals; 0 for no edges.
    pub average_confidence: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub edges: Vec<GraphEdge>,
    /// One entry per requested extractor, in request order.
    pub results: Vec<ExtractionResult>,
    pub summary: BuildSummary,
}

/// Rung of the precision ladder that produced an incremental build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Scip,
    Lsp,
    Heuristic,
    /// Every rung was tried and none produced edges.
    Complete,
}

impl BuildStage {
    /// Stages tried in order, with the extractor backing each.
    pub const LADDER: [(BuildStage, &'static str); 3] = [
        (BuildStage::Scip, SCIP_EXTRACTOR),
        (BuildStage::Lsp, LSP_EXTRACTOR),
        (BuildStage::Heuristic, HEURISTIC_EXTRACTOR),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStage::Scip => "scip",
            BuildStage::Lsp => "lsp",
            BuildStage::Heuristic => "heuristic",
            BuildStage::Complete => "complete",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalOutput {
    pub edges: Vec<GraphEdge>,
    pub stage: BuildStage,
    /// Prior of the extractor that produced `edges`; 0 when none did.
    pub confidence: f32,
    /// Diagnostics for every stage attempted, without their edges.
    pub results: Vec<ExtractionResult>,
    pub summary: BuildSummary,
}

/// Orchestrates extractors from an owned registry.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    registry: ExtractorRegistry,
}

impl GraphBuilder {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }

    /// The three built-in extractors for `root`, with an unconnected LSP
    /// extractor.
    pub fn from_config(root: &Path, config: &EngineConfig) -> Self {
        Self::with_language_server(root, config, Arc::new(LspExtractor::new(root)))
    }

    /// The three built-in extractors for `root`, using an LSP extractor the
    /// caller already connected (see [`LspExtractor::connect`]) and keeps
    /// a handle to for shutdown.
    pub fn with_language_server(root: &Path, config: &EngineConfig, lsp: Arc<LspExtractor>) -> Self {
        let mut builder = Self::default();
        builder.register(Arc::new(ScipExtractor::new(root, config.sidecar.clone())));
        builder.register(lsp);
        builder.register(Arc::new(HeuristicExtractor::new(root)));
        builder
    }

    pub fn register(&mut self, extractor: Arc<dyn EdgeExtractor>) -> &mut Self {
        self.registry.register(extractor);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EdgeExtractor>) -> Self {
        self.registry.register(extractor);
        self
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Run every requested extractor concurrently and merge the results.
    ///
    /// Never fails: missing, unsupported, failing, panicking or slow
    /// extractors contribute an `ExtractionResult` carrying an error and no
    /// edges, and do not affect their siblings.
    pub async fn build_graph(&self, spans: &[Span], options: &BuildOptions) -> BuildOutput {
        let started = Instant::now();
        let spans: Arc<[Span]> = Arc::from(spans);
        let extract = options.extract_options();

        tracing::debug!(
            extractors = ?options.extractors,
            spans = spans.len(),
            "Starting graph build"
        );
        let runs = options
            .extractors
            .iter()
            .map(|id| self.run_extractor(id, Arc::clone(&spans), extract));
        let results = join_all(runs).await;

        let candidates = results.iter().flat_map(|r| r.edges.iter().cloned());
        let cap = options
            .max_edges_per_extractor
            .saturating_mul(options.extractors.len());
        let edges = merge_edges(candidates, options.confidence_threshold, cap);
        let summary = summarize(&edges, started.elapsed());

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        tracing::info!(
            edges = summary.total_edges,
            failed,
            duration_ms = summary.duration_ms,
            "Graph build finished"
        );
        BuildOutput {
            edges,
            results,
            summary,
        }
    }

    /// Walk the precision ladder (sidecar, language server, heuristics) and
    /// stop at the first supported stage that yields edges.
    pub async fn build_graph_incremental(&self, spans: &[Span], options: &BuildOptions) -> IncrementalOutput {
        let started = Instant::now();
        let spans: Arc<[Span]> = Arc::from(spans);
        let extract = options.extract_options();
        let mut results = Vec::new();

        for (stage, id) in BuildStage::LADDER {
            let Some(extractor) = self.registry.get(id) else {
                continue;
            };
            if !extractor.is_supported() {
                tracing::debug!(%stage, "Stage unsupported, skipping");
                continue;
            }

            let mut result = self.run_extractor(id, Arc::clone(&spans), extract).await;
            let edges = merge_edges(
                std::mem::take(&mut result.edges),
                options.confidence_threshold,
                options.max_edges_per_extractor,
            );
            if let Some(error) = &result.error {
                tracing::warn!(%stage, %error, "Stage failed, falling through");
            }
            results.push(result);

            if !edges.is_empty() {
                let summary = summarize(&edges, started.elapsed());
                tracing::info!(%stage, edges = edges.len(), "Incremental build settled");
                return IncrementalOutput {
                    edges,
                    stage,
                    confidence: extractor.confidence(),
                    results,
                    summary,
                };
            }
            tracing::debug!(%stage, "Stage produced no edges");
        }

        tracing::info!("Incremental build found no relationships");
        IncrementalOutput {
            edges: Vec::new(),
            stage: BuildStage::Complete,
            confidence: 0.0,
            results,
            summary: summarize(&[], started.elapsed()),
        }
    }

    /// One extractor under its own deadline, in its own task so a panic
    /// stays contained. On timeout the task is aborted, which drops any
    /// child process it owns.
    async fn run_extractor(&self, id: &str, spans: Arc<[Span]>, options: ExtractOptions) -> ExtractionResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let Some(extractor) = self.registry.get(id) else {
            tracing::warn!(extractor = id, "Requested extractor is not registered");
            return ExtractionResult::failed(id, 0, format!("extractor '{id}' is not registered"));
        };
        if !extractor.is_supported() {
            tracing::debug!(extractor = id, "Extractor unsupported, skipping");
            return ExtractionResult::failed(id, 0, format!("extractor '{id}' is not supported"));
        }

        let mut task = tokio::spawn(async move { extractor.extract_edges(&spans, &options).await });
        let outcome = tokio::time::timeout(options.timeout, &mut task).await;

        let error = match outcome {
            Ok(Ok(Ok(mut edges))) => {
                edges.truncate(options.max_edges);
                tracing::debug!(extractor = id, edges = edges.len(), duration_ms = elapsed(), "Extractor finished");
                return ExtractionResult {
                    edges,
                    extractor_id: id.to_string(),
                    duration_ms: elapsed(),
                    error: None,
                };
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join)) if join.is_panic() => "extractor panicked".to_string(),
            Ok(Err(join)) => join.to_string(),
            Err(_) => {
                task.abort();
                format!("timed out after {}ms", options.timeout.as_millis())
            }
        };
        tracing::warn!(extractor = id, %error, "Extractor produced no edges");
        ExtractionResult::failed(id, elapsed(), error)
    }
}

/// Filter by `threshold`, keep one edge per `(source, target, type)`,
/// order by confidence descending and truncate to `cap`.
///
/// A later duplicate replaces the kept edge only when strictly more
/// confident, so ties keep the first seen. The sort is stable, so equally
/// confident edges stay in discovery order.
pub fn merge_edges<I>(edges: I, threshold: f32, cap: usize) -> Vec<GraphEdge>
where
    I: IntoIterator<Item = GraphEdge>,
{
    let mut kept: Vec<GraphEdge> = Vec::new();
    let mut slots: HashMap<EdgeKey, usize> = HashMap::new();

    for edge in edges.into_iter().filter(|e| e.confidence >= threshold) {
        match slots.entry(edge.key()) {
            Entry::Occupied(slot) => {
                let current = &mut kept[*slot.get()];
                if edge.confidence > current.confidence {
                    *current = edge;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(edge);
            }
        }
    }

    kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    kept.truncate(cap);
    kept
}

pub fn summarize(edges: &[GraphEdge], duration: Duration) -> BuildSummary {
    let mut edges_by_type = BTreeMap::new();
    let mut edges_by_extractor = BTreeMap::new();
    let mut total_confidence = 0.0f64;

    for edge in edges {
        *edges_by_type.entry(edge.edge_type).or_insert(0) += 1;
        *edges_by_extractor
            .entry(edge.metadata.extractor_id.clone())
            .or_insert(0) += 1;
        total_confidence += f64::from(edge.confidence);
    }

    let average_confidence = if edges.is_empty() {
        0.0
    } else {
        (total_confidence / edges.len() as f64 * 100.0).round() / 100.0
    };

    BuildSummary {
        total_edges: edges.len(),
        edges_by_type,
        edges_by_extractor,
        average_confidence,
        duration_ms: duration.as_millis() as u64,
    }
}
