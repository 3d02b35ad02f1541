//! Edge extraction from a sidecar SCIP-style indexer.
//!
//! The sidecar is a separate process that writes a JSON index of
//! documents, symbols and occurrences to stdout. Definitions are mapped to
//! spans first; every other occurrence then becomes an edge from the span
//! around it to the span defining the symbol.

pub mod index;
pub mod runner;

use crate::error::Result;
use crate::extractor::{degrade_within, EdgeExtractor, EdgeSink, ExtractOptions};
use crate::source::{LineIndex, SourceFiles};
use async_trait::async_trait;
use index::{display_name, ScipIndex};
use runner::{binary_available, index_args, run_indexer};
use spangraph_core::{
    EdgeType, GraphEdge, SidecarConfig, Span, SpanIndex, SpanKind, SCIP_EXTRACTOR,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCIP_CONFIDENCE: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct ScipExtractor {
    root: PathBuf,
    config: SidecarConfig,
}

impl ScipExtractor {
    pub fn new(root: impl Into<PathBuf>, config: SidecarConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    async fn run(&self, spans: &[Span], options: &ExtractOptions) -> Result<Vec<GraphEdge>> {
        let index = SpanIndex::new(spans);
        let files: Vec<PathBuf> = index.files().into_iter().map(Path::to_path_buf).collect();
        let args = index_args(&self.root, &files, &self.config.extra_args);

        let output = run_indexer(&self.config.binary, &args, options.timeout).await?;
        let scip: ScipIndex = serde_json::from_slice(&output)?;
        tracing::debug!(documents = scip.documents.len(), "Sidecar index received");

        let paths: Vec<&Path> = scip.documents.iter().map(|d| d.relative_path.as_path()).collect();
        let sources = SourceFiles::load(&self.root, paths).await;
        Ok(edges_from_index(&scip, &index, &sources, options.max_edges))
    }
}

#[async_trait]
impl EdgeExtractor for ScipExtractor {
    fn id(&self) -> &str {
        SCIP_EXTRACTOR
    }

    fn confidence(&self) -> f32 {
        SCIP_CONFIDENCE
    }

    fn is_supported(&self) -> bool {
        binary_available(&self.config.binary)
    }

    async fn extract_edges(&self, spans: &[Span], options: &ExtractOptions) -> Result<Vec<GraphEdge>> {
        if !self.is_supported() {
            tracing::debug!(binary = %self.config.binary.display(), "Sidecar indexer not found");
            return Ok(Vec::new());
        }
        Ok(degrade_within(SCIP_EXTRACTOR, options, self.run(spans, options)).await)
    }
}

/// Map a sidecar index onto spans.
pub fn edges_from_index(
    scip: &ScipIndex,
    index: &SpanIndex,
    sources: &SourceFiles,
    max_edges: usize,
) -> Vec<GraphEdge> {
    let mut sink = EdgeSink::new(SCIP_EXTRACTOR, SCIP_CONFIDENCE, max_edges);
    let documents: Vec<_> = scip
        .documents
        .iter()
        .filter_map(|doc| Some((doc, LineIndex::new(sources.text(&doc.relative_path)?))))
        .collect();

    let mut definitions: HashMap<&str, &Span> = HashMap::new();
    for (doc, lines) in &documents {
        let names: HashMap<&str, &str> = doc
            .symbols
            .iter()
            .map(|s| (s.symbol.as_str(), s.name()))
            .collect();
        for occurrence in &doc.occurrences {
            if !occurrence.symbol_roles.is_definition() || occurrence.is_local() {
                continue;
            }
            let Some(offset) = occurrence.start().and_then(|(l, c)| lines.offset(l, c)) else {
                continue;
            };
            let name = names
                .get(occurrence.symbol.as_str())
                .copied()
                .unwrap_or_else(|| display_name(&occurrence.symbol));
            if let Some(span) = defining_span(index, &doc.relative_path, offset, name) {
                definitions.entry(occurrence.symbol.as_str()).or_insert(span);
            }
        }
    }

    for (doc, lines) in &documents {
        for occurrence in &doc.occurrences {
            if occurrence.symbol_roles.is_definition() || occurrence.is_local() {
                continue;
            }
            let Some(offset) = occurrence.start().and_then(|(l, c)| lines.offset(l, c)) else {
                continue;
            };
            let (Some(source), Some(target)) = (
                index.enclosing(&doc.relative_path, offset),
                resolve_symbol(&definitions, index, &occurrence.symbol),
            ) else {
                continue;
            };
            let roles = &occurrence.symbol_roles;
            let edge_type = if roles.is_import() {
                EdgeType::Import
            } else if roles.is_test() || (source.is_test() && !target.is_test()) {
                EdgeType::TestOf
            } else if target.kind == SpanKind::Config {
                EdgeType::ConfigKey
            } else {
                EdgeType::Call
            };
            sink.push(source, target, edge_type, "scip-occurrence");
        }
    }

    for (doc, _) in &documents {
        for symbol in &doc.symbols {
            let Some(source) = resolve_symbol(&definitions, index, &symbol.symbol) else {
                continue;
            };
            // Implementation and type-definition links are type hierarchy,
            // which none of the edge types describe.
            for relationship in symbol.relationships.iter().filter(|r| r.is_reference) {
                let Some(target) = resolve_symbol(&definitions, index, &relationship.symbol) else {
                    continue;
                };
                sink.push(source, target, EdgeType::Call, "scip-relationship");
            }
        }
    }

    sink.into_edges()
}

/// The smallest span of `path` named `name` that contains the definition site.
fn defining_span<'a>(index: &'a SpanIndex, path: &Path, offset: usize, name: &str) -> Option<&'a Span> {
    index
        .in_file(path)
        .into_iter()
        .filter(|s| s.name == name && s.contains_offset(offset))
        .min_by_key(|s| s.len())
}

/// A symbol's defining span; symbols defined outside the indexed documents
/// fall back to a span with a unique matching name.
fn resolve_symbol<'a>(
    definitions: &HashMap<&str, &'a Span>,
    index: &'a SpanIndex,
    symbol: &str,
) -> Option<&'a Span> {
    if let Some(span) = definitions.get(symbol).copied() {
        return Some(span);
    }
    match index.by_name(display_name(symbol)).as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
