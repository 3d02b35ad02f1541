//! Pattern-based edge extraction.
//!
//! Always available and fast, but imprecise: every match resolves by name
//! alone, so edges carry the lowest prior of the three extractors.

pub mod patterns;

use crate::error::Result;
use crate::extractor::{degrade_within, EdgeExtractor, EdgeSink, ExtractOptions};
use crate::languages::{find_imports, Language};
use crate::source::SourceFiles;
use async_trait::async_trait;
use spangraph_core::{
    file_stem, is_test_path, EdgeType, GraphEdge, Span, SpanIndex, SpanKind, HEURISTIC_EXTRACTOR,
};
use std::path::{Path, PathBuf};

pub const HEURISTIC_CONFIDENCE: f32 = 0.6;

/// Regex-driven extractor for calls, imports, config reads, routes and
/// test relationships.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    root: PathBuf,
}

impl HeuristicExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Run every pattern family over already-loaded sources.
    pub fn extract_from(&self, index: &SpanIndex, sources: &SourceFiles, max_edges: usize) -> Vec<GraphEdge> {
        let mut sink = EdgeSink::new(HEURISTIC_EXTRACTOR, HEURISTIC_CONFIDENCE, max_edges);

        for file in index.files() {
            if sink.is_full() {
                break;
            }
            let Some(text) = sources.text(file) else {
                continue;
            };
            import_edges(index, file, text, &mut sink);
            call_edges(index, file, text, &mut sink);
            config_edges(index, file, text, &mut sink);
            route_edges(index, file, text, &mut sink);
        }
        test_edges(index, &mut sink);

        tracing::debug!(edges = sink.len(), files = sources.len(), "Heuristic extraction finished");
        sink.into_edges()
    }
}

#[async_trait]
impl EdgeExtractor for HeuristicExtractor {
    fn id(&self) -> &str {
        HEURISTIC_EXTRACTOR
    }

    fn confidence(&self) -> f32 {
        HEURISTIC_CONFIDENCE
    }

    fn is_supported(&self) -> bool {
        true
    }

    async fn extract_edges(&self, spans: &[Span], options: &ExtractOptions) -> Result<Vec<GraphEdge>> {
        let edges = degrade_within(HEURISTIC_EXTRACTOR, options, async {
            let index = SpanIndex::new(spans);
            let sources = SourceFiles::load(&self.root, index.files()).await;
            Ok(self.extract_from(&index, &sources, options.max_edges))
        })
        .await;
        Ok(edges)
    }
}

fn is_structural(span: &Span) -> bool {
    matches!(span.kind, SpanKind::File | SpanKind::Module)
}

/// The span a match at `offset` is attributed to: the innermost span
/// around it, or the file's module span for top-level code.
fn source_at<'a>(index: &'a SpanIndex, file: &Path, offset: usize) -> Option<&'a Span> {
    index.enclosing(file, offset).or_else(|| index.module_span(file))
}

fn import_edges(index: &SpanIndex, file: &Path, text: &str, sink: &mut EdgeSink) {
    for site in find_imports(Language::from_path(file), text) {
        let Some(source) = source_at(index, file, site.offset) else {
            continue;
        };
        let modules = site.modules.iter().flat_map(|m| index.resolve_module(m));
        let items = site.names.iter().flat_map(|n| index.by_name(n));
        for target in modules.chain(items).filter(|t| t.path != file) {
            sink.push(source, target, EdgeType::Import, "import-pattern");
        }
    }
}

fn call_edges(index: &SpanIndex, file: &Path, text: &str, sink: &mut EdgeSink) {
    for (offset, name) in patterns::calls(text) {
        let Some(source) = source_at(index, file, offset) else {
            continue;
        };
        for target in index.resolve(name, file) {
            if !is_structural(target) {
                sink.push(source, target, EdgeType::Call, "call-pattern");
            }
        }
    }
}

fn config_edges(index: &SpanIndex, file: &Path, text: &str, sink: &mut EdgeSink) {
    for (offset, key) in patterns::config_keys(text) {
        let Some(source) = source_at(index, file, offset) else {
            continue;
        };
        for target in index.by_name(key) {
            sink.push(source, target, EdgeType::ConfigKey, "config-pattern");
        }
    }
}

fn route_edges(index: &SpanIndex, file: &Path, text: &str, sink: &mut EdgeSink) {
    for (offset, handler) in patterns::routes(text) {
        for target in index.resolve(handler, file) {
            if is_structural(target) {
                continue;
            }
            // A decorator may sit inside the handler's own span.
            let router = index
                .enclosing_except(file, offset, &target.id)
                .or_else(|| index.module_span(file));
            if let Some(router) = router {
                sink.push(router, target, EdgeType::Routes, "route-pattern");
            }
        }
    }
}

fn is_test_unit(span: &Span) -> bool {
    span.is_test() && !is_structural(span)
}

/// Whether a test name mentions a production span name.
fn names_subject(test: &Span, subject: &Span) -> bool {
    subject.name.len() >= 3
        && test
            .name
            .to_ascii_lowercase()
            .contains(&subject.name.to_ascii_lowercase())
}

/// `test_user.py`, `user_test.go`, `user.spec.ts`, `UserTest.java` -> `user`/`User`.
fn production_stem(test_file: &Path) -> Option<&str> {
    let stem = file_stem(test_file)?;
    let stem = stem.strip_prefix("test_").unwrap_or(stem);
    let stem = ["_test", "_spec", "Tests", "Test"]
        .iter()
        .find_map(|suffix| stem.strip_suffix(suffix))
        .unwrap_or(stem);
    (!stem.is_empty()).then_some(stem)
}

fn test_edges(index: &SpanIndex, sink: &mut EdgeSink) {
    let files = index.files();

    // Tests next to the code they exercise.
    for &file in &files {
        let spans = index.in_file(file);
        let subjects: Vec<&Span> = spans
            .iter()
            .copied()
            .filter(|s| !s.is_test() && !is_structural(s))
            .collect();
        for test in spans.iter().copied().filter(|s| is_test_unit(s)) {
            for subject in subjects.iter().copied().filter(|s| names_subject(test, s)) {
                sink.push(test, subject, EdgeType::TestOf, "test-name");
            }
        }
    }

    // Test files paired with production files by name.
    for &test_file in files.iter().filter(|f| is_test_path(f)) {
        let Some(stem) = production_stem(test_file) else {
            continue;
        };
        let production: Vec<&Path> = files
            .iter()
            .copied()
            .filter(|f| !is_test_path(f) && file_stem(f) == Some(stem))
            .collect();

        for &prod_file in &production {
            let subjects: Vec<&Span> = index
                .in_file(prod_file)
                .into_iter()
                .filter(|s| !is_structural(s))
                .collect();
            let prod_module = index.module_span(prod_file);

            if let (Some(test_module), Some(prod_module)) = (index.module_span(test_file), prod_module) {
                sink.push(test_module, prod_module, EdgeType::TestOf, "test-filename");
            }
            for test in index.in_file(test_file).into_iter().filter(|s| is_test_unit(s)) {
                let mut matched = false;
                for subject in subjects.iter().copied().filter(|s| names_subject(test, s)) {
                    sink.push(test, subject, EdgeType::TestOf, "test-filename");
                    matched = true;
                }
                if !matched {
                    if let Some(prod_module) = prod_module {
                        sink.push(test, prod_module, EdgeType::TestOf, "test-filename");
                    }
                }
            }
        }
    }
}
