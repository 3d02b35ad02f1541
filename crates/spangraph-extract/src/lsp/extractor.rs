//! Edge extraction backed by a running language server

use super::client::LspClient;
use super::protocol::{is_callable_kind, DocumentSymbol, Position};
use crate::error::Result;
use crate::extractor::{degrade_within, EdgeExtractor, EdgeSink, ExtractOptions};
use crate::heuristics::patterns;
use crate::languages::Language;
use crate::source::{path_to_uri, relative_to, uri_to_path, LineIndex, SourceFiles};
use async_trait::async_trait;
use spangraph_core::{EdgeType, GraphEdge, LspConfig, Span, SpanIndex, LSP_EXTRACTOR};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const LSP_CONFIDENCE: f32 = 0.8;

/// Derives call edges from references to each callable document symbol,
/// or, lacking reference support, from definitions of call sites.
///
/// Unsupported until an initialized client is attached.
#[derive(Debug, Clone)]
pub struct LspExtractor {
    root: PathBuf,
    client: Option<Arc<LspClient>>,
}

impl LspExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            client: None,
        }
    }

    pub fn with_client(root: impl Into<PathBuf>, client: Arc<LspClient>) -> Self {
        Self {
            root: root.into(),
            client: Some(client),
        }
    }

    /// Spawn and initialize the configured server. Any failure leaves the
    /// extractor unsupported rather than failing the caller.
    pub async fn connect(root: &Path, config: &LspConfig) -> Self {
        let root = tokio::fs::canonicalize(root)
            .await
            .unwrap_or_else(|_| root.to_path_buf());
        let Some(command) = config.command.as_deref() else {
            return Self::new(root);
        };

        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = match LspClient::spawn(command, &config.args, timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(command, error = %e, "Language server unavailable");
                return Self::new(root);
            }
        };
        if let Err(e) = client.initialize(&root).await {
            tracing::warn!(command, error = %e, "Language server failed to initialize");
            client.shutdown().await;
            return Self::new(root);
        }
        Self::with_client(root, Arc::new(client))
    }

    pub fn client(&self) -> Option<&Arc<LspClient>> {
        self.client.as_ref()
    }

    async fn extract_from(
        &self,
        client: &LspClient,
        index: &SpanIndex,
        sources: &SourceFiles,
        max_edges: usize,
    ) -> Result<Vec<GraphEdge>> {
        let mut sink = EdgeSink::new(LSP_EXTRACTOR, LSP_CONFIDENCE, max_edges);
        if !client.supports("documentSymbolProvider") {
            tracing::debug!("Language server has no document symbols; nothing to map");
            return Ok(Vec::new());
        }
        let use_references = client.supports("referencesProvider");
        let use_definitions = !use_references && client.supports("definitionProvider");

        let lines: HashMap<&Path, LineIndex<'_>> =
            sources.iter().map(|(path, text)| (path, LineIndex::new(text))).collect();
        let mapper = LocationMapper {
            index,
            lines: &lines,
            root: sources.root(),
        };

        for file in index.files() {
            if sink.is_full() {
                break;
            }
            let (Some(text), Some(file_lines)) = (sources.text(file), lines.get(file)) else {
                continue;
            };
            let uri = path_to_uri(&sources.resolve(file));
            let language = Language::from_path(file).language_id();
            if let Err(e) = client.did_open(&uri, language, text).await {
                tracing::warn!(file = %file.display(), error = %e, "didOpen failed");
                continue;
            }
            if use_references {
                let symbols = match client.document_symbols(&uri).await {
                    Ok(symbols) => symbols,
                    Err(e) => {
                        tracing::warn!(file = %file.display(), error = %e, "documentSymbol failed");
                        continue;
                    }
                };
                // Symbol nesting is containment, not a typed relationship, so
                // symbols only anchor reference lookups. Depth-first, document order.
                let mut stack: Vec<&DocumentSymbol> = symbols.iter().rev().collect();
                while let Some(symbol) = stack.pop() {
                    if is_callable_kind(symbol.kind) {
                        if let Some(target) = span_for_symbol(index, file, file_lines, symbol) {
                            self.reference_edges(client, &mapper, &uri, symbol, target, &mut sink)
                                .await;
                        }
                    }
                    stack.extend(symbol.children.iter().rev());
                }
            }

            if use_definitions {
                definition_edges(client, &mapper, file, &uri, text, file_lines, &mut sink).await;
            }
        }

        Ok(sink.into_edges())
    }

    async fn reference_edges(
        &self,
        client: &LspClient,
        mapper: &LocationMapper<'_>,
        uri: &str,
        symbol: &DocumentSymbol,
        target: &Span,
        sink: &mut EdgeSink,
    ) {
        let locations = match client.references(uri, symbol.selection_range.start, false).await {
            Ok(locations) => locations,
            Err(e) => {
                tracing::debug!(symbol = %symbol.name, error = %e, "references failed");
                return;
            }
        };
        for location in locations {
            let Some((path, offset)) = mapper.resolve(&location.uri, location.range.start) else {
                continue;
            };
            if let Some(caller) = mapper.index.enclosing(&path, offset) {
                sink.push(caller, target, EdgeType::Call, "lsp-references");
            }
        }
    }
}

/// Turns server locations back into repository-relative byte offsets.
struct LocationMapper<'a> {
    index: &'a SpanIndex,
    lines: &'a HashMap<&'a Path, LineIndex<'a>>,
    root: &'a Path,
}

impl LocationMapper<'_> {
    fn resolve(&self, uri: &str, position: Position) -> Option<(PathBuf, usize)> {
        let path = relative_to(&uri_to_path(uri)?, self.root);
        let offset = self
            .lines
            .get(path.as_path())?
            .offset(position.line, position.character)?;
        Some((path, offset))
    }
}

/// The span a document symbol denotes: the smallest same-named span of the
/// file around the symbol's name, else any same-named span of the file.
fn span_for_symbol<'a>(
    index: &'a SpanIndex,
    file: &Path,
    lines: &LineIndex<'_>,
    symbol: &DocumentSymbol,
) -> Option<&'a Span> {
    let named: Vec<&Span> = index
        .in_file(file)
        .into_iter()
        .filter(|s| s.name == symbol.name)
        .collect();
    let start = symbol.selection_range.start;
    lines
        .offset(start.line, start.character)
        .and_then(|offset| {
            named
                .iter()
                .copied()
                .filter(|s| s.contains_offset(offset))
                .min_by_key(|s| s.len())
        })
        .or_else(|| named.first().copied())
}

/// Ask for the definition of every call site in the file.
async fn definition_edges(
    client: &LspClient,
    mapper: &LocationMapper<'_>,
    file: &Path,
    uri: &str,
    text: &str,
    lines: &LineIndex<'_>,
    sink: &mut EdgeSink,
) {
    for (offset, name) in patterns::calls(text) {
        if sink.is_full() {
            return;
        }
        let (Some(caller), Some((line, character))) =
            (mapper.index.enclosing(file, offset), lines.position(offset))
        else {
            continue;
        };
        let definitions = match client.definition(uri, Position { line, character }).await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::debug!(name, error = %e, "definition failed");
                continue;
            }
        };
        for location in definitions {
            let Some((path, def_offset)) = mapper.resolve(&location.uri, location.range.start) else {
                continue;
            };
            let target = mapper
                .index
                .in_file(&path)
                .into_iter()
                .filter(|s| s.name == name && s.contains_offset(def_offset))
                .min_by_key(|s| s.len())
                .or_else(|| mapper.index.enclosing(&path, def_offset));
            if let Some(target) = target {
                sink.push(caller, target, EdgeType::Call, "lsp-definition");
            }
        }
    }
}

#[async_trait]
impl EdgeExtractor for LspExtractor {
    fn id(&self) -> &str {
        LSP_EXTRACTOR
    }

    fn confidence(&self) -> f32 {
        LSP_CONFIDENCE
    }

    fn is_supported(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.is_initialized())
    }

    async fn extract_edges(&self, spans: &[Span], options: &ExtractOptions) -> Result<Vec<GraphEdge>> {
        let Some(client) = self.client.as_deref().filter(|c| c.is_initialized()) else {
            return Ok(Vec::new());
        };
        let edges = degrade_within(LSP_EXTRACTOR, options, async {
            let index = SpanIndex::new(spans);
            let sources = SourceFiles::load(&self.root, index.files()).await;
            self.extract_from(client, &index, &sources, options.max_edges).await
        })
        .await;
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fake_lsp, span_of, temp_repo};
    use serde_json::{json, Value};
    use spangraph_core::SpanKind;

    const SERVICE: &str = "class Service:\n    def run(self):\n        helper()\n\ndef helper():\n    pass\n";

    fn range(line: u32, start: u32, end: u32) -> Value {
        json!({ "start": { "line": line, "character": start }, "end": { "line": line, "character": end } })
    }

    fn symbols() -> Value {
        json!([
            {
                "name": "Service", "kind": 5, "range": range(0, 0, 14), "selectionRange": range(0, 6, 13),
                "children": [
                    { "name": "run", "kind": 6, "range": range(1, 4, 22), "selectionRange": range(1, 8, 11) }
                ]
            },
            { "name": "helper", "kind": 12, "range": range(4, 0, 13), "selectionRange": range(4, 4, 10) }
        ])
    }

    fn spans() -> Vec<Span> {
        vec![
            span_of("cls", "svc.py", SpanKind::Class, "Service", "class Service:\n    def run(self):\n        helper()\n", SERVICE),
            span_of("run", "svc.py", SpanKind::Method, "run", "def run(self):\n        helper()\n", SERVICE),
            span_of("helper", "svc.py", SpanKind::Function, "helper", "def helper():\n    pass\n", SERVICE),
        ]
    }

    #[tokio::test]
    async fn unsupported_without_client() {
        let extractor = LspExtractor::new("/repo");
        assert!(!extractor.is_supported());
        let edges = extractor.extract_edges(&spans(), &ExtractOptions::default()).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn symbols_and_references_become_edges() {
        let repo = temp_repo(&[("svc.py", SERVICE)]);
        let uri = path_to_uri(&repo.path().join("svc.py"));
        let reference_uri = uri.clone();

        let (client, _) = fake_lsp(move |method, params| match method {
            "initialize" => Some(json!({ "capabilities": {
                "documentSymbolProvider": true, "referencesProvider": true
            }})),
            "textDocument/documentSymbol" => Some(symbols()),
            "textDocument/references" if params["position"]["line"] == 4 => Some(json!([
                { "uri": reference_uri, "range": range(2, 8, 14) }
            ])),
            "textDocument/references" => Some(json!([])),
            _ => None,
        });
        client.initialize(repo.path()).await.unwrap();
        let extractor = LspExtractor::with_client(repo.path(), Arc::new(client));
        assert!(extractor.is_supported());

        let edges = extractor.extract_edges(&spans(), &ExtractOptions::default()).await.unwrap();

        // Class -> method nesting is not reported as a relationship.
        assert!(!edges.iter().any(|e| e.source_id == "cls" && e.target_id == "run"));
        assert!(edges.iter().all(|e| e.edge_type == EdgeType::Call));

        let call = edges.iter().find(|e| e.edge_type == EdgeType::Call).unwrap();
        assert_eq!((call.source_id.as_str(), call.target_id.as_str()), ("run", "helper"));
        assert_eq!(call.metadata.method, "lsp-references");
        assert!(edges.iter().all(|e| (e.confidence - LSP_CONFIDENCE).abs() < f32::EPSILON));
    }

    #[tokio::test]
    async fn definitions_fill_in_without_references() {
        let repo = temp_repo(&[("svc.py", SERVICE)]);
        let uri = path_to_uri(&repo.path().join("svc.py"));

        let (client, _) = fake_lsp(move |method, params| match method {
            "initialize" => Some(json!({ "capabilities": {
                "documentSymbolProvider": true, "definitionProvider": true
            }})),
            "textDocument/documentSymbol" => Some(symbols()),
            "textDocument/definition" if params["position"]["line"] == 2 => {
                Some(json!({ "uri": uri, "range": range(4, 4, 10) }))
            }
            "textDocument/definition" => Some(Value::Null),
            _ => None,
        });
        client.initialize(repo.path()).await.unwrap();
        let extractor = LspExtractor::with_client(repo.path(), Arc::new(client));

        let edges = extractor.extract_edges(&spans(), &ExtractOptions::default()).await.unwrap();
        let call = edges.iter().find(|e| e.edge_type == EdgeType::Call).unwrap();
        assert_eq!((call.source_id.as_str(), call.target_id.as_str()), ("run", "helper"));
        assert_eq!(call.metadata.method, "lsp-definition");
    }
}
