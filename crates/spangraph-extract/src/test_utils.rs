//! Test helpers: span construction over real text, scripted extractors,
//! and an in-process language server.

use crate::error::{ExtractError, Result};
use crate::extractor::{EdgeExtractor, ExtractOptions};
use crate::lsp::protocol::{read_message, write_message};
use crate::lsp::LspClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use spangraph_core::{EdgeType, GraphEdge, Span, SpanKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::BufReader;

/// A span covering the first occurrence of `snippet` in `source`.
pub fn span_of(id: &str, path: &str, kind: SpanKind, name: &str, snippet: &str, source: &str) -> Span {
    let start = source
        .find(snippet)
        .unwrap_or_else(|| panic!("{snippet:?} not found in {path}"));
    Span {
        id: id.to_string(),
        repo_id: "repo".to_string(),
        path: PathBuf::from(path),
        byte_start: start,
        byte_end: start + snippet.len(),
        kind,
        name: name.to_string(),
    }
}

/// Write files under a fresh temporary repository root.
pub fn temp_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    for (path, text) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, text).unwrap();
    }
    dir
}

/// Connect an [`LspClient`] to an in-process server driven by `handler`.
///
/// `handler` maps a request method and params to a result; `None` answers
/// with "method not found". Before answering `initialize` the server sends
/// a notification and a request of its own, as real servers do. Every
/// notification method the client sends is recorded in the returned log.
pub fn fake_lsp<F>(handler: F) -> (LspClient, Arc<Mutex<Vec<String>>>)
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
{
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let (client_read, client_write) = tokio::io::split(client_io);
    let log = Arc::new(Mutex::new(Vec::new()));
    let server_log = Arc::clone(&log);

    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut reader = BufReader::new(read);
        while let Ok(Some(message)) = read_message(&mut reader).await {
            let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
                // The client's reply to one of our requests.
                continue;
            };
            let Some(id) = message.get("id").cloned() else {
                server_log.lock().unwrap().push(method);
                continue;
            };

            if method == "initialize" {
                let log_message = json!({
                    "jsonrpc": "2.0", "method": "window/logMessage",
                    "params": { "type": 3, "message": "indexing" }
                });
                let config_request = json!({
                    "jsonrpc": "2.0", "id": "srv-1", "method": "workspace/configuration",
                    "params": { "items": [] }
                });
                let _ = write_message(&mut write, &log_message).await;
                let _ = write_message(&mut write, &config_request).await;
            }

            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let reply = match handler(&method, &params) {
                Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                None => json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": { "code": -32601, "message": format!("unhandled {method}") }
                }),
            };
            if write_message(&mut write, &reply).await.is_err() {
                break;
            }
        }
    });

    (LspClient::new(client_read, client_write, Duration::from_secs(2)), log)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Edges,
    Fail,
    Panic,
    Hang,
}

/// Extractor returning canned edges, or misbehaving on purpose.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    id: String,
    confidence: f32,
    supported: bool,
    behavior: MockBehavior,
    edges: Vec<GraphEdge>,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new(id: &str, confidence: f32) -> Self {
        Self {
            id: id.to_string(),
            confidence,
            supported: true,
            behavior: MockBehavior::Edges,
            edges: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an edge at this extractor's prior.
    pub fn edge(self, source: &str, target: &str, edge_type: EdgeType) -> Self {
        let confidence = self.confidence;
        self.edge_at(source, target, edge_type, confidence)
    }

    pub fn edge_at(mut self, source: &str, target: &str, edge_type: EdgeType, confidence: f32) -> Self {
        let edge = GraphEdge::new(source, target, edge_type, confidence, &self.id, "mock");
        self.edges.push(edge);
        self
    }

    pub fn behave(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EdgeExtractor for MockExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn extract_edges(&self, _spans: &[Span], _options: &ExtractOptions) -> Result<Vec<GraphEdge>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Edges => Ok(self.edges.clone()),
            MockBehavior::Fail => Err(ExtractError::Other(format!("{} exploded", self.id))),
            MockBehavior::Panic => panic!("{} panicked", self.id),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(self.edges.clone())
            }
        }
    }
}
