//! Core data structures for the span relationship graph

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a span, assigned by the parsing collaborator.
pub type SpanId = String;

/// Discriminates what kind of code entity a span represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    // ── Containers ──────────────────────────────────────────
    File,
    Module,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Impl,

    // ── Callables ───────────────────────────────────────────
    Function,
    Method,
    Constructor,

    // ── Values ──────────────────────────────────────────────
    Constant,
    Variable,
    Config,

    // ── Fallback ────────────────────────────────────────────
    #[serde(other)]
    Unknown,
}

/// A located, typed unit of parsed source code.
///
/// Spans are produced by the parsing collaborator and are immutable here;
/// identity is the `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub id: SpanId,
    pub repo_id: String,
    /// Path relative to the repository root.
    pub path: PathBuf,
    pub byte_start: usize,
    pub byte_end: usize,
    pub kind: SpanKind,
    pub name: String,
}

impl Span {
    /// Whether `offset` falls inside `[byte_start, byte_end)`.
    pub fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.byte_start && offset < self.byte_end
    }

    pub fn len(&self) -> usize {
        self.byte_end.saturating_sub(self.byte_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Module name derived from the file stem (`src/auth/service.py` -> `service`).
    pub fn module_name(&self) -> Option<&str> {
        file_stem(&self.path)
    }

    /// Name- and path-based guess at whether this span is test code.
    pub fn is_test(&self) -> bool {
        is_test_name(&self.name) || is_test_path(&self.path)
    }
}

/// `test`/`Test` as a whole word at the start of a name: `test_login`,
/// `testLogin`, `TestLogin`, `Test`. Not `Testimonial` or `testament`.
fn is_test_name(name: &str) -> bool {
    ["test", "Test"].iter().any(|prefix| {
        name.strip_prefix(prefix).is_some_and(|rest| {
            rest.chars()
                .next()
                .is_none_or(|c| c == '_' || c.is_ascii_uppercase())
        })
    })
}

/// File stem without any test/spec infixes (`user.test.ts` -> `user`).
pub fn file_stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.split('.').next().filter(|s| !s.is_empty())
}

/// Whether a path looks like a test file or lives in a test directory.
pub fn is_test_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("Test.")
    {
        return true;
    }
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("tests") | Some("test") | Some("__tests__")
        )
    })
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeType {
    Call,
    Import,
    TestOf,
    Routes,
    ConfigKey,
}

impl EdgeType {
    pub const ALL: [EdgeType; 5] = [
        EdgeType::Call,
        EdgeType::Import,
        EdgeType::TestOf,
        EdgeType::Routes,
        EdgeType::ConfigKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::Call => "call",
            EdgeType::Import => "import",
            EdgeType::TestOf => "test-of",
            EdgeType::Routes => "routes",
            EdgeType::ConfigKey => "config-key",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown edge type: {s}"))
    }
}

/// Provenance of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeMetadata {
    pub extractor_id: String,
    /// Concrete technique, e.g. `call-pattern` or `lsp-references`.
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Logical identity of an edge. Two edges with the same key are the same fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source_id: SpanId,
    pub target_id: SpanId,
    pub edge_type: EdgeType,
}

/// A directed, typed, confidence-scored relationship between two spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source_id: SpanId,
    pub target_id: SpanId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// In `[0, 1]`; the producing extractor's prior.
    pub confidence: f32,
    pub metadata: EdgeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
}

impl GraphEdge {
    pub fn new(
        source_id: impl Into<SpanId>,
        target_id: impl Into<SpanId>,
        edge_type: EdgeType,
        confidence: f32,
        extractor_id: &str,
        method: &str,
    ) -> Self {
        GraphEdge {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: EdgeMetadata {
                extractor_id: extractor_id.to_string(),
                method: method.to_string(),
                created_at: Utc::now(),
            },
            weight: None,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            edge_type: self.edge_type,
        }
    }
}

/// Outcome of one extractor invocation. Always produced, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub edges: Vec<GraphEdge>,
    pub extractor_id: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn failed(extractor_id: &str, duration_ms: u64, error: impl Into<String>) -> Self {
        ExtractionResult {
            edges: Vec::new(),
            extractor_id: extractor_id.to_string(),
            duration_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Order in which candidate edges of one BFS level meet the token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpansionStrategy {
    #[default]
    Breadth,
    QualityFirst,
}

impl FromStr for ExpansionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breadth" => Ok(ExpansionStrategy::Breadth),
            "quality-first" => Ok(ExpansionStrategy::QualityFirst),
            other => Err(format!("unknown expansion strategy: {other}")),
        }
    }
}

/// A traversal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphExpansion {
    pub query: String,
    pub start_symbols: Vec<SpanId>,
    pub max_depth: usize,
    pub token_budget: usize,
    /// Empty means every edge type.
    #[serde(default)]
    pub edge_types: Vec<EdgeType>,
    #[serde(default)]
    pub expansion_strategy: ExpansionStrategy,
}

impl GraphExpansion {
    pub fn new(query: impl Into<String>, start_symbols: Vec<SpanId>) -> Self {
        GraphExpansion {
            query: query.into(),
            start_symbols,
            max_depth: 2,
            token_budget: 4000,
            edge_types: Vec::new(),
            expansion_strategy: ExpansionStrategy::Breadth,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn edge_types(mut self, types: impl IntoIterator<Item = EdgeType>) -> Self {
        self.edge_types = types.into_iter().collect();
        self
    }

    pub fn strategy(mut self, strategy: ExpansionStrategy) -> Self {
        self.expansion_strategy = strategy;
        self
    }

    /// Edge-type filter in the form storage expects.
    pub fn edge_filter(&self) -> Option<&[EdgeType]> {
        if self.edge_types.is_empty() {
            None
        } else {
            Some(&self.edge_types)
        }
    }
}

/// Bounded result of a BFS traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalResult {
    pub query: String,
    pub start_symbols: Vec<SpanId>,
    pub visited_nodes: BTreeSet<SpanId>,
    pub edges: Vec<GraphEdge>,
    pub expansion_depth: usize,
    pub tokens_used: usize,
    pub token_budget: usize,
    /// Set iff the token budget stopped expansion early.
    pub truncated: bool,
    pub performance_ms: f64,
    pub cache_hit: bool,
}

impl TraversalResult {
    pub fn empty(expansion: &GraphExpansion) -> Self {
        TraversalResult {
            query: expansion.query.clone(),
            start_symbols: expansion.start_symbols.clone(),
            visited_nodes: BTreeSet::new(),
            edges: Vec::new(),
            expansion_depth: 0,
            tokens_used: 0,
            token_budget: expansion.token_budget,
            truncated: false,
            performance_ms: 0.0,
            cache_hit: false,
        }
    }

    /// Whether the traversal touched `node_id` as a seed or a visited node.
    pub fn touches(&self, node_id: &str) -> bool {
        self.visited_nodes.contains(node_id) || self.start_symbols.iter().any(|s| s == node_id)
    }
}
