//! Integration tests for Spangraph
//!
//! These tests drive extraction, storage and traversal together, and the
//! CLI binary end to end.

use async_trait::async_trait;
use spangraph_core::{
    CacheConfig, EdgeType, EngineConfig, ExpansionStrategy, GraphEdge, GraphExpansion,
    MemoryGraphStorage, SidecarConfig, Span, SpanKind,
};
use spangraph_extract::{
    BuildOptions, BuildStage, EdgeExtractor, ExtractOptions, GraphBuilder, HeuristicExtractor,
};
use spangraph_traverse::{BfsTraversalEngine, CachedTraversalEngine, TraversalEngine};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

const VIEWS: &str = "\
from services import load_user

@app.route('/users')
def outer():
    return inner()

def inner():
    return load_user(settings.PAGE_SIZE)
";

const SERVICES: &str = "\
def load_user(limit):
    return []
";

const SETTINGS: &str = "PAGE_SIZE = 20\n";

const TESTS: &str = "\
from services import load_user

def test_load_user():
    assert load_user(1) == []
";

fn write_repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, text) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, text).unwrap();
    }
    dir
}

fn span(id: &str, path: &str, kind: SpanKind, name: &str, snippet: &str, source: &str) -> Span {
    let start = source.find(snippet).unwrap();
    Span {
        id: id.to_string(),
        repo_id: "demo".to_string(),
        path: PathBuf::from(path),
        byte_start: start,
        byte_end: start + snippet.len(),
        kind,
        name: name.to_string(),
    }
}

fn repo() -> (TempDir, Vec<Span>) {
    let dir = write_repo(&[
        ("app/views.py", VIEWS),
        ("app/services.py", SERVICES),
        ("app/settings.py", SETTINGS),
        ("tests/test_services.py", TESTS),
    ]);
    let spans = vec![
        span("views", "app/views.py", SpanKind::Module, "views", VIEWS, VIEWS),
        span("outer", "app/views.py", SpanKind::Function, "outer", "def outer():\n    return inner()\n", VIEWS),
        span("inner", "app/views.py", SpanKind::Function, "inner", "def inner():\n    return load_user(settings.PAGE_SIZE)\n", VIEWS),
        span("services", "app/services.py", SpanKind::Module, "services", SERVICES, SERVICES),
        span("load_user", "app/services.py", SpanKind::Function, "load_user", "def load_user(limit):\n    return []\n", SERVICES),
        span("page_size", "app/settings.py", SpanKind::Config, "PAGE_SIZE", SETTINGS, SETTINGS),
        span("test_load_user", "tests/test_services.py", SpanKind::Function, "test_load_user", "def test_load_user():\n    assert load_user(1) == []\n", TESTS),
    ];
    (dir, spans)
}

fn offline_config() -> EngineConfig {
    EngineConfig {
        sidecar: SidecarConfig {
            binary: PathBuf::from("spangraph-integration-no-indexer"),
            extra_args: Vec::new(),
        },
        ..EngineConfig::default()
    }
}

fn has(edges: &[GraphEdge], source: &str, target: &str, edge_type: EdgeType) -> bool {
    edges
        .iter()
        .any(|e| e.source_id == source && e.target_id == target && e.edge_type == edge_type)
}

fn chain(ids: &[&str]) -> Vec<GraphEdge> {
    ids.windows(2)
        .map(|w| GraphEdge::new(w[0], w[1], EdgeType::Call, 0.8, "test", "manual"))
        .collect()
}

/// Extractor that always fails, or returns fixed edges.
struct Scripted {
    id: &'static str,
    edges: Option<Vec<GraphEdge>>,
}

#[async_trait]
impl EdgeExtractor for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    fn confidence(&self) -> f32 {
        0.9
    }

    fn is_supported(&self) -> bool {
        true
    }

    async fn extract_edges(&self, _: &[Span], _: &ExtractOptions) -> spangraph_extract::Result<Vec<GraphEdge>> {
        self.edges
            .clone()
            .ok_or_else(|| spangraph_extract::ExtractError::Other("scripted failure".into()))
    }
}

/// A call inside one function's text links it to the callee.
#[tokio::test]
async fn test_basic_call_graph() {
    let src = "def outer():\n    inner()\n\ndef inner():\n    pass\n";
    let dir = write_repo(&[("m.py", src)]);
    let spans = vec![
        span("A", "m.py", SpanKind::Function, "outer", "def outer():\n    inner()\n", src),
        span("B", "m.py", SpanKind::Function, "inner", "def inner():\n    pass\n", src),
    ];

    let edges = HeuristicExtractor::new(dir.path())
        .extract_edges(&spans, &ExtractOptions::default())
        .await
        .unwrap();

    assert_eq!(edges.len(), 1);
    assert!(has(&edges, "A", "B", EdgeType::Call));
    assert!((edges[0].confidence - 0.6).abs() < f32::EPSILON);
}

/// Every relation family comes out of one heuristic build.
#[tokio::test]
async fn test_heuristic_build_covers_all_relations() {
    let (dir, spans) = repo();
    let builder = GraphBuilder::from_config(dir.path(), &offline_config());
    let output = builder.build_graph(&spans, &BuildOptions::default()).await;

    let edges = &output.edges;
    assert!(has(edges, "outer", "inner", EdgeType::Call));
    assert!(has(edges, "inner", "load_user", EdgeType::Call));
    assert!(has(edges, "views", "services", EdgeType::Import));
    assert!(has(edges, "inner", "page_size", EdgeType::ConfigKey));
    assert!(has(edges, "views", "outer", EdgeType::Routes));
    assert!(has(edges, "test_load_user", "load_user", EdgeType::TestOf));
    assert_eq!(output.summary.total_edges, edges.len());
    assert_eq!(output.summary.average_confidence, 0.6);
}

/// Edges under the threshold never reach the output.
#[tokio::test]
async fn test_threshold_filtering() {
    let weak = GraphEdge::new("a", "b", EdgeType::Call, 0.3, "weak", "manual");
    let builder = GraphBuilder::default().with_extractor(Arc::new(Scripted {
        id: "weak",
        edges: Some(vec![weak]),
    }));

    let options = BuildOptions::default().extractors(["weak"]).confidence_threshold(0.5);
    let output = builder.build_graph(&[], &options).await;

    assert!(output.edges.is_empty());
    assert_eq!(output.results[0].edges.len(), 1);
}

/// A failing extractor costs its healthy sibling nothing.
#[tokio::test]
async fn test_extractor_isolation() {
    let healthy = || Scripted {
        id: "healthy",
        edges: Some(chain(&["a", "b", "c"])),
    };
    let alone = GraphBuilder::default().with_extractor(Arc::new(healthy()));
    let together = GraphBuilder::default()
        .with_extractor(Arc::new(healthy()))
        .with_extractor(Arc::new(Scripted { id: "broken", edges: None }));

    let solo = alone
        .build_graph(&[], &BuildOptions::default().extractors(["healthy"]))
        .await;
    let shared = together
        .build_graph(&[], &BuildOptions::default().extractors(["broken", "healthy"]))
        .await;

    assert_eq!(solo.edges.len(), 2);
    assert_eq!(shared.edges.len(), solo.edges.len());
    assert_eq!(shared.results[0].error.as_deref(), Some("scripted failure"));
}

/// Without a sidecar or language server the ladder ends on heuristics.
#[tokio::test]
async fn test_incremental_build_ladder() {
    let (dir, spans) = repo();
    let builder = GraphBuilder::from_config(dir.path(), &offline_config());
    let output = builder
        .build_graph_incremental(&spans, &BuildOptions::default())
        .await;
    assert_eq!(output.stage, BuildStage::Heuristic);
    assert!(!output.edges.is_empty());

    let empty = builder.build_graph_incremental(&[], &BuildOptions::default()).await;
    assert_eq!(empty.stage, BuildStage::Complete);
    assert_eq!(empty.confidence, 0.0);
}

/// Depth one from the head of a chain reaches one neighbour only.
#[tokio::test]
async fn test_depth_limit() {
    let storage = MemoryGraphStorage::from_parts(&[], chain(&["A", "B", "C", "D"])).await;
    let engine = BfsTraversalEngine::new(Arc::new(storage));

    let result = engine
        .expand_graph(&GraphExpansion::new("q", vec!["A".into()]).max_depth(1))
        .await;

    let visited: Vec<&str> = result.visited_nodes.iter().map(String::as_str).collect();
    assert_eq!(visited, ["A", "B"]);
}

/// A budget smaller than any edge truncates immediately.
#[tokio::test]
async fn test_tiny_budget() {
    let storage = MemoryGraphStorage::from_parts(&[], chain(&["A", "B", "C", "D"])).await;
    let engine = BfsTraversalEngine::new(Arc::new(storage));

    let result = engine
        .expand_graph(&GraphExpansion::new("q", vec!["A".into()]).token_budget(1))
        .await;

    assert!(result.truncated);
    assert!(result.edges.is_empty());
    assert!(result.tokens_used <= result.token_budget);
}

/// Build, store, and traverse twice: the repeat is served from cache.
#[tokio::test]
async fn test_cache_hit_after_build() {
    let (dir, spans) = repo();
    let builder = GraphBuilder::from_config(dir.path(), &offline_config());
    let output = builder.build_graph(&spans, &BuildOptions::default()).await;

    let storage = MemoryGraphStorage::from_parts(&spans, output.edges).await;
    let engine = CachedTraversalEngine::new(
        BfsTraversalEngine::new(Arc::new(storage)),
        &CacheConfig::default(),
    )
    .unwrap();
    let expansion = GraphExpansion::new("users", vec!["outer".into()])
        .max_depth(2)
        .strategy(ExpansionStrategy::QualityFirst);

    let first = engine.expand_graph(&expansion).await;
    let second = engine.expand_graph(&expansion).await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.visited_nodes, second.visited_nodes);
    assert_eq!(first.edges, second.edges);
    assert!(first.visited_nodes.contains("load_user"));
    engine.shutdown().await;
}

/// Invalidating a node drops exactly the entries that touched it.
#[tokio::test]
async fn test_invalidation_precision() {
    let mut edges = chain(&["A", "B"]);
    edges.extend(chain(&["X", "Y"]));
    let storage = MemoryGraphStorage::from_parts(&[], edges).await;
    let engine = CachedTraversalEngine::new(
        BfsTraversalEngine::new(Arc::new(storage)),
        &CacheConfig::default(),
    )
    .unwrap();
    let left = GraphExpansion::new("q", vec!["A".into()]);
    let right = GraphExpansion::new("q", vec!["X".into()]);
    engine.expand_graph(&left).await;
    engine.expand_graph(&right).await;

    assert_eq!(engine.invalidate_for_nodes(&["B"]).await, 1);
    assert!(!engine.expand_graph(&left).await.cache_hit);
    assert!(engine.expand_graph(&right).await.cache_hit);
}

fn spangraph(root: &Path, args: &[&str]) -> serde_json::Value {
    let output = Command::new(env!("CARGO_BIN_EXE_spangraph"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("failed to run spangraph");
    assert!(
        output.status.success(),
        "spangraph failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn cli_repo() -> TempDir {
    let (dir, spans) = repo();
    std::fs::write(dir.path().join("spans.json"), serde_json::to_string(&spans).unwrap()).unwrap();
    std::fs::write(
        dir.path().join("spangraph.toml"),
        "[builder]\nextractors = [\"heuristic\"]\ntimeout_ms = 2000\n",
    )
    .unwrap();
    dir
}

/// The binary prints the builder output as JSON.
#[test]
fn test_cli_build() {
    let dir = cli_repo();
    let spans = dir.path().join("spans.json");
    let json = spangraph(dir.path(), &["build", "--spans", spans.to_str().unwrap()]);

    assert_eq!(json["results"][0]["extractorId"], "heuristic");
    assert!(json["summary"]["totalEdges"].as_u64().unwrap() > 0);
    assert!(json["edges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["sourceId"] == "outer" && e["targetId"] == "inner" && e["type"] == "call"));
}

/// The binary prints a traversal result as JSON.
#[test]
fn test_cli_traverse() {
    let dir = cli_repo();
    let spans = dir.path().join("spans.json");
    let json = spangraph(
        dir.path(),
        &[
            "traverse",
            "--spans",
            spans.to_str().unwrap(),
            "--start",
            "outer",
            "--depth",
            "1",
            "--edge-type",
            "call",
        ],
    );

    assert_eq!(json["startSymbols"], serde_json::json!(["outer"]));
    assert_eq!(json["expansionDepth"], 1);
    assert_eq!(json["cacheHit"], false);
    let visited = json["visitedNodes"].as_array().unwrap();
    assert!(visited.iter().any(|n| n == "inner"));
    assert!(!visited.iter().any(|n| n == "load_user"));
}

/// An out-of-range threshold is a usage error, not an empty graph.
#[test]
fn test_cli_rejects_bad_threshold() {
    let dir = cli_repo();
    let spans = dir.path().join("spans.json");
    let output = Command::new(env!("CARGO_BIN_EXE_spangraph"))
        .arg("--root")
        .arg(dir.path())
        .args(["build", "--spans", spans.to_str().unwrap(), "--threshold", "1.5"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--threshold"));
}

/// Version subcommand works without a repository.
#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_spangraph"))
        .arg("version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Spangraph v"));
}
