//! CLI command implementations

use crate::{BuildArgs, TraverseArgs};
use anyhow::Context;
use serde::Serialize;
use spangraph_core::{EngineConfig, GraphEdge, GraphExpansion, MemoryGraphStorage, Span};
use spangraph_extract::{BuildOptions, GraphBuilder, LspExtractor};
use spangraph_traverse::{BfsTraversalEngine, CachedTraversalEngine, TraversalEngine};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn build(root: &Path, config_path: Option<&Path>, args: &BuildArgs) -> anyhow::Result<()> {
    let config = load_config(root, config_path)?;
    let spans = load_spans(&args.spans)?;
    let options = build_options(&config, args)?;
    let session = BuildSession::start(root, &config).await;

    if args.incremental {
        let output = session.builder.build_graph_incremental(&spans, &options).await;
        tracing::info!("Stage {} produced {} edges", output.stage, output.edges.len());
        print_json(&output)?;
    } else {
        let output = session.builder.build_graph(&spans, &options).await;
        print_json(&output)?;
    }

    session.finish().await;
    Ok(())
}

pub async fn traverse(root: &Path, config_path: Option<&Path>, args: &TraverseArgs) -> anyhow::Result<()> {
    let config = load_config(root, config_path)?;
    let spans = load_spans(&args.build.spans)?;
    let options = build_options(&config, &args.build)?;
    let session = BuildSession::start(root, &config).await;

    let edges = session.edges(&spans, &options, args.build.incremental).await;
    session.finish().await;

    let storage = MemoryGraphStorage::from_parts(&spans, edges).await;
    tracing::info!(
        "Loaded {} nodes, {} edges",
        storage.node_count().await,
        storage.edge_count().await
    );

    let threshold = Duration::from_millis(config.traversal.performance_threshold_ms);
    let bfs = BfsTraversalEngine::new(Arc::new(storage)).with_performance_threshold(threshold);
    let engine = CachedTraversalEngine::new(bfs, &config.cache).context("Invalid cache configuration")?;

    let expansion = GraphExpansion::new(args.query.clone(), args.start.clone())
        .max_depth(args.depth.unwrap_or(config.traversal.max_depth))
        .token_budget(args.budget.unwrap_or(config.traversal.token_budget))
        .edge_types(args.edge_types.iter().copied())
        .strategy(args.strategy);
    let result = engine.expand_graph(&expansion).await;
    engine.shutdown().await;

    if result.truncated {
        tracing::info!("Traversal stopped at the token budget ({} tokens)", result.tokens_used);
    }
    print_json(&result)
}

/// The builder plus the language server it may have started.
struct BuildSession {
    builder: GraphBuilder,
    lsp: Option<Arc<LspExtractor>>,
}

impl BuildSession {
    async fn start(root: &Path, config: &EngineConfig) -> Self {
        if config.lsp.command.is_none() {
            return Self {
                builder: GraphBuilder::from_config(root, config),
                lsp: None,
            };
        }
        let lsp = Arc::new(LspExtractor::connect(root, &config.lsp).await);
        Self {
            builder: GraphBuilder::with_language_server(root, config, Arc::clone(&lsp)),
            lsp: Some(lsp),
        }
    }

    async fn edges(&self, spans: &[Span], options: &BuildOptions, incremental: bool) -> Vec<GraphEdge> {
        if incremental {
            self.builder.build_graph_incremental(spans, options).await.edges
        } else {
            self.builder.build_graph(spans, options).await.edges
        }
    }

    async fn finish(self) {
        if let Some(client) = self.lsp.as_ref().and_then(|lsp| lsp.client()) {
            client.shutdown().await;
        }
    }
}

fn load_config(root: &Path, config_path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match config_path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::discover(root),
    };
    config.context("Failed to load configuration")
}

fn load_spans(path: &Path) -> anyhow::Result<Vec<Span>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read span file {}", path.display()))?;
    let spans: Vec<Span> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse span file {}", path.display()))?;
    tracing::info!("Loaded {} spans from {}", spans.len(), path.display());
    Ok(spans)
}

fn build_options(config: &EngineConfig, args: &BuildArgs) -> anyhow::Result<BuildOptions> {
    let mut options = BuildOptions::from(&config.builder);
    if !args.extractors.is_empty() {
        options = options.extractors(args.extractors.iter().cloned());
    }
    if let Some(threshold) = args.threshold {
        anyhow::ensure!(
            (0.0..=1.0).contains(&threshold),
            "--threshold must be within [0, 1], got {threshold}"
        );
        options = options.confidence_threshold(threshold);
    }
    Ok(options)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
