//! Unit tests for spangraph-traverse module

use crate::*;
use spangraph_core::{
    CacheConfig, EdgeType, ExpansionStrategy, GraphEdge, GraphExpansion, GraphStorage,
    MemoryGraphStorage, TraversalConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// A small service graph: a route, its handler, a helper, a config key and
/// a test.
fn service_graph() -> Vec<GraphEdge> {
    vec![
        GraphEdge::new("router", "list_users", EdgeType::Routes, 0.6, "heuristic", "route-pattern"),
        GraphEdge::new("list_users", "load_users", EdgeType::Call, 1.0, "scip", "scip-occurrence"),
        GraphEdge::new("load_users", "PAGE_SIZE", EdgeType::ConfigKey, 0.6, "heuristic", "config-pattern"),
        GraphEdge::new("test_list_users", "list_users", EdgeType::TestOf, 0.6, "heuristic", "test-name"),
        GraphEdge::new("views", "services", EdgeType::Import, 0.8, "lsp", "lsp-references"),
    ]
}

async fn storage() -> Arc<MemoryGraphStorage> {
    Arc::new(MemoryGraphStorage::from_parts(&[], service_graph()).await)
}

fn request(config: &TraversalConfig, start: &[&str]) -> GraphExpansion {
    GraphExpansion::new("users endpoint", start.iter().map(|s| s.to_string()).collect())
        .max_depth(config.max_depth)
        .token_budget(config.token_budget)
}

#[tokio::test]
async fn test_budget_invariant_holds_for_every_budget() {
    let engine = BfsTraversalEngine::new(storage().await);
    for budget in [0, 1, 20, 60, 120, 4_000] {
        for strategy in [ExpansionStrategy::Breadth, ExpansionStrategy::QualityFirst] {
            let expansion = GraphExpansion::new("q", vec!["list_users".into()])
                .max_depth(3)
                .token_budget(budget)
                .strategy(strategy);
            let result = engine.expand_graph(&expansion).await;

            assert!(result.tokens_used <= result.token_budget, "budget {budget} overrun");
            let spent: usize = result.edges.iter().map(TokenCost::token_cost).sum();
            assert_eq!(spent, result.tokens_used);
            if !result.truncated {
                assert_eq!(result.edges.len(), 4, "untruncated traversal at {budget} missed edges");
            }
        }
    }
}

#[tokio::test]
async fn test_start_order_does_not_change_result() {
    let engine = BfsTraversalEngine::new(storage().await);
    let config = TraversalConfig::default();

    let forward = engine.expand_graph(&request(&config, &["list_users", "views"])).await;
    let backward = engine.expand_graph(&request(&config, &["views", "list_users"])).await;
    assert_eq!(forward.edges, backward.edges);
    assert_eq!(forward.visited_nodes, backward.visited_nodes);
    assert_eq!(
        cache_key(&request(&config, &["a", "b"])).unwrap(),
        cache_key(&request(&config, &["b", "a"])).unwrap()
    );
}

#[tokio::test]
async fn test_cached_engine_sees_graph_updates_after_invalidation() {
    let storage = storage().await;
    let engine = CachedTraversalEngine::new(
        BfsTraversalEngine::new(storage.clone()),
        &CacheConfig::default(),
    )
    .unwrap();
    let config = TraversalConfig::default();
    let handler = request(&config, &["list_users"]);
    let unrelated = request(&config, &["views"]);

    let before = engine.expand_graph(&handler).await;
    engine.expand_graph(&unrelated).await;
    assert!(before.visited_nodes.contains("load_users"));

    // Re-indexing the file that held load_users.
    assert!(storage.remove_node("load_users").await);
    assert!(!storage.node_exists("load_users").await.unwrap());
    engine.invalidate_for_nodes(&["load_users"]).await;

    let after = engine.expand_graph(&handler).await;
    assert!(!after.cache_hit);
    assert!(!after.visited_nodes.contains("load_users"));
    assert!(engine.expand_graph(&unrelated).await.cache_hit);
}

#[tokio::test]
async fn test_performance_threshold_is_informational() {
    let engine = BfsTraversalEngine::new(storage().await).with_performance_threshold(Duration::ZERO);
    assert_eq!(engine.performance_threshold(), Duration::ZERO);

    let result = engine
        .expand_graph(&GraphExpansion::new("q", vec!["router".into()]).max_depth(4))
        .await;
    assert!(!result.truncated);
    assert!(result.visited_nodes.contains("PAGE_SIZE"));
    assert!(result.performance_ms >= 0.0);
}

#[test]
fn test_result_serialization_shape() {
    let result = spangraph_core::TraversalResult::empty(&GraphExpansion::new("q", vec![]));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["visitedNodes"], serde_json::json!([]));
    assert_eq!(json["cacheHit"], false);
    assert_eq!(json["tokenBudget"], 4000);

    let usage = serde_json::to_value(TokenGuard::new(10).usage()).unwrap();
    assert_eq!(usage["remaining"], 10);
}
