//! Bounded breadth-first traversal of the span graph, with token budgeting
//! and a result cache

pub mod budget;
pub mod cache;
pub mod cached;
pub mod engine;
pub mod error;

#[cfg(test)]
pub mod tests;

pub use budget::{estimate_tokens, estimate_value_tokens, TokenCost, TokenGuard, TokenUsage};
pub use cache::{cache_key, CacheStats, TraversalCache};
pub use cached::CachedTraversalEngine;
pub use engine::{BfsTraversalEngine, TraversalEngine, DEFAULT_PERFORMANCE_THRESHOLD};
pub use error::{Result, TraversalError};
