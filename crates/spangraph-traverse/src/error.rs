//! Error types for traversal and caching

use spangraph_core::GraphError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraversalError>;

#[derive(Error, Debug)]
pub enum TraversalError {
    #[error("Failed to build cache key: {0}")]
    CacheKey(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
