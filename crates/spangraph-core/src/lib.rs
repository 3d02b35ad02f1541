//! Spangraph Core: span and edge model, graph storage, span index

pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod storage;
pub mod symbols;


#[cfg(test)]
pub mod test_utils;

pub use config::{
    BuilderConfig, CacheConfig, EngineConfig, LspConfig, SidecarConfig, TraversalConfig,
    CONFIG_FILE, HEURISTIC_EXTRACTOR, LSP_EXTRACTOR, SCIP_EXTRACTOR,
};
pub use error::{GraphError, Result};
pub use graph::{EdgeUpsert, SpanGraph, SpanNode};
pub use model::{
    file_stem, is_test_path, EdgeKey, EdgeMetadata, EdgeType, ExpansionStrategy,
    ExtractionResult, GraphEdge, GraphExpansion, Span, SpanId, SpanKind, TraversalResult,
};
pub use storage::{GraphStorage, IngestStats, MemoryGraphStorage};
pub use symbols::SpanIndex;
