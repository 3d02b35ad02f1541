//! Edge extraction: the extractor trait, its sidecar, language-server and
//! heuristic implementations, and the builder that merges them

pub mod builder;
pub mod error;
pub mod extractor;
pub mod heuristics;
pub mod languages;
pub mod lsp;
pub mod registry;
pub mod scip;
pub mod source;


#[cfg(test)]
pub mod test_utils;

pub use builder::{
    merge_edges, summarize, BuildOptions, BuildOutput, BuildStage, BuildSummary, GraphBuilder,
    IncrementalOutput,
};
pub use error::{ExtractError, Result};
pub use extractor::{EdgeExtractor, ExtractOptions};
pub use heuristics::{HeuristicExtractor, HEURISTIC_CONFIDENCE};
pub use languages::Language;
pub use lsp::{LspClient, LspExtractor, LSP_CONFIDENCE};
pub use registry::ExtractorRegistry;
pub use scip::{ScipExtractor, SCIP_CONFIDENCE};
pub use source::SourceFiles;
