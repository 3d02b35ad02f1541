//! Language server integration: JSON-RPC framing, a minimal client, and
//! the extractor built on top of it.

pub mod client;
pub mod extractor;
pub mod protocol;

pub use client::LspClient;
pub use extractor::{LspExtractor, LSP_CONFIDENCE};
