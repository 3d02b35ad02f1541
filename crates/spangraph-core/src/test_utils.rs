//! Test utilities for span fixtures

use crate::model::{EdgeType, GraphEdge, Span, SpanKind};
use std::path::PathBuf;

/// Build a span without caring about its repository.
pub fn span(id: &str, path: &str, kind: SpanKind, name: &str, range: (usize, usize)) -> Span {
    Span {
        id: id.to_string(),
        repo_id: "repo".to_string(),
        path: PathBuf::from(path),
        byte_start: range.0,
        byte_end: range.1,
        kind,
        name: name.to_string(),
    }
}

/// A chain `ids[0] -> ids[1] -> ...` of call edges.
pub fn call_chain(ids: &[&str]) -> Vec<GraphEdge> {
    ids.windows(2)
        .map(|w| GraphEdge::new(w[0], w[1], EdgeType::Call, 0.8, "test", "manual"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_chain() {
        let edges = call_chain(&["a", "b", "c"]);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].source_id, "b");
        assert_eq!(edges[1].target_id, "c");
    }
}
