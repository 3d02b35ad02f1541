//! Span index for name and location based resolution

use crate::model::{file_stem, Span, SpanKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Read-only lookup tables over a batch of spans.
///
/// Extractors use it to turn a textual match (a called name, an imported
/// module, a reference location) back into span ids.
#[derive(Debug, Default)]
pub struct SpanIndex {
    spans: Vec<Span>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
    /// Sorted by `byte_start`.
    by_file: HashMap<PathBuf, Vec<usize>>,
}

impl SpanIndex {
    pub fn new(spans: &[Span]) -> Self {
        let mut index = SpanIndex {
            spans: spans.to_vec(),
            ..Default::default()
        };

        for (pos, span) in index.spans.iter().enumerate() {
            if index.by_id.insert(span.id.clone(), pos).is_some() {
                tracing::debug!(id = %span.id, "Duplicate span id; last one wins");
            }
            index.by_name.entry(span.name.clone()).or_default().push(pos);
            index.by_file.entry(span.path.clone()).or_default().push(pos);
        }

        let spans = &index.spans;
        for positions in index.by_file.values_mut() {
            positions.sort_by_key(|&p| (spans[p].byte_start, std::cmp::Reverse(spans[p].byte_end)));
        }

        index
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn get(&self, id: &str) -> Option<&Span> {
        self.by_id.get(id).map(|&p| &self.spans[p])
    }

    /// Every span with exactly this name.
    pub fn by_name(&self, name: &str) -> Vec<&Span> {
        self.by_name
            .get(name)
            .map(|positions| positions.iter().map(|&p| &self.spans[p]).collect())
            .unwrap_or_default()
    }

    /// Spans named `name`, preferring those in `from_file`.
    ///
    /// Same-file definitions shadow everything else; otherwise every
    /// candidate in the repository is returned.
    pub fn resolve(&self, name: &str, from_file: &Path) -> Vec<&Span> {
        let candidates = self.by_name(name);
        let local: Vec<&Span> = candidates
            .iter()
            .copied()
            .filter(|s| s.path == from_file)
            .collect();
        if local.is_empty() { candidates } else { local }
    }

    /// Spans of one file, ordered by start offset.
    pub fn in_file(&self, path: &Path) -> Vec<&Span> {
        self.by_file
            .get(path)
            .map(|positions| positions.iter().map(|&p| &self.spans[p]).collect())
            .unwrap_or_default()
    }

    /// Distinct file paths, sorted.
    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self.by_file.keys().map(PathBuf::as_path).collect();
        files.sort();
        files
    }

    /// The smallest span of `path` containing `offset`.
    pub fn enclosing(&self, path: &Path, offset: usize) -> Option<&Span> {
        self.in_file(path)
            .into_iter()
            .filter(|s| s.contains_offset(offset))
            .min_by_key(|s| s.len())
    }

    /// The smallest span containing `offset` other than `exclude`.
    pub fn enclosing_except(&self, path: &Path, offset: usize, exclude: &str) -> Option<&Span> {
        self.in_file(path)
            .into_iter()
            .filter(|s| s.id != exclude && s.contains_offset(offset))
            .min_by_key(|s| s.len())
    }

    /// The file- or module-level span of `path`, if the parser emitted one.
    pub fn module_span(&self, path: &Path) -> Option<&Span> {
        self.in_file(path)
            .into_iter()
            .filter(|s| matches!(s.kind, SpanKind::File | SpanKind::Module))
            .max_by_key(|s| s.len())
    }

    /// Spans standing for a module named `module`: module spans with that
    /// name, or the module span of any file whose stem is `module`.
    pub fn resolve_module(&self, module: &str) -> Vec<&Span> {
        let mut found: Vec<&Span> = self
            .by_name(module)
            .into_iter()
            .filter(|s| matches!(s.kind, SpanKind::Module | SpanKind::File))
            .collect();
        for path in self.files() {
            if file_stem(path) == Some(module) {
                if let Some(span) = self.module_span(path) {
                    if !found.iter().any(|s| s.id == span.id) {
                        found.push(span);
                    }
                }
            }
        }
        found
    }
}
