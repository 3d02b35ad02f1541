//! Source text access for extractors: file loading, span slicing, and
//! line/column to byte offset conversion.

use crate::error::{ExtractError, Result};
use spangraph_core::Span;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Texts of the files a span batch refers to, read relative to a root.
#[derive(Debug, Default, Clone)]
pub struct SourceFiles {
    root: PathBuf,
    texts: HashMap<PathBuf, Arc<str>>,
}

impl SourceFiles {
    /// Read every listed file. Unreadable or non-UTF-8 files are skipped
    /// with a debug log; extractors simply see no text for them.
    pub async fn load<'a, I>(root: &Path, paths: I) -> Self
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut files = SourceFiles {
            root: root.to_path_buf(),
            texts: HashMap::new(),
        };
        for path in paths {
            if files.texts.contains_key(path) {
                continue;
            }
            match read_text(&files.resolve(path)).await {
                Ok(text) => {
                    files.texts.insert(path.to_path_buf(), Arc::from(text));
                }
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping source file"),
            }
        }
        files
    }

    /// In-memory sources, mainly for tests.
    pub fn from_texts<I, P, S>(root: &Path, texts: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<PathBuf>,
        S: AsRef<str>,
    {
        SourceFiles {
            root: root.to_path_buf(),
            texts: texts
                .into_iter()
                .map(|(p, s)| (p.into(), Arc::from(s.as_ref())))
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a span path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn text(&self, path: &Path) -> Option<&str> {
        self.texts.get(path).map(|t| &**t)
    }

    /// The `[byte_start, byte_end)` slice of a span, if it lies on
    /// character boundaries within the file.
    pub fn slice(&self, span: &Span) -> Option<&str> {
        self.text(&span.path)?.get(span.byte_start..span.byte_end)
    }

    /// Every loaded `(path, text)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.texts.iter().map(|(p, t)| (p.as_path(), &**t))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

async fn read_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes)
        .map_err(|_| ExtractError::Other(format!("{} is not valid UTF-8", path.display())))
}

/// Line start offsets of one text, for converting zero-based
/// `(line, character)` positions into byte offsets.
///
/// Characters are counted in UTF-16 code units, as language servers do.
#[derive(Debug)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        LineIndex { text, starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub fn offset(&self, line: u32, character: u32) -> Option<usize> {
        let start = *self.starts.get(line as usize)?;
        let end = self
            .starts
            .get(line as usize + 1)
            .copied()
            .unwrap_or(self.text.len());
        let line_text = &self.text[start..end];

        let mut units = 0u32;
        for (i, ch) in line_text.char_indices() {
            if units >= character {
                return Some(start + i);
            }
            units += ch.len_utf16() as u32;
        }
        Some(end)
    }

    /// Inverse of [`offset`](Self::offset).
    pub fn position(&self, offset: usize) -> Option<(u32, u32)> {
        if offset > self.text.len() {
            return None;
        }
        let line = self.starts.partition_point(|&s| s <= offset) - 1;
        let prefix = self.text.get(self.starts[line]..offset)?;
        let character: usize = prefix.chars().map(char::len_utf16).sum();
        Some((line as u32, character as u32))
    }
}

/// `file://` URI for an absolute path.
pub fn path_to_uri(path: &Path) -> String {
    let mut uri = String::from("file://");
    for byte in path.to_string_lossy().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'-' | b'_' | b'.' | b'~' => {
                uri.push(byte as char)
            }
            _ => uri.push_str(&format!("%{byte:02X}")),
        }
    }
    uri
}

/// Path of a `file://` URI; `None` for other schemes or bad escapes.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let encoded = uri.strip_prefix("file://")?;
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok().map(PathBuf::from)
}

/// `path` relative to `root` when it lies inside it.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index_round_trips_positions() {
        let text = "def a():\n    b()\n\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.offset(1, 4), Some(13));
        assert_eq!(index.position(13), Some((1, 4)));
        assert_eq!(index.offset(1, 99), Some(text.find("\n\n").unwrap() + 1));
        assert_eq!(index.offset(9, 0), None);
    }

    #[test]
    fn line_index_counts_utf16_units() {
        let text = "x = \"é😀\"; call()";
        let index = LineIndex::new(text);
        let call = text.find("call").unwrap();
        // "x = \"" (5) + é (1) + 😀 (2) + "\"; " (3)
        assert_eq!(index.offset(0, 11), Some(call));
        assert_eq!(index.position(call), Some((0, 11)));
    }

    #[test]
    fn uris_round_trip() {
        let path = Path::new("/tmp/my repo/src/app.py");
        let uri = path_to_uri(path);
        assert_eq!(uri, "file:///tmp/my%20repo/src/app.py");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
        assert!(uri_to_path("untitled:Untitled-1").is_none());
        assert_eq!(
            relative_to(Path::new("/tmp/my repo/src/app.py"), Path::new("/tmp/my repo")),
            PathBuf::from("src/app.py")
        );
    }

    #[tokio::test]
    async fn load_skips_missing_and_slices_spans() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    pass\n").unwrap();

        let files = SourceFiles::load(dir.path(), [Path::new("a.py"), Path::new("gone.py")]).await;
        assert_eq!(files.len(), 1);
        assert!(files.text(Path::new("gone.py")).is_none());

        let span = Span {
            id: "a".into(),
            repo_id: "r".into(),
            path: PathBuf::from("a.py"),
            byte_start: 4,
            byte_end: 5,
            kind: spangraph_core::SpanKind::Function,
            name: "a".into(),
        };
        assert_eq!(files.slice(&span), Some("a"));
        let past_end = Span { byte_end: 500, ..span };
        assert_eq!(files.slice(&past_end), None);
    }
}
