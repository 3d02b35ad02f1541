//! JSON-RPC framing and the handful of LSP structures the extractor reads

use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// LSP `SymbolKind` values that denote callable symbols.
pub const SYMBOL_KIND_METHOD: u32 = 6;
pub const SYMBOL_KIND_CONSTRUCTOR: u32 = 9;
pub const SYMBOL_KIND_FUNCTION: u32 = 12;

pub fn is_callable_kind(kind: u32) -> bool {
    matches!(kind, SYMBOL_KIND_METHOD | SYMBOL_KIND_CONSTRUCTOR | SYMBOL_KIND_FUNCTION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationLink {
    pub target_uri: String,
    pub target_range: Range,
    pub target_selection_range: Range,
}

/// Hierarchical symbol from `textDocument/documentSymbol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: u32,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub children: Vec<DocumentSymbol>,
}

/// Flat symbol some servers return instead of [`DocumentSymbol`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: Location,
    #[serde(default)]
    pub container_name: Option<String>,
}

impl From<SymbolInformation> for DocumentSymbol {
    fn from(info: SymbolInformation) -> Self {
        DocumentSymbol {
            name: info.name,
            kind: info.kind,
            range: info.location.range,
            selection_range: info.location.range,
            children: Vec::new(),
        }
    }
}

/// Normalize a `documentSymbol` result, which may be hierarchical or flat.
pub fn parse_document_symbols(result: Value) -> Result<Vec<DocumentSymbol>> {
    let Some(items) = result.as_array() else {
        return Ok(Vec::new());
    };
    if items.first().is_some_and(|item| item.get("location").is_some()) {
        let flat: Vec<SymbolInformation> = serde_json::from_value(result)?;
        return Ok(flat.into_iter().map(DocumentSymbol::from).collect());
    }
    Ok(serde_json::from_value(result)?)
}

/// Normalize a `definition` result: `Location`, `Location[]`,
/// `LocationLink[]` or null.
pub fn parse_locations(result: Value) -> Result<Vec<Location>> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => Ok(vec![serde_json::from_value(result)?]),
        Value::Array(items) => {
            let is_links = items.first().is_some_and(|item| item.get("targetUri").is_some());
            let result = Value::Array(items);
            if is_links {
                let links: Vec<LocationLink> = serde_json::from_value(result)?;
                Ok(links
                    .into_iter()
                    .map(|l| Location {
                        uri: l.target_uri,
                        range: l.target_selection_range,
                    })
                    .collect())
            } else {
                Ok(serde_json::from_value(result)?)
            }
        }
        other => Err(ExtractError::Protocol(format!("unexpected location result: {other}"))),
    }
}

/// Largest message body accepted from a server.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Write one `Content-Length` framed message.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_string(message)?;
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| ExtractError::Protocol(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ExtractError::Protocol(format!("flush failed: {e}")))
}

/// Read one framed message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ExtractError::Protocol(format!("read failed: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let header = line.trim();
        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                let len = value
                    .trim()
                    .parse()
                    .map_err(|_| ExtractError::Protocol(format!("bad Content-Length: {value}")))?;
                content_length = Some(len);
            }
        }
    }

    let len = content_length.unwrap_or_default();
    if len > MAX_MESSAGE_BYTES {
        return Err(ExtractError::Protocol(format!(
            "message of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ExtractError::Protocol(format!("truncated message body: {e}")))?;
    Ok(Some(serde_json::from_slice(&body)?))
}
