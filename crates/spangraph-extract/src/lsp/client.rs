//! Minimal async LSP client over any byte stream pair.
//!
//! A reader task owns the server's output and routes each response to the
//! request waiting on its id; a writer task owns the server's input and
//! writes whole frames in order. A request that times out only forgets its
//! id, so a late or slow reply never desynchronizes the stream. Server
//! notifications are skipped, and server-to-client requests are answered
//! with a null result so the server never stalls waiting on us.

use super::protocol::{
    parse_document_symbols, parse_locations, read_message, write_message, DocumentSymbol,
    Location, Position,
};
use crate::error::{ExtractError, Result};
use crate::source::path_to_uri;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Requests in flight, by id, plus whether the connection is gone.
#[derive(Default)]
struct Pending {
    waiters: DashMap<u64, oneshot::Sender<Result<Value>>>,
    closed: AtomicBool,
}

impl Pending {
    /// Fail every waiter and refuse new ones.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waiters.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn connection_closed() -> ExtractError {
    ExtractError::Protocol("language server closed the connection".into())
}

pub struct LspClient {
    outgoing: mpsc::UnboundedSender<Value>,
    pending: Arc<Pending>,
    tasks: [JoinHandle<()>; 2],
    /// Server process when spawned by us; killed on drop.
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    capabilities: OnceLock<Value>,
    initialized: AtomicBool,
    /// Open document URI -> version.
    open_documents: DashMap<String, i64>,
    request_timeout: Duration,
}

impl std::fmt::Debug for LspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspClient")
            .field("initialized", &self.is_initialized())
            .field("in_flight", &self.pending.waiters.len())
            .field("open_documents", &self.open_documents.len())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl LspClient {
    /// Client over an existing connection (server stdout, server stdin).
    /// Must be called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        let writer_task = tokio::spawn(write_loop(writer, queue, Arc::clone(&pending)));
        let reader_task = tokio::spawn(read_loop(reader, outgoing.clone(), Arc::clone(&pending)));

        LspClient {
            outgoing,
            pending,
            tasks: [reader_task, writer_task],
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
            capabilities: OnceLock::new(),
            initialized: AtomicBool::new(false),
            open_documents: DashMap::new(),
            request_timeout,
        }
    }

    /// Launch a language server speaking LSP over stdio.
    pub fn spawn(command: &str, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Protocol("server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Protocol("server stdout unavailable".into()))?;

        let mut client = Self::new(stdout, stdin, request_timeout);
        *client.child.get_mut() = Some(child);
        tracing::debug!(command, "Spawned language server");
        Ok(client)
    }

    /// Perform the `initialize` handshake and record server capabilities.
    pub async fn initialize(&self, root: &Path) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let root_uri = path_to_uri(root);
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let params = json!({
            "processId": std::process::id(),
            "clientInfo": { "name": "spangraph", "version": env!("CARGO_PKG_VERSION") },
            "rootUri": root_uri,
            "workspaceFolders": [{ "uri": root_uri, "name": name }],
            "capabilities": {
                "textDocument": {
                    "synchronization": { "dynamicRegistration": false },
                    "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                    "references": {},
                    "definition": { "linkSupport": true }
                }
            }
        });

        let result = self.request("initialize", params).await?;
        let capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);
        let _ = self.capabilities.set(capabilities);
        self.notify("initialized", json!({})).await?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::debug!(root = %root.display(), "Language server initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn capabilities(&self) -> Option<&Value> {
        self.capabilities.get()
    }

    /// Whether the server advertised a provider, e.g. `"referencesProvider"`.
    pub fn supports(&self, provider: &str) -> bool {
        self.capabilities()
            .and_then(|caps| caps.get(provider))
            .is_some_and(|v| !matches!(v, Value::Null | Value::Bool(false)))
    }

    /// Open a document, or replace its full text if it is already open.
    pub async fn did_open(&self, uri: &str, language_id: &str, text: &str) -> Result<()> {
        let bumped = self.open_documents.get_mut(uri).map(|mut version| {
            *version += 1;
            *version
        });
        match bumped {
            Some(version) => {
                self.notify(
                    "textDocument/didChange",
                    json!({
                        "textDocument": { "uri": uri, "version": version },
                        "contentChanges": [{ "text": text }]
                    }),
                )
                .await
            }
            None => {
                self.open_documents.insert(uri.to_string(), 1);
                self.notify(
                    "textDocument/didOpen",
                    json!({
                        "textDocument": {
                            "uri": uri,
                            "languageId": language_id,
                            "version": 1,
                            "text": text
                        }
                    }),
                )
                .await
            }
        }
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.open_documents.contains_key(uri)
    }

    pub async fn document_symbols(&self, uri: &str) -> Result<Vec<DocumentSymbol>> {
        let result = self
            .request("textDocument/documentSymbol", json!({ "textDocument": { "uri": uri } }))
            .await?;
        parse_document_symbols(result)
    }

    pub async fn references(
        &self,
        uri: &str,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let result = self
            .request(
                "textDocument/references",
                json!({
                    "textDocument": { "uri": uri },
                    "position": position,
                    "context": { "includeDeclaration": include_declaration }
                }),
            )
            .await?;
        parse_locations(result)
    }

    /// Definition locations. A server without definition support yields none.
    pub async fn definition(&self, uri: &str, position: Position) -> Result<Vec<Location>> {
        let params = json!({ "textDocument": { "uri": uri }, "position": position });
        match self.request("textDocument/definition", params).await {
            Ok(result) => parse_locations(result),
            Err(e) if e.is_method_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Polite shutdown, then make sure a spawned server is gone.
    pub async fn shutdown(&self) {
        if self.is_initialized() {
            if let Err(e) = self.request("shutdown", Value::Null).await {
                tracing::debug!(error = %e, "Language server shutdown request failed");
            }
            let _ = self.notify("exit", Value::Null).await;
            self.initialized.store(false, Ordering::SeqCst);
        }
        self.open_documents.clear();

        if let Some(mut child) = self.child.lock().await.take() {
            let exited = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
            if exited.is_err() {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill language server");
                }
            }
        }
    }

    /// Whether the reader or writer has given up on the connection.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.outgoing.send(message).map_err(|_| connection_closed())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.pending.waiters.insert(id, reply);
        // Checked after inserting: a close racing with us clears the entry.
        if self.pending.is_closed() {
            self.pending.waiters.remove(&id);
            return Err(connection_closed());
        }

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if self.outgoing.send(message).is_err() {
            self.pending.waiters.remove(&id);
            return Err(connection_closed());
        }

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(connection_closed()),
            Err(_) => {
                self.pending.waiters.remove(&id);
                Err(ExtractError::Timeout {
                    operation: method.to_string(),
                    timeout: self.request_timeout,
                })
            }
        }
    }
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Value>, pending: Arc<Pending>)
where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::warn!(error = %e, "Language server input failed");
            break;
        }
    }
    pending.close();
}

async fn read_loop<R>(reader: R, outgoing: mpsc::UnboundedSender<Value>, pending: Arc<Pending>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let incoming = match read_message(&mut reader).await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => {
                tracing::debug!("Language server closed its output");
                break;
            }
            // The frame was consumed whole, so the stream is still in step.
            Err(ExtractError::Json(e)) => {
                tracing::warn!(error = %e, "Skipping unparsable language server message");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Language server output failed");
                break;
            }
        };

        match (incoming.get("id"), incoming.get("method")) {
            (Some(request_id), Some(server_method)) => {
                tracing::trace!(method = %server_method, "Answering server request with null");
                let reply = json!({ "jsonrpc": "2.0", "id": request_id, "result": null });
                if outgoing.send(reply).is_err() {
                    break;
                }
            }
            (None, Some(notification)) => {
                tracing::trace!(method = %notification, "Skipping server notification");
            }
            (Some(response_id), None) => {
                let waiter = response_id.as_u64().and_then(|id| pending.waiters.remove(&id));
                match waiter {
                    Some((_, reply)) => {
                        let _ = reply.send(response_result(&incoming));
                    }
                    None => tracing::debug!(id = %response_id, "Discarding response nobody waits for"),
                }
            }
            (None, None) => tracing::debug!("Discarding message without id or method"),
        }
    }
    pending.close();
}

fn response_result(response: &Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        return Err(ExtractError::Server {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fake_lsp;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn capabilities() -> Value {
        json!({ "capabilities": { "documentSymbolProvider": true, "referencesProvider": false } })
    }

    #[tokio::test]
    async fn initialize_records_capabilities() {
        let (client, log) = fake_lsp(|method, _| match method {
            "initialize" => Some(capabilities()),
            _ => None,
        });

        assert!(!client.is_initialized());
        client.initialize(Path::new("/repo")).await.unwrap();
        assert!(client.is_initialized());
        assert!(client.supports("documentSymbolProvider"));
        assert!(!client.supports("referencesProvider"));
        assert!(!client.supports("definitionProvider"));

        // The fake server interleaves a request of its own before answering;
        // getting here means the client answered it and kept going.
        client.did_open("file:///repo/a.py", "python", "x = 1").await.unwrap();
        client.did_open("file:///repo/a.py", "python", "x = 2").await.unwrap();
        assert!(client.is_open("file:///repo/a.py"));

        let _ = client.document_symbols("file:///repo/a.py").await;
        let seen = log.lock().unwrap().clone();
        assert!(seen.contains(&"initialized".to_string()));
        assert!(seen.contains(&"textDocument/didOpen".to_string()));
        assert!(seen.contains(&"textDocument/didChange".to_string()));
    }

    #[tokio::test]
    async fn optional_requests_degrade() {
        let (client, _) = fake_lsp(|method, _| match method {
            "initialize" => Some(capabilities()),
            _ => None,
        });
        client.initialize(Path::new("/repo")).await.unwrap();

        let position = Position { line: 0, character: 0 };
        assert!(client.definition("file:///repo/a.py", position).await.unwrap().is_empty());

        let err = client.document_symbols("file:///repo/a.py").await.unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[tokio::test]
    async fn definition_results() {
        let (client, _) = fake_lsp(|method, _| match method {
            "initialize" => Some(capabilities()),
            "textDocument/definition" => Some(json!({
                "uri": "file:///repo/b.py",
                "range": { "start": { "line": 2, "character": 4 }, "end": { "line": 2, "character": 9 } }
            })),
            _ => None,
        });
        client.initialize(Path::new("/repo")).await.unwrap();

        let position = Position { line: 1, character: 1 };
        let defs = client.definition("file:///repo/a.py", position).await.unwrap();
        assert_eq!(defs[0].uri, "file:///repo/b.py");
        assert_eq!(defs[0].range.start.line, 2);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (reader_end, _server_write) = tokio::io::duplex(1024);
        let (_server_read, writer_end) = tokio::io::duplex(1024);
        let client = LspClient::new(reader_end, writer_end, Duration::from_millis(50));

        let err = client.initialize(Path::new("/repo")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
        assert!(!client.is_initialized());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn late_split_reply_keeps_stream_in_step() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client_io);
        let client = LspClient::new(client_read, client_write, Duration::from_millis(100));

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut reader = BufReader::new(read);

            // Header and a few body bytes now, the rest after the client gave up.
            let first = read_message(&mut reader).await.unwrap().unwrap();
            let body = serde_json::to_vec(&json!({ "jsonrpc": "2.0", "id": first["id"], "result": "late" })).unwrap();
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            write.write_all(header.as_bytes()).await.unwrap();
            write.write_all(&body[..5]).await.unwrap();
            write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            write.write_all(&body[5..]).await.unwrap();
            write.flush().await.unwrap();

            let second = read_message(&mut reader).await.unwrap().unwrap();
            let reply = json!({ "jsonrpc": "2.0", "id": second["id"], "result": [] });
            write_message(&mut write, &reply).await.unwrap();
        });

        let first = client.document_symbols("file:///repo/a.py").await.unwrap_err();
        assert!(matches!(first, ExtractError::Timeout { .. }));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = client.document_symbols("file:///repo/a.py").await.unwrap();
        assert!(second.is_empty());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn closed_server_fails_requests_promptly() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let client = LspClient::new(client_read, client_write, Duration::from_secs(30));
        drop(server_io);

        let started = std::time::Instant::now();
        let err = client.document_symbols("file:///repo/a.py").await.unwrap_err();
        assert!(matches!(err, ExtractError::Protocol(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(client.is_closed());
    }
}
