//! Sidecar indexer process management

use crate::error::{ExtractError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Whether `binary` resolves to an executable, either as a path or via `PATH`.
pub fn binary_available(binary: &Path) -> bool {
    which::which(binary).is_ok()
}

/// Argument list for one indexing run.
pub fn index_args(root: &Path, files: &[PathBuf], extra_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "index".to_string(),
        "--project-root".to_string(),
        root.display().to_string(),
        "--output".to_string(),
        "-".to_string(),
    ];
    args.extend(extra_args.iter().cloned());
    if !files.is_empty() {
        args.push("--files".to_string());
        args.extend(files.iter().map(|f| f.display().to_string()));
    }
    args
}

/// Run the indexer and return its stdout.
///
/// The child is killed if it outlives `timeout`, and also when the
/// returned future is dropped early.
pub async fn run_indexer(binary: &Path, args: &[String], timeout: Duration) -> Result<Vec<u8>> {
    let program = binary.display().to_string();
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExtractError::Spawn {
            program: program.clone(),
            source,
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExtractError::Protocol("indexer stdout unavailable".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExtractError::Protocol("indexer stderr unavailable".into()))?;

    let collect = async {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let (out_read, err_read) =
            tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        out_read.and(err_read).map_err(|source| ExtractError::Io {
            path: binary.to_path_buf(),
            source,
        })?;
        let status = child.wait().await.map_err(|source| ExtractError::Io {
            path: binary.to_path_buf(),
            source,
        })?;
        Ok::<_, ExtractError>((status, out, err))
    };

    let (status, out, err) = match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %program, error = %e, "Failed to kill indexer");
            }
            return Err(ExtractError::Timeout {
                operation: program,
                timeout,
            });
        }
    };

    if !status.success() {
        return Err(ExtractError::ProcessFailed {
            program,
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&err).trim().to_string(),
        });
    }
    if !err.is_empty() {
        tracing::debug!(program = %program, stderr = %String::from_utf8_lossy(&err).trim(), "Indexer stderr");
    }
    Ok(out)
}
