//! Writing container diagnostics to disk.
//!
//! After a failed test the inspect document and the output of each
//! container are worth keeping. Files are named after the container:
//! `<name>.json` for the inspect document and `<name>.txt` for the log.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use shipyard_common::error::{Result, ShipyardError};
use shipyard_engine::EngineClient;
use tokio_util::sync::CancellationToken;

/// Returns the path of a container's inspect dump.
#[must_use]
pub fn inspect_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

/// Returns the path of a container's log dump.
#[must_use]
pub fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.txt"))
}

/// Reads everything a container wrote so far, stdout and stderr
/// interleaved in arrival order.
///
/// # Errors
///
/// Returns [`ShipyardError::Cancelled`] once `cancel` fires and an error if
/// the log stream cannot be read.
pub async fn read_container_log(
    engine: &dyn EngineClient,
    container_id: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut stream = engine.container_logs(container_id, false, cancel);
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ShipyardError::engine("read container log", e))?;
        bytes.extend_from_slice(&chunk.bytes);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes the engine's inspect document of a container to `<name>.json`.
///
/// # Errors
///
/// Returns an error if the container cannot be inspected or the file cannot
/// be written.
pub async fn dump_inspect(
    engine: &dyn EngineClient,
    container_id: &str,
    name: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let snapshot = engine
        .inspect_container(container_id, cancel)
        .await
        .map_err(|e| ShipyardError::engine("inspect container", e))?;
    let json = serde_json::to_vec_pretty(&snapshot.detail)?;
    let path = inspect_path(dir, name);
    write_file(dir, &path, &json).await?;
    tracing::debug!(container = name, path = %path.display(), "inspect document written");
    Ok(path)
}

/// Writes a container's output to `<name>.txt`.
///
/// # Errors
///
/// Returns an error if the log cannot be read or the file cannot be written.
pub async fn dump_container_log(
    engine: &dyn EngineClient,
    container_id: &str,
    name: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let log = read_container_log(engine, container_id, cancel).await?;
    let path = log_path(dir, name);
    write_file(dir, &path, log.as_bytes()).await?;
    tracing::debug!(container = name, path = %path.display(), "container log written");
    Ok(path)
}

async fn write_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ShipyardError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| ShipyardError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Writes a container log framed by a header and a footer naming the
/// container.
///
/// # Errors
///
/// Returns any error of the underlying writer.
pub fn write_log<W: Write>(writer: &mut W, name: &str, log: &str) -> std::io::Result<()> {
    writeln!(writer, "------ Container Log '{name}':")?;
    writer.write_all(log.as_bytes())?;
    if !log.is_empty() && !log.ends_with('\n') {
        writeln!(writer)?;
    }
    writeln!(writer, "------ End of '{name}' container log.")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use shipyard_engine::client::LogSource;
    use shipyard_engine::memory::MemoryEngine;

    use super::*;

    #[test]
    fn paths_are_named_after_container() {
        let dir = Path::new("/tmp/logs");
        assert_eq!(inspect_path(dir, "db-1"), Path::new("/tmp/logs/db-1.json"));
        assert_eq!(log_path(dir, "db-1"), Path::new("/tmp/logs/db-1.txt"));
    }

    #[test]
    fn write_log_frames_output() {
        let mut out = Vec::new();
        write_log(&mut out, "web", "line one\nline two").expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            "------ Container Log 'web':\nline one\nline two\n------ End of 'web' container log.\n"
        );
    }

    #[test]
    fn write_log_of_empty_output_keeps_frame() {
        let mut out = Vec::new();
        write_log(&mut out, "web", "").expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            "------ Container Log 'web':\n------ End of 'web' container log.\n"
        );
    }

    #[tokio::test]
    async fn dumps_log_and_inspect_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested");
        let engine = MemoryEngine::new();
        let id = engine.add_container("db", HashMap::new(), true);
        engine.push_log(&id, LogSource::Stdout, "ready\n");
        engine.push_log(&id, LogSource::Stderr, "slow query\n");

        let cancel = CancellationToken::new();
        let log = dump_container_log(&engine, &id, "db", &target, &cancel).await.expect("log");
        let inspect = dump_inspect(&engine, &id, "db", &target, &cancel)
            .await
            .expect("inspect");

        assert_eq!(std::fs::read_to_string(log).expect("read"), "ready\nslow query\n");
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(inspect).expect("read")).expect("json");
        assert_eq!(doc["State"]["Running"], true);
    }

    #[tokio::test]
    async fn cancelled_log_read_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = MemoryEngine::new();
        let id = engine.add_container("db", HashMap::new(), true);
        engine.push_log(&id, LogSource::Stdout, "ready\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = dump_container_log(&engine, &id, "db", dir.path(), &cancel).await;
        assert!(matches!(result, Err(ShipyardError::Cancelled)));
        assert!(!log_path(dir.path(), "db").exists());
    }

    #[tokio::test]
    async fn inspect_of_missing_container_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = MemoryEngine::new();
        let result = dump_inspect(&engine, "gone", "gone", dir.path(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ShipyardError::Engine { .. })));
    }
}
