//! Batch source reader
//!
//! Reads NDJSON files into `RawRecord`s and computes the batch content
//! hash. Container-level problems (missing file, unreadable bytes) are
//! source errors; a single malformed JSON line is not fatal and flows
//! through to the validator as an unparseable record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{EtlError, EtlResult};
use crate::types::RawRecord;

/// One read batch: the records plus the hash identifying their content
#[derive(Debug)]
pub struct SourceBatch {
    pub source_id: String,
    pub content_hash: String,
    pub records: Vec<RawRecord>,
}

/// Read one NDJSON file into a batch
///
/// The content hash is SHA-256 over the normalized (re-serialized)
/// payloads, so the same logical content hashes identically regardless
/// of whitespace or key order in the source file. The read itself is
/// bounded by `timeout` so a stalled filesystem cannot pin a worker.
pub async fn read_batch_file(path: &Path, timeout: Duration) -> EtlResult<SourceBatch> {
    let path_owned = path.to_path_buf();
    let read = tokio::task::spawn_blocking(move || std::fs::read(&path_owned));
    let contents = tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| EtlError::Source {
            path: path.to_path_buf(),
            message: format!("read timed out after {:?}", timeout),
        })?
        .map_err(|e| EtlError::Source {
            path: path.to_path_buf(),
            message: format!("read task failed: {}", e),
        })?
        .map_err(|e| EtlError::Source {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let text = String::from_utf8(contents).map_err(|e| EtlError::Source {
        path: path.to_path_buf(),
        message: format!("not valid UTF-8: {}", e),
    })?;

    let source_id = path.display().to_string();
    let mut records = Vec::new();
    let mut hasher = Sha256::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // A bad line still becomes a record so the validator can
        // quarantine it with a reason instead of the batch aborting
        let payload = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => Value::String(line.to_string()),
        };
        let normalized = serde_json::to_vec(&payload).map_err(|e| EtlError::Source {
            path: path.to_path_buf(),
            message: format!("payload re-serialization failed: {}", e),
        })?;
        hasher.update(&normalized);
        hasher.update(b"\n");

        records.push(RawRecord {
            record_id: Uuid::new_v4(),
            payload,
            source_id: source_id.clone(),
            content_hash: String::new(),
            received_at: Utc::now(),
        });
    }

    let content_hash = format!("{:x}", hasher.finalize());
    for record in &mut records {
        record.content_hash = content_hash.clone();
    }

    tracing::debug!(
        source_id = %source_id,
        records = records.len(),
        content_hash = %content_hash,
        "Batch file read"
    );

    Ok(SourceBatch {
        source_id,
        content_hash,
        records,
    })
}

/// Compute the content hash for an in-memory set of payloads
///
/// Used by the stream consumer so a micro-batch hashes the same way a
/// file batch does.
pub fn hash_payloads(payloads: &[Value]) -> String {
    let mut hasher = Sha256::new();
    for payload in payloads {
        // Value serialization to a Vec cannot fail
        if let Ok(normalized) = serde_json::to_vec(payload) {
            hasher.update(&normalized);
            hasher.update(b"\n");
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Discover batch files under a directory, sorted for determinism
pub fn discover_batch_files(root: &Path) -> EtlResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| EtlError::Source {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if matches!(ext, "ndjson" | "jsonl") {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    tracing::info!(root = %root.display(), files = files.len(), "Batch files discovered");
    Ok(files)
}
