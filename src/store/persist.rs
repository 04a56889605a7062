// src/store/persist.rs

//! Atomic file persistence primitives.
//!
//! Every durable write goes through write-to-temp + rename so a crash
//! mid-write leaves either the old or the new complete file on disk,
//! never a corrupt hybrid. Loads are lenient: a missing or unreadable
//! file yields the caller's fallback, since self-healing at startup
//! beats refusing to start.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::errors::StoreError;

/// Read and deserialize a JSON file, returning `fallback` if the file is
/// missing or unreadable. Parse errors are logged, not propagated.
pub fn load_json<T: DeserializeOwned>(path: &Path, fallback: T) -> T {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to parse stored JSON; using fallback");
                fallback
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => fallback,
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to read stored JSON; using fallback");
            fallback
        }
    }
}

/// Serialize `value` and atomically replace `path` with it.
///
/// On failure the temp file is cleaned up and the error propagates so the
/// caller can roll back its in-memory state.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let contents = serde_json::to_string_pretty(value).map_err(|source| StoreError::Encoding {
        path: path.display().to_string(),
        source,
    })?;
    save_bytes(path, contents.as_bytes())
}

/// Atomically replace `path` with the given text content.
///
/// Used for task content blobs (`<uid>.md`).
pub fn save_text(path: &Path, content: &str) -> Result<(), StoreError> {
    save_bytes(path, content.as_bytes())
}

fn save_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let write_result = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if let Err(source) = write_result {
        // Best-effort cleanup of the orphaned temp file.
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Persistence {
            path: path.display().to_string(),
            source,
        });
    }
    Ok(())
}
