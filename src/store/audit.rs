// src/store/audit.rs

//! Append-only transition audit log.
//!
//! Every state transition is appended as one JSON line:
//! `{"t":"<rfc3339>","uid":"...","from":"...","to":"...","actor":"..."}`.
//! When the log grows past [`AUDIT_MAX_BYTES`] it is rotated to `<log>.1`
//! (replacing any previous rotation). Audit writes are best-effort: a
//! failed append is logged and swallowed, never allowed to fail the
//! transition it records.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Rotation threshold: 10 MiB.
pub const AUDIT_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    t: String,
    uid: &'a str,
    from: &'a str,
    to: &'a str,
    actor: &'a str,
}

/// Handle to the transition log file.
#[derive(Debug)]
pub struct TransitionLog {
    path: PathBuf,
    max_bytes: u64,
}

impl TransitionLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_bytes: AUDIT_MAX_BYTES,
        }
    }

    #[cfg(test)]
    pub fn with_max_bytes(path: PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    /// Append one transition entry, rotating afterwards if the file has
    /// grown past the ceiling.
    pub fn append(&self, uid: &str, from: &str, to: &str, actor: &str) {
        let entry = AuditEntry {
            t: Utc::now().to_rfc3339(),
            uid,
            from,
            to,
            actor,
        };
        if let Err(err) = self.try_append(&entry) {
            warn!(uid, error = %err, "failed to append transition audit entry");
        }
    }

    fn try_append(&self, entry: &AuditEntry<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        let size = file.metadata()?.len();
        if size > self.max_bytes {
            drop(file);
            let rotated = self.rotated_path();
            let _ = fs::remove_file(&rotated);
            fs::rename(&self.path, &rotated)?;
        }
        Ok(())
    }

    fn rotated_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".1");
        PathBuf::from(os)
    }
}
