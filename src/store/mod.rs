// src/store/mod.rs

//! Durable record store.
//!
//! Owns task records, workflows and periodic-schedule definitions, mirrored
//! between an in-memory index and JSON files under the data directory:
//!
//! - `records.json`: task records (uid-keyed in memory, vector on disk)
//! - `tasks/<uid>.md`: companion content blob per record
//! - `workflows.json`, `cron_jobs.json`, `scheduled_tasks.json`
//! - `transitions.log`: append-only transition audit trail (rotated)
//!
//! Every mutation persists via atomic temp-file+rename before it is
//! considered committed; on a failed write the in-memory change is rolled
//! back so memory and disk never diverge silently. Loading de-duplicates
//! records by uid, keeping the one whose state has progressed furthest.

pub mod audit;
pub mod persist;
pub mod records;
pub mod schedules;
pub mod workflows;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::StoreError;
use crate::fsm::LeaseTable;
use crate::store::audit::TransitionLog;
use crate::store::records::TaskRecord;
use crate::store::schedules::{CronJob, ScheduledTask};
use crate::workflow::model::Workflow;

pub use records::{
    ClaimOutcome, CompleteOutcome, ForceFailOutcome, RecordCounts, RecordFilter, RecordPage,
    RemoveOutcome, TransitionRequest, MAX_CONTENT_BYTES,
};
pub use schedules::{generate_id, ScheduledStatus};
pub use workflows::{WorkflowFilter, WorkflowPage};

/// The durable store. All mutation is `&mut self`; callers that share it
/// across tasks serialize access at a higher layer (see `engine::Runtime`).
pub struct Store {
    data_dir: PathBuf,
    tasks_dir: PathBuf,

    records: HashMap<String, TaskRecord>,
    workflows: Vec<Workflow>,
    cron_jobs: Vec<CronJob>,
    scheduled: Vec<ScheduledTask>,

    leases: LeaseTable,
    audit: TransitionLog,
}

impl Store {
    /// Open (or initialise) a store rooted at `data_dir`.
    ///
    /// Creates the directory layout if missing, loads every collection with
    /// a lenient parser, and self-heals duplicate record entries left behind
    /// by a previous non-atomic run.
    pub fn open(data_dir: impl Into<PathBuf>, leases: LeaseTable) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let tasks_dir = data_dir.join("tasks");
        for dir in [&data_dir, &tasks_dir] {
            fs::create_dir_all(dir).map_err(|source| StoreError::Persistence {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let raw_records: Vec<TaskRecord> =
            persist::load_json(&data_dir.join("records.json"), Vec::new());
        let workflows = persist::load_json(&data_dir.join("workflows.json"), Vec::new());
        let cron_jobs = persist::load_json(&data_dir.join("cron_jobs.json"), Vec::new());
        let scheduled = persist::load_json(&data_dir.join("scheduled_tasks.json"), Vec::new());

        let audit = TransitionLog::new(data_dir.join("transitions.log"));

        let loaded = raw_records.len();
        let records = dedup_by_uid(raw_records);
        let removed = loaded - records.len();

        let store = Self {
            data_dir,
            tasks_dir,
            records,
            workflows,
            cron_jobs,
            scheduled,
            leases,
            audit,
        };

        if removed > 0 {
            warn!(removed, "removed duplicate record entries at load; rewriting records.json");
            store.persist_records()?;
        }

        info!(
            records = store.records.len(),
            workflows = store.workflows.len(),
            data_dir = %store.data_dir.display(),
            "store opened"
        );
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn lease_table(&self) -> &LeaseTable {
        &self.leases
    }

    pub(crate) fn audit_log(&self) -> &TransitionLog {
        &self.audit
    }

    pub(crate) fn task_blob_path(&self, uid: &str) -> PathBuf {
        self.tasks_dir.join(format!("{uid}.md"))
    }

    pub(crate) fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.json")
    }

    pub(crate) fn workflows_path(&self) -> PathBuf {
        self.data_dir.join("workflows.json")
    }

    pub(crate) fn cron_jobs_path(&self) -> PathBuf {
        self.data_dir.join("cron_jobs.json")
    }

    pub(crate) fn scheduled_path(&self) -> PathBuf {
        self.data_dir.join("scheduled_tasks.json")
    }
}

/// De-duplicate records by uid, keeping the entry whose state has the
/// highest progress priority (completed > processing > claimed > failed >
/// pending).
fn dedup_by_uid(raw: Vec<TaskRecord>) -> HashMap<String, TaskRecord> {
    let mut best: HashMap<String, TaskRecord> = HashMap::with_capacity(raw.len());
    for rec in raw {
        match best.get(&rec.uid) {
            Some(existing)
                if existing.state.dedup_priority() >= rec.state.dedup_priority() => {}
            _ => {
                best.insert(rec.uid.clone(), rec);
            }
        }
    }
    best
}
