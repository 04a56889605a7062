// src/store/records.rs

//! Task record CRUD and the lease protocol.
//!
//! A record's `claim_generation` is the optimistic-concurrency token: it is
//! bumped every time a lease is forcibly reclaimed (timeout), so a worker
//! whose lease expired and was handed to someone else cannot complete the
//! task out from under the new holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::fsm::{self, TaskState};
use crate::store::{persist, Store};
use crate::workflow::model::StepStatus;

/// Byte ceiling for persisted task content and results; anything longer is
/// truncated at a char boundary.
pub const MAX_CONTENT_BYTES: usize = 50_000;

/// Pagination limit ceiling for record queries.
const MAX_QUERY_LIMIT: usize = 500;

/// A unit of claimable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub uid: String,

    /// Name of the companion content blob under the tasks directory.
    pub filename: String,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    pub state: TaskState,

    /// Selects the lease duration ("general", "research", "code", ...).
    #[serde(default = "default_category")]
    pub task_category: String,

    /// Worker currently holding the lease, if any.
    pub claimed_by: Option<String>,

    /// RFC 3339 timestamp of the most recent claim. Kept as a string so a
    /// corrupt value degrades to "expired" instead of failing the load.
    pub claimed_at: Option<String>,

    /// Bumped on every forced lease reclaim, never decremented.
    #[serde(default)]
    pub claim_generation: u64,

    /// Output of the work, set on completion only.
    pub result: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Outcome of a claim attempt. These are expected contention results, not
/// errors: a polling worker uses them to decide between "mine now" and
/// "try another task".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { claim_generation: u64 },
    AlreadyClaimed,
    NotFound,
    InvalidState,
}

/// Outcome of the processing -> completed shortcut.
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    Completed(TaskRecord),
    NotFound,
    StaleClaim,
    InvalidState,
}

/// Outcome of a removal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    /// Record is past `pending`; history is kept, not erased.
    NotCancellable,
    /// Record backs a step of a non-terminal workflow.
    WorkflowTask,
}

/// Outcome of a workflow-cancellation force-fail.
#[derive(Debug, Clone)]
pub enum ForceFailOutcome {
    Failed(TaskRecord),
    Removed,
    AlreadyTerminal,
    NotFound,
}

/// Options for a generic FSM transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    pub worker_id: Option<String>,
    pub claim_generation: Option<u64>,
    pub result: Option<String>,
    /// Bypass worker-identity checks. Reserved for workflow-driven
    /// cancellation, where the worker may already be gone.
    pub force: bool,
}

/// Record query filters plus pagination.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub state: Option<TaskState>,
    pub task_category: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// One page of query results. `total` is the filtered count *before*
/// pagination so callers can compute page counts.
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub total: usize,
    pub records: Vec<TaskRecord>,
}

/// Per-state record counts for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub pending: usize,
    pub claimed: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Store {
    /// Add a new task record with its companion content blob.
    ///
    /// Idempotent by design: a duplicate uid is logged and skipped, not an
    /// error, to tolerate at-least-once delivery upstream. If persisting
    /// `records.json` fails, the in-memory insert and the blob are both
    /// rolled back.
    pub fn add_record(
        &mut self,
        uid: &str,
        content: &str,
        category: &str,
    ) -> Result<(), StoreError> {
        if self.records.contains_key(uid) {
            debug!(uid, "add_record: uid already exists; skipping");
            return Ok(());
        }

        let blob_path = self.task_blob_path(uid);
        persist::save_text(&blob_path, truncate_utf8(content, MAX_CONTENT_BYTES))?;

        let record = TaskRecord {
            uid: uid.to_string(),
            filename: format!("{uid}.md"),
            created_at: Utc::now().to_rfc3339(),
            state: TaskState::Pending,
            task_category: category.to_string(),
            claimed_by: None,
            claimed_at: None,
            claim_generation: 0,
            result: None,
        };
        self.records.insert(uid.to_string(), record);

        if let Err(err) = self.persist_records() {
            self.records.remove(uid);
            let _ = std::fs::remove_file(&blob_path);
            return Err(err);
        }

        info!(uid, category, "task record added");
        Ok(())
    }

    /// Look up a record by uid.
    pub fn get_record(&self, uid: &str) -> Option<TaskRecord> {
        self.records.get(uid).cloned()
    }

    /// Read a record's companion content blob.
    pub fn task_content(&self, uid: &str) -> Option<String> {
        let rec = self.records.get(uid)?;
        std::fs::read_to_string(self.tasks_dir.join(&rec.filename)).ok()
    }

    /// Claim a record for a worker (poll-claim-work).
    pub fn claim(&mut self, uid: &str, worker_id: &str) -> Result<ClaimOutcome, StoreError> {
        self.claim_at(uid, worker_id, Utc::now())
    }

    /// Claim with an explicit `now`, for deterministic tests.
    ///
    /// If the current holder's lease has expired the record is first
    /// force-released back to pending with `claim_generation += 1`, then
    /// claimed normally, all inside this one call, so a racing second
    /// claimant never observes the intermediate state.
    pub fn claim_at(
        &mut self,
        uid: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let Some(rec) = self.records.get(uid) else {
            return Ok(ClaimOutcome::NotFound);
        };

        let ttl = self.lease_table().for_category(&rec.task_category);
        let expired = fsm::is_claim_expired(rec.claimed_at.as_deref(), ttl, now);

        if rec.state == TaskState::Claimed && !expired {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let prev = rec.clone();
        let mut next_rec = prev.clone();

        let mut reclaimed = false;
        if next_rec.state == TaskState::Claimed && expired {
            next_rec.state = TaskState::Pending;
            next_rec.claim_generation += 1;
            reclaimed = true;
        }

        let from = next_rec.state;
        match fsm::transition(from, TaskState::Claimed) {
            Ok(next) => next_rec.state = next,
            Err(_) => return Ok(ClaimOutcome::InvalidState),
        }

        next_rec.claimed_by = Some(worker_id.to_string());
        next_rec.claimed_at = Some(now.to_rfc3339());
        let generation = next_rec.claim_generation;

        self.records.insert(uid.to_string(), next_rec);
        if let Err(err) = self.persist_records() {
            self.records.insert(uid.to_string(), prev);
            return Err(err);
        }

        if reclaimed {
            self.audit_log()
                .append(uid, TaskState::Claimed.as_str(), TaskState::Pending.as_str(), "timeout");
        }
        self.audit_log()
            .append(uid, from.as_str(), TaskState::Claimed.as_str(), worker_id);

        Ok(ClaimOutcome::Claimed {
            claim_generation: generation,
        })
    }

    /// Generic FSM transition with worker-identity and generation gates.
    ///
    /// Only the current lease holder may move `claimed -> processing` or
    /// `processing -> {completed, failed}` unless `force` is set. A supplied
    /// `claim_generation` on a completion must match the record's or the
    /// call fails with `StaleClaim`.
    pub fn transition(
        &mut self,
        uid: &str,
        target: TaskState,
        req: &TransitionRequest,
    ) -> Result<TaskRecord, StoreError> {
        let Some(rec) = self.records.get(uid) else {
            return Err(StoreError::NotFound(uid.to_string()));
        };
        let from = rec.state;

        let worker_gated = matches!(
            (from, target),
            (TaskState::Claimed, TaskState::Processing)
                | (TaskState::Processing, TaskState::Completed)
                | (TaskState::Processing, TaskState::Failed)
        );
        if worker_gated && !req.force {
            if let (Some(worker), Some(holder)) = (&req.worker_id, &rec.claimed_by) {
                if worker != holder {
                    return Err(StoreError::WorkerMismatch {
                        expected: holder.clone(),
                        got: worker.clone(),
                    });
                }
            }
        }

        if target == TaskState::Completed {
            if let Some(generation) = req.claim_generation {
                if generation != rec.claim_generation {
                    return Err(StoreError::StaleClaim);
                }
            }
        }

        let next = fsm::transition(from, target)?;

        let prev = rec.clone();
        let mut updated = prev.clone();
        updated.state = next;
        if target == TaskState::Completed {
            if let Some(result) = &req.result {
                updated.result = Some(truncate_utf8(result, MAX_CONTENT_BYTES).to_string());
            }
        }
        if target.is_terminal() {
            updated.claimed_by = None;
            updated.claimed_at = None;
        }

        self.records.insert(uid.to_string(), updated.clone());
        if let Err(err) = self.persist_records() {
            self.records.insert(uid.to_string(), prev);
            return Err(err);
        }

        let actor = req.worker_id.as_deref().unwrap_or("api");
        self.audit_log()
            .append(uid, from.as_str(), target.as_str(), actor);

        Ok(updated)
    }

    /// Back-compatible shortcut for `processing -> completed`.
    ///
    /// The generation check only applies when the caller supplies one;
    /// clients that cannot echo the token skip it.
    pub fn mark_completed(
        &mut self,
        uid: &str,
        claim_generation: Option<u64>,
        result: Option<&str>,
    ) -> Result<CompleteOutcome, StoreError> {
        let Some(rec) = self.records.get(uid) else {
            return Ok(CompleteOutcome::NotFound);
        };
        if rec.state != TaskState::Processing {
            return Ok(CompleteOutcome::InvalidState);
        }
        if let Some(generation) = claim_generation {
            if generation != rec.claim_generation {
                return Ok(CompleteOutcome::StaleClaim);
            }
        }

        let prev = rec.clone();
        let mut updated = prev.clone();
        updated.state = TaskState::Completed;
        if let Some(result) = result {
            updated.result = Some(truncate_utf8(result, MAX_CONTENT_BYTES).to_string());
        }
        updated.claimed_by = None;
        updated.claimed_at = None;

        self.records.insert(uid.to_string(), updated.clone());
        if let Err(err) = self.persist_records() {
            self.records.insert(uid.to_string(), prev);
            return Err(err);
        }

        self.audit_log().append(
            uid,
            TaskState::Processing.as_str(),
            TaskState::Completed.as_str(),
            "system",
        );
        Ok(CompleteOutcome::Completed(updated))
    }

    /// Sweep all claimed records and release any whose lease has expired,
    /// bumping their generation. Returns the number released.
    pub fn release_expired_claims(&mut self) -> Result<usize, StoreError> {
        self.release_expired_claims_at(Utc::now())
    }

    /// Sweep with an explicit `now`, for deterministic tests.
    pub fn release_expired_claims_at(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let leases = *self.lease_table();
        let snapshot = self.records.clone();

        let mut released: Vec<String> = Vec::new();
        for rec in self.records.values_mut() {
            if rec.state != TaskState::Claimed {
                continue;
            }
            let ttl = leases.for_category(&rec.task_category);
            if fsm::is_claim_expired(rec.claimed_at.as_deref(), ttl, now) {
                rec.state = TaskState::Pending;
                rec.claimed_by = None;
                rec.claimed_at = None;
                rec.claim_generation += 1;
                released.push(rec.uid.clone());
            }
        }

        if released.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.persist_records() {
            self.records = snapshot;
            return Err(err);
        }

        for uid in &released {
            self.audit_log().append(
                uid,
                TaskState::Claimed.as_str(),
                TaskState::Pending.as_str(),
                "timeout",
            );
        }
        info!(released = released.len(), "released expired claims");
        Ok(released.len())
    }

    /// Force a record to `failed`, bypassing the FSM and identity checks.
    ///
    /// Operator/cancellation path only: pending records are removed outright
    /// (nothing ever ran), non-terminal ones become failed, terminal ones
    /// are left untouched.
    pub fn force_fail(&mut self, uid: &str) -> Result<ForceFailOutcome, StoreError> {
        let Some(rec) = self.records.get(uid) else {
            return Ok(ForceFailOutcome::NotFound);
        };
        if rec.state.is_terminal() {
            return Ok(ForceFailOutcome::AlreadyTerminal);
        }
        if rec.state == TaskState::Pending {
            self.remove_record_unchecked(uid)?;
            return Ok(ForceFailOutcome::Removed);
        }

        let prev = rec.clone();
        let from = prev.state;
        let mut updated = prev.clone();
        updated.state = TaskState::Failed;
        updated.claimed_by = None;
        updated.claimed_at = None;

        self.records.insert(uid.to_string(), updated.clone());
        if let Err(err) = self.persist_records() {
            self.records.insert(uid.to_string(), prev);
            return Err(err);
        }

        self.audit_log()
            .append(uid, from.as_str(), TaskState::Failed.as_str(), "workflow_cancel");
        Ok(ForceFailOutcome::Failed(updated))
    }

    /// Remove a record.
    ///
    /// Permitted only while pending and not referenced by a step of a
    /// non-terminal workflow; anything else returns a specific rejection.
    pub fn remove(&mut self, uid: &str) -> Result<RemoveOutcome, StoreError> {
        let Some(rec) = self.records.get(uid) else {
            return Ok(RemoveOutcome::NotFound);
        };
        if rec.state != TaskState::Pending {
            return Ok(RemoveOutcome::NotCancellable);
        }

        let referenced = self.workflows.iter().any(|wf| {
            !wf.status.is_terminal()
                && wf.steps.iter().any(|step| {
                    step.task_uid.as_deref() == Some(uid)
                        && !matches!(step.status, StepStatus::Completed | StepStatus::Skipped)
                })
        });
        if referenced {
            return Ok(RemoveOutcome::WorkflowTask);
        }

        self.remove_record_unchecked(uid)?;
        Ok(RemoveOutcome::Removed)
    }

    fn remove_record_unchecked(&mut self, uid: &str) -> Result<(), StoreError> {
        let Some(removed) = self.records.remove(uid) else {
            return Ok(());
        };
        if let Err(err) = self.persist_records() {
            self.records.insert(uid.to_string(), removed);
            return Err(err);
        }
        let _ = std::fs::remove_file(self.task_blob_path(uid));
        Ok(())
    }

    /// Filtered, paginated query. The total reflects the filtered count
    /// before pagination.
    pub fn query(&self, filter: &RecordFilter) -> RecordPage {
        let mut matched: Vec<&TaskRecord> = self
            .records
            .values()
            .filter(|rec| filter.state.is_none_or(|s| rec.state == s))
            .filter(|rec| {
                filter
                    .task_category
                    .as_deref()
                    .is_none_or(|c| rec.task_category == c)
            })
            .collect();

        // HashMap iteration order is unstable; sort for deterministic pages.
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.uid.cmp(&b.uid))
        });

        let total = matched.len();
        let records = match filter.limit {
            Some(limit) => {
                let limit = limit.clamp(1, MAX_QUERY_LIMIT);
                matched
                    .into_iter()
                    .skip(filter.offset)
                    .take(limit)
                    .cloned()
                    .collect()
            }
            None => matched.into_iter().cloned().collect(),
        };

        RecordPage { total, records }
    }

    /// Per-state record counts for health reporting / dry-run output.
    pub fn record_counts(&self) -> RecordCounts {
        let mut counts = RecordCounts::default();
        for rec in self.records.values() {
            match rec.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Claimed => counts.claimed += 1,
                TaskState::Processing => counts.processing += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub(crate) fn persist_records(&self) -> Result<(), StoreError> {
        let mut snapshot: Vec<&TaskRecord> = self.records.values().collect();
        snapshot.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.uid.cmp(&b.uid))
        });
        persist::save_json(&self.records_path(), &snapshot)
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 char.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
