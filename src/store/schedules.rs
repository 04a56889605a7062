// src/store/schedules.rs

//! Periodic (cron) job definitions and one-shot scheduled tasks.
//!
//! Cron expressions are stored opaquely and evaluated by whichever scheduler
//! the deployment wires in; the store only persists them. One-shot scheduled
//! tasks carry a fire time and are materialized into task records (or a
//! whole workflow) by the sweep loop once that time passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::{persist, Store};
use crate::workflow::model::WorkflowPlan;

/// Pagination limit ceiling for schedule queries.
const MAX_QUERY_LIMIT: usize = 100;

/// A recurring job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,

    /// Opaque cron expression; validated by the scheduler, not the store.
    pub cron_expression: String,

    pub task_content: String,
    pub task_category: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledStatus {
    Waiting,
    Triggered,
    Cancelled,
}

/// A one-shot future task. When `is_workflow` is set, `workflow_plan` holds
/// the steps to materialize instead of a single record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub task_content: String,
    pub task_category: String,

    #[serde(default)]
    pub is_workflow: bool,
    #[serde(default)]
    pub workflow_plan: Option<WorkflowPlan>,

    /// RFC 3339 fire time. An unparseable value counts as already due, so a
    /// corrupt entry fires (and surfaces) instead of sleeping forever.
    pub scheduled_at: String,

    pub created_at: String,
    pub source_id: Option<String>,
    pub status: ScheduledStatus,
}

/// Generate a prefixed id (`<prefix>_` + 12 hex chars of a v4 UUID).
pub fn generate_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &uuid[..12])
}

impl Store {
    /// Register a recurring job. Returns the stored definition.
    pub fn add_cron_job(
        &mut self,
        cron_expression: &str,
        task_content: &str,
        task_category: &str,
    ) -> Result<CronJob, StoreError> {
        let job = CronJob {
            id: generate_id("cron"),
            cron_expression: cron_expression.to_string(),
            task_content: task_content.to_string(),
            task_category: task_category.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.cron_jobs.push(job.clone());
        if let Err(err) = self.persist_cron_jobs() {
            self.cron_jobs.pop();
            return Err(err);
        }
        info!(id = %job.id, expr = %job.cron_expression, "cron job added");
        Ok(job)
    }

    pub fn cron_jobs(&self) -> &[CronJob] {
        &self.cron_jobs
    }

    /// Delete a recurring job by id. Returns whether it existed.
    pub fn remove_cron_job(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.cron_jobs.iter().position(|j| j.id == id) else {
            return Ok(false);
        };
        let removed = self.cron_jobs.remove(pos);
        if let Err(err) = self.persist_cron_jobs() {
            self.cron_jobs.insert(pos, removed);
            return Err(err);
        }
        Ok(true)
    }

    /// Register a one-shot scheduled task, optionally carrying a workflow
    /// plan to materialize at fire time.
    pub fn add_scheduled_task(
        &mut self,
        task_content: &str,
        task_category: &str,
        scheduled_at: &str,
        workflow_plan: Option<WorkflowPlan>,
        source_id: Option<&str>,
    ) -> Result<ScheduledTask, StoreError> {
        let task = ScheduledTask {
            id: generate_id("sched"),
            task_content: task_content.to_string(),
            task_category: task_category.to_string(),
            is_workflow: workflow_plan.is_some(),
            workflow_plan,
            scheduled_at: scheduled_at.to_string(),
            created_at: Utc::now().to_rfc3339(),
            source_id: source_id.map(str::to_string),
            status: ScheduledStatus::Waiting,
        };
        self.scheduled.push(task.clone());
        if let Err(err) = self.persist_scheduled() {
            self.scheduled.pop();
            return Err(err);
        }
        info!(id = %task.id, at = %task.scheduled_at, workflow = task.is_workflow, "scheduled task added");
        Ok(task)
    }

    pub fn get_scheduled_task(&self, id: &str) -> Option<ScheduledTask> {
        self.scheduled.iter().find(|t| t.id == id).cloned()
    }

    /// List scheduled tasks newest-first, limit clamped to 1..=100.
    pub fn list_scheduled_tasks(&self, limit: Option<usize>) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.scheduled.clone();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            tasks.truncate(limit.clamp(1, MAX_QUERY_LIMIT));
        }
        tasks
    }

    /// Waiting tasks whose fire time is at or before `now`.
    pub fn due_scheduled_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        self.scheduled
            .iter()
            .filter(|t| t.status == ScheduledStatus::Waiting)
            .filter(|t| match DateTime::parse_from_rfc3339(&t.scheduled_at) {
                Ok(at) => at.with_timezone(&Utc) <= now,
                // Unparseable fire times count as due; see `scheduled_at`.
                Err(_) => true,
            })
            .cloned()
            .collect()
    }

    /// Mark a scheduled task as fired so the sweep never fires it twice.
    pub fn mark_scheduled_triggered(&mut self, id: &str) -> Result<(), StoreError> {
        let Some(pos) = self.scheduled.iter().position(|t| t.id == id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let prev = self.scheduled[pos].status;
        self.scheduled[pos].status = ScheduledStatus::Triggered;
        if let Err(err) = self.persist_scheduled() {
            self.scheduled[pos].status = prev;
            return Err(err);
        }
        Ok(())
    }

    /// Cancel a scheduled task. Only waiting tasks can be cancelled; returns
    /// whether the cancellation took effect.
    pub fn cancel_scheduled_task(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.scheduled.iter().position(|t| t.id == id) else {
            return Ok(false);
        };
        if self.scheduled[pos].status != ScheduledStatus::Waiting {
            return Ok(false);
        }
        self.scheduled[pos].status = ScheduledStatus::Cancelled;
        if let Err(err) = self.persist_scheduled() {
            self.scheduled[pos].status = ScheduledStatus::Waiting;
            return Err(err);
        }
        Ok(true)
    }

    fn persist_cron_jobs(&self) -> Result<(), StoreError> {
        persist::save_json(&self.cron_jobs_path(), &self.cron_jobs)
    }

    fn persist_scheduled(&self) -> Result<(), StoreError> {
        persist::save_json(&self.scheduled_path(), &self.scheduled)
    }
}
