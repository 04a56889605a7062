// src/engine/runtime.rs

//! The [`Runtime`] facade owns the store behind one async mutex and is the
//! only layer allowed to drive side effects across modules: a record
//! reaching a terminal state here is what advances (or fails) the workflow
//! built on top of it, and the periodic sweep here is what releases expired
//! leases and fires due schedules.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::fsm::TaskState;
use crate::store::{
    ClaimOutcome, CompleteOutcome, RecordCounts, RecordFilter, RecordPage, RemoveOutcome, Store,
    TransitionRequest,
};
use crate::store::records::TaskRecord;
use crate::store::schedules::ScheduledTask;
use crate::store::{WorkflowFilter, WorkflowPage};
use crate::workflow::engine as wf;
use crate::workflow::{StepSpec, Workflow, WorkflowCancelOutcome};

/// Shared handle over the store plus the cross-module reactions.
#[derive(Clone)]
pub struct Runtime {
    store: Arc<Mutex<Store>>,
}

impl Runtime {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// The underlying store handle, for wiring into the intake layer.
    pub fn store(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.store)
    }

    pub async fn add_task(
        &self,
        uid: &str,
        content: &str,
        category: &str,
    ) -> Result<(), StoreError> {
        self.store.lock().await.add_record(uid, content, category)
    }

    pub async fn claim(&self, uid: &str, worker_id: &str) -> Result<ClaimOutcome, StoreError> {
        self.store.lock().await.claim(uid, worker_id)
    }

    pub async fn get_task(&self, uid: &str) -> Option<TaskRecord> {
        self.store.lock().await.get_record(uid)
    }

    pub async fn task_content(&self, uid: &str) -> Option<String> {
        self.store.lock().await.task_content(uid)
    }

    pub async fn query_tasks(&self, filter: &RecordFilter) -> RecordPage {
        self.store.lock().await.query(filter)
    }

    pub async fn task_counts(&self) -> RecordCounts {
        self.store.lock().await.record_counts()
    }

    pub async fn remove_task(&self, uid: &str) -> Result<RemoveOutcome, StoreError> {
        self.store.lock().await.remove(uid)
    }

    /// Drive a record through the FSM, then let the workflow layer react
    /// when the record reached a terminal state.
    ///
    /// Workflow notification is deliberately not transactional with the
    /// record transition: the record's state is the source of truth, and a
    /// failed notification is logged and retried by nothing. Rolling the
    /// record back would lie to the worker that just finished it.
    pub async fn transition(
        &self,
        uid: &str,
        target: TaskState,
        req: &TransitionRequest,
    ) -> Result<TaskRecord, StoreError> {
        let mut store = self.store.lock().await;
        let record = store.transition(uid, target, req)?;
        notify_workflow(&mut store, uid, target);
        Ok(record)
    }

    /// Shortcut for processing -> completed with workflow notification.
    pub async fn complete_task(
        &self,
        uid: &str,
        claim_generation: Option<u64>,
        result: Option<&str>,
    ) -> Result<CompleteOutcome, StoreError> {
        let mut store = self.store.lock().await;
        let outcome = store.mark_completed(uid, claim_generation, result)?;
        if matches!(outcome, CompleteOutcome::Completed(_)) {
            notify_workflow(&mut store, uid, TaskState::Completed);
        }
        Ok(outcome)
    }

    pub async fn create_workflow(
        &self,
        name: &str,
        steps: Vec<StepSpec>,
        source_id: Option<&str>,
    ) -> Result<Workflow, StoreError> {
        let mut store = self.store.lock().await;
        wf::create_workflow(&mut store, name, steps, source_id)
    }

    pub async fn get_workflow(&self, id: &str) -> Option<Workflow> {
        self.store.lock().await.get_workflow(id)
    }

    pub async fn query_workflows(&self, filter: &WorkflowFilter) -> WorkflowPage {
        self.store.lock().await.query_workflows(filter)
    }

    pub async fn cancel_workflow(&self, id: &str) -> Result<WorkflowCancelOutcome, StoreError> {
        let mut store = self.store.lock().await;
        wf::cancel(&mut store, id)
    }

    /// One sweep pass: release expired leases, then fire due schedules.
    pub async fn sweep(&self) -> Result<(), StoreError> {
        let released = {
            let mut store = self.store.lock().await;
            store.release_expired_claims()?
        };
        if released > 0 {
            info!(released, "sweep released expired claims");
        }
        self.fire_due_schedules(Utc::now()).await?;
        Ok(())
    }

    /// Materialize every due scheduled task into a record or workflow and
    /// mark it triggered. Per-task failures are logged and skipped so one
    /// bad entry never blocks the rest.
    pub async fn fire_due_schedules(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut store = self.store.lock().await;
        let due = store.due_scheduled_tasks(now);
        if due.is_empty() {
            return Ok(0);
        }

        let mut fired = 0;
        for task in due {
            // Marked first so a materialization failure cannot refire it
            // every minute forever.
            store.mark_scheduled_triggered(&task.id)?;
            match materialize(&mut store, &task) {
                Ok(()) => fired += 1,
                Err(err) => {
                    warn!(schedule = %task.id, error = %err, "failed to materialize due schedule");
                }
            }
        }
        info!(fired, "fired due schedules");
        Ok(fired)
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let runtime = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!("sweep tick");
                if let Err(err) = runtime.sweep().await {
                    warn!(error = %err, "sweep pass failed");
                }
            }
        })
    }
}

fn materialize(store: &mut Store, task: &ScheduledTask) -> Result<(), StoreError> {
    if let Some(plan) = &task.workflow_plan {
        wf::create_workflow(store, &plan.name, plan.steps.clone(), Some(&task.id))?;
        return Ok(());
    }
    let uid = crate::store::generate_id("task");
    store.add_record(&uid, &task.task_content, &task.task_category)
}

fn notify_workflow(store: &mut Store, uid: &str, target: TaskState) {
    let result = match target {
        TaskState::Completed => wf::on_task_completed(store, uid),
        TaskState::Failed => wf::on_task_failed(store, uid),
        _ => return,
    };
    match result {
        Ok(Some(progress)) => {
            debug!(
                task = %uid,
                workflow = %progress.workflow_id,
                completed = progress.completed,
                started = ?progress.steps_started,
                "workflow advanced"
            );
        }
        Ok(None) => {}
        Err(err) => {
            warn!(task = %uid, error = %err, "workflow notification failed");
        }
    }
}
