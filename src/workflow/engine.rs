// src/workflow/engine.rs

//! Drives workflows over the store's task records.
//!
//! Steps become task records lazily: a step's record is only created once
//! every dependency has completed, with the dependencies' results appended
//! to the step's content so downstream work sees upstream output. The
//! engine reacts to record transitions via [`on_task_completed`] and
//! [`on_task_failed`]; it never claims or executes anything itself.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::store::{ForceFailOutcome, Store};
use crate::workflow::model::{
    self, StepSpec, StepStatus, Workflow, WorkflowStatus, WorkflowStep,
};

/// What happened to a workflow after one of its task records settled.
#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    /// The workflow reached a terminal status as a result of this event.
    pub completed: bool,
    /// Step ids whose task records were created by this event.
    pub steps_started: Vec<String>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowCancelOutcome {
    Cancelled,
    NotFound,
    /// Already in a terminal status.
    NotCancellable,
}

/// Validate and persist a new workflow, then start every dependency-free
/// step. The returned workflow reflects the post-start state.
pub fn create_workflow(
    store: &mut Store,
    name: &str,
    steps: Vec<StepSpec>,
    source_id: Option<&str>,
) -> Result<Workflow, StoreError> {
    model::validate_steps(&steps)?;

    let now = Utc::now().to_rfc3339();
    let workflow = Workflow {
        id: model::generate_workflow_id(),
        name: name.to_string(),
        status: WorkflowStatus::Running,
        source_id: source_id.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
        steps: steps
            .into_iter()
            .map(|spec| WorkflowStep {
                name: spec
                    .name
                    .unwrap_or_else(|| label_from_content(&spec.task_content)),
                id: spec.id,
                task_content: spec.task_content,
                task_category: spec.task_category.unwrap_or_else(|| "general".to_string()),
                status: StepStatus::Pending,
                task_uid: None,
                depends_on: spec.depends_on,
            })
            .collect(),
    };
    let id = workflow.id.clone();
    store.add_workflow(workflow)?;

    let started = advance(store, &id)?;
    info!(workflow = %id, started = started.len(), "workflow created");

    // The workflow was just inserted, so the lookup cannot miss.
    store
        .get_workflow(&id)
        .ok_or_else(|| StoreError::WorkflowNotFound(id))
}

/// Start every pending step whose dependencies have all completed.
///
/// Each started step gets a task record with uid `{workflow_id}_{step_id}`
/// whose content is the step's own content followed by the result of every
/// dependency. Returns the ids of the steps started.
pub fn advance(store: &mut Store, workflow_id: &str) -> Result<Vec<String>, StoreError> {
    let Some(workflow) = store.get_workflow(workflow_id) else {
        return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
    };
    if workflow.status != WorkflowStatus::Running {
        return Ok(Vec::new());
    }

    // Phase one: decide what to start and assemble content from a snapshot,
    // so the mutations below never read half-updated state.
    let mut ready: Vec<(String, String, String)> = Vec::new();
    for step in &workflow.steps {
        if step.status != StepStatus::Pending {
            continue;
        }
        let deps_done = step.depends_on.iter().all(|dep| {
            workflow
                .step(dep)
                .is_some_and(|d| d.status == StepStatus::Completed)
        });
        if !deps_done {
            continue;
        }

        let mut content = step.task_content.clone();
        for dep in &step.depends_on {
            let dep_uid = format!("{workflow_id}_{dep}");
            if let Some(result) = store.get_record(&dep_uid).and_then(|r| r.result) {
                content.push_str(&format!("\n\n[result of step {dep}]\n{result}"));
            }
        }
        ready.push((step.id.clone(), content, step.task_category.clone()));
    }

    if ready.is_empty() {
        return Ok(Vec::new());
    }

    // Phase two: create records first, then flip step statuses, so a crash
    // in between leaves claimable records rather than steps pointing at
    // nothing.
    let mut started = Vec::with_capacity(ready.len());
    for (step_id, content, category) in &ready {
        let task_uid = format!("{workflow_id}_{step_id}");
        store.add_record(&task_uid, content, category)?;
        started.push(step_id.clone());
    }

    if let Some(wf) = store.workflow_mut(workflow_id) {
        for step_id in &started {
            if let Some(step) = wf.step_mut(step_id) {
                step.status = StepStatus::Active;
                step.task_uid = Some(format!("{workflow_id}_{step_id}"));
            }
        }
        wf.updated_at = Utc::now().to_rfc3339();
    }
    store.persist_workflows()?;

    info!(workflow = %workflow_id, steps = ?started, "workflow steps started");
    Ok(started)
}

/// React to a task record completing. If the record backs an active workflow
/// step, mark the step completed and either finalize the workflow or start
/// whatever became ready. Returns `None` when the record is not a workflow
/// step.
pub fn on_task_completed(
    store: &mut Store,
    task_uid: &str,
) -> Result<Option<WorkflowProgress>, StoreError> {
    let Some((workflow_id, step_id)) = store.find_running_step_by_task(task_uid) else {
        return Ok(None);
    };

    if let Some(wf) = store.workflow_mut(&workflow_id) {
        if let Some(step) = wf.step_mut(&step_id) {
            step.status = StepStatus::Completed;
        }
        wf.updated_at = Utc::now().to_rfc3339();
    }
    store.persist_workflows()?;

    if finalize_if_settled(store, &workflow_id)? {
        return Ok(Some(WorkflowProgress {
            workflow_id,
            completed: true,
            steps_started: Vec::new(),
        }));
    }

    let started = advance(store, &workflow_id)?;
    Ok(Some(WorkflowProgress {
        workflow_id,
        completed: false,
        steps_started: started,
    }))
}

/// React to a task record failing. The workflow fails the instant any step
/// does: the step is marked failed, every transitive dependent that has not
/// already completed is skipped, and the workflow goes terminal in the same
/// call. Records behind still-active sibling steps keep their own lifecycle,
/// but their completions no longer touch the (now terminal) workflow.
/// Returns `None` when the record is not a workflow step.
pub fn on_task_failed(
    store: &mut Store,
    task_uid: &str,
) -> Result<Option<WorkflowProgress>, StoreError> {
    let Some((workflow_id, step_id)) = store.find_running_step_by_task(task_uid) else {
        return Ok(None);
    };

    if let Some(wf) = store.workflow_mut(&workflow_id) {
        if let Some(step) = wf.step_mut(&step_id) {
            step.status = StepStatus::Failed;
        }
        let skipped = skip_dependents(wf, &step_id);
        wf.status = WorkflowStatus::Failed;
        wf.updated_at = Utc::now().to_rfc3339();
        warn!(
            workflow = %workflow_id,
            step = %step_id,
            skipped = skipped.len(),
            "workflow step failed; workflow failed"
        );
    }
    store.persist_workflows()?;

    Ok(Some(WorkflowProgress {
        workflow_id,
        completed: true,
        steps_started: Vec::new(),
    }))
}

/// Cancel a running workflow: force-fail the records behind active steps,
/// skip everything not yet settled and mark the workflow cancelled.
pub fn cancel(store: &mut Store, workflow_id: &str) -> Result<WorkflowCancelOutcome, StoreError> {
    let Some(workflow) = store.get_workflow(workflow_id) else {
        return Ok(WorkflowCancelOutcome::NotFound);
    };
    if workflow.status.is_terminal() {
        return Ok(WorkflowCancelOutcome::NotCancellable);
    }

    for step in &workflow.steps {
        if step.status != StepStatus::Active {
            continue;
        }
        if let Some(uid) = &step.task_uid {
            match store.force_fail(uid)? {
                ForceFailOutcome::Failed(_) | ForceFailOutcome::Removed => {}
                outcome => {
                    warn!(workflow = %workflow_id, task = %uid, ?outcome, "cancel: step record not failable");
                }
            }
        }
    }

    if let Some(wf) = store.workflow_mut(workflow_id) {
        for step in &mut wf.steps {
            if matches!(step.status, StepStatus::Pending | StepStatus::Active) {
                step.status = StepStatus::Skipped;
            }
        }
        wf.status = WorkflowStatus::Cancelled;
        wf.updated_at = Utc::now().to_rfc3339();
    }
    store.persist_workflows()?;

    info!(workflow = %workflow_id, "workflow cancelled");
    Ok(WorkflowCancelOutcome::Cancelled)
}

/// Mark the workflow completed once no step is pending or active. A step
/// failure never reaches here: [`on_task_failed`] fails the workflow in the
/// same call. Returns whether it finalized.
fn finalize_if_settled(store: &mut Store, workflow_id: &str) -> Result<bool, StoreError> {
    let Some(workflow) = store.get_workflow(workflow_id) else {
        return Ok(false);
    };
    let unsettled = workflow
        .steps
        .iter()
        .any(|s| matches!(s.status, StepStatus::Pending | StepStatus::Active));
    if unsettled || workflow.status.is_terminal() {
        return Ok(false);
    }

    if let Some(wf) = store.workflow_mut(workflow_id) {
        wf.status = WorkflowStatus::Completed;
        wf.updated_at = Utc::now().to_rfc3339();
    }
    store.persist_workflows()?;

    info!(workflow = %workflow_id, "workflow completed");
    Ok(true)
}

/// Breadth-first skip of every transitive dependent of `step_id` that has
/// not already completed. Returns the skipped step ids.
fn skip_dependents(workflow: &mut Workflow, step_id: &str) -> Vec<String> {
    let mut queue: VecDeque<String> = VecDeque::from([step_id.to_string()]);
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipped = Vec::new();

    while let Some(current) = queue.pop_front() {
        let dependents: Vec<String> = workflow
            .steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == &current))
            .map(|s| s.id.clone())
            .collect();
        for dep_id in dependents {
            if !seen.insert(dep_id.clone()) {
                continue;
            }
            if let Some(step) = workflow.step_mut(&dep_id) {
                if step.status != StepStatus::Completed {
                    step.status = StepStatus::Skipped;
                    skipped.push(dep_id.clone());
                }
            }
            queue.push_back(dep_id);
        }
    }
    skipped
}

/// First line of the content, capped, for a step with no explicit name.
fn label_from_content(content: &str) -> String {
    let first = content.lines().next().unwrap_or("");
    let mut label: String = first.chars().take(60).collect();
    if label.is_empty() {
        label = "step".to_string();
    }
    label
}
