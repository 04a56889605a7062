// src/workflow/model.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;

/// Step count ceiling for a single workflow.
pub const MAX_STEPS: usize = 20;

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Explicit operator cancellation, distinct from `Failed`: nothing went
    /// wrong with the work, someone just stopped wanting it.
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// Lifecycle status of a single step within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting on dependencies.
    Pending,
    /// A task record has been created for this step and is claimable.
    Active,
    Completed,
    Failed,
    /// Transitively downstream of a failed step, or part of a cancelled
    /// workflow; will never run.
    Skipped,
}

/// A single step as declared by the decomposition collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,

    /// Optional human label; defaults to a prefix of the task content.
    #[serde(default)]
    pub name: Option<String>,

    pub task_content: String,

    /// Lease-duration category for the task record created for this step.
    #[serde(default)]
    pub task_category: Option<String>,

    /// Ids of steps that must complete before this one can start.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A workflow blueprint attached to a scheduled task, materialized into a
/// real [`Workflow`] when the schedule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

/// A materialized workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub task_content: String,
    pub task_category: String,
    pub status: StepStatus,

    /// The task record created for this step once it became active.
    pub task_uid: Option<String>,

    pub depends_on: Vec<String>,
}

/// A named DAG of steps built over task records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,

    /// Id of the inbound item this workflow was decomposed from, if any.
    pub source_id: Option<String>,

    pub created_at: String,
    pub updated_at: String,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// True once every step is completed or skipped.
    pub fn all_steps_settled(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }
}

/// Generate a workflow id (`wf_` + 12 hex chars of a v4 UUID).
pub fn generate_workflow_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("wf_{}", &uuid[..12])
}

/// Validate a step list at workflow creation time.
///
/// Rejects:
/// - an empty step list or more than [`MAX_STEPS`] steps
/// - empty step ids or empty `task_content`
/// - duplicate step ids
/// - a `depends_on` reference to an undeclared step
/// - any dependency cycle, direct or indirect
///
/// The graph is validated once here and never re-checked afterwards.
pub fn validate_steps(steps: &[StepSpec]) -> Result<(), StoreError> {
    if steps.is_empty() {
        return Err(StoreError::Validation(
            "workflow must contain at least one step".into(),
        ));
    }
    if steps.len() > MAX_STEPS {
        return Err(StoreError::Validation(format!(
            "workflow may not exceed {MAX_STEPS} steps (got {})",
            steps.len()
        )));
    }

    let mut ids = std::collections::HashSet::new();
    for step in steps {
        if step.id.is_empty() || step.task_content.is_empty() {
            return Err(StoreError::Validation(
                "every step needs a non-empty id and task_content".into(),
            ));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(StoreError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(StoreError::Validation(format!(
                    "step '{}' depends on undeclared step '{}'",
                    step.id, dep
                )));
            }
            if dep == &step.id {
                return Err(StoreError::Validation(format!(
                    "step '{}' depends on itself",
                    step.id
                )));
            }
        }
    }

    check_acyclic(steps)
}

/// Cycle check via topological sort.
///
/// Edge direction: dep -> step, so a toposort failure names a step on a
/// cycle.
fn check_acyclic(steps: &[StepSpec]) -> Result<(), StoreError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for step in steps {
        graph.add_node(step.id.as_str());
    }
    for step in steps {
        for dep in &step.depends_on {
            graph.add_edge(dep.as_str(), step.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StoreError::Validation(format!(
            "cycle detected in step dependencies involving step '{}'",
            cycle.node_id()
        ))),
    }
}
