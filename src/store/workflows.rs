// src/store/workflows.rs

//! Workflow persistence. The DAG semantics live in [`crate::workflow`];
//! this module only owns storage, lookup and pagination.

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::store::{persist, Store};
use crate::workflow::model::{StepStatus, Workflow, WorkflowStatus};

const MAX_QUERY_LIMIT: usize = 100;

/// Workflow query filters plus pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// One page of workflow query results; `total` counts matches before
/// pagination.
#[derive(Debug, Clone)]
pub struct WorkflowPage {
    pub total: usize,
    pub workflows: Vec<Workflow>,
}

impl Store {
    /// Persist a newly created workflow.
    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<(), StoreError> {
        self.workflows.push(workflow);
        if let Err(err) = self.persist_workflows() {
            self.workflows.pop();
            return Err(err);
        }
        Ok(())
    }

    pub fn get_workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.iter().find(|wf| wf.id == id).cloned()
    }

    pub(crate) fn workflow_mut(&mut self, id: &str) -> Option<&mut Workflow> {
        self.workflows.iter_mut().find(|wf| wf.id == id)
    }

    /// Find the non-terminal workflow step backed by `task_uid`, if any.
    /// Returns `(workflow_id, step_id)`.
    pub(crate) fn find_running_step_by_task(&self, task_uid: &str) -> Option<(String, String)> {
        for wf in &self.workflows {
            if wf.status.is_terminal() {
                continue;
            }
            for step in &wf.steps {
                if step.task_uid.as_deref() == Some(task_uid)
                    && matches!(step.status, StepStatus::Active)
                {
                    return Some((wf.id.clone(), step.id.clone()));
                }
            }
        }
        None
    }

    /// Filtered query, newest-first. Pagination only applies when a limit
    /// is supplied (clamped to 1..=100); no limit returns everything.
    pub fn query_workflows(&self, filter: &WorkflowFilter) -> WorkflowPage {
        let mut matched: Vec<&Workflow> = self
            .workflows
            .iter()
            .filter(|wf| filter.status.is_none_or(|s| wf.status == s))
            .collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len();
        let workflows = match filter.limit {
            Some(limit) => {
                let limit = limit.clamp(1, MAX_QUERY_LIMIT);
                matched
                    .into_iter()
                    .skip(filter.offset)
                    .take(limit)
                    .cloned()
                    .collect()
            }
            None => matched.into_iter().skip(filter.offset).cloned().collect(),
        };

        WorkflowPage { total, workflows }
    }

    pub(crate) fn persist_workflows(&self) -> Result<(), StoreError> {
        persist::save_json(&self.workflows_path(), &self.workflows)
    }
}
