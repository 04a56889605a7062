// src/workflow/mod.rs

//! Workflow engine: multi-step tasks as dependency DAGs.
//!
//! - [`model`] holds the workflow/step types and creation-time validation
//!   (id uniqueness, dependency resolution, cycle detection).
//! - [`engine`] advances workflows over the store's task records: auto-start
//!   of ready steps, completion/failure propagation, cancellation.

pub mod engine;
pub mod model;

pub use engine::{WorkflowCancelOutcome, WorkflowProgress};
pub use model::{
    StepSpec, StepStatus, Workflow, WorkflowPlan, WorkflowStatus, WorkflowStep, MAX_STEPS,
};
