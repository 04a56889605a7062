// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Store and workflow operations return the structured [`StoreError`];
//! the wiring layer (`lib.rs`, intake callbacks) uses `anyhow` directly.

use thiserror::Error;

use crate::fsm::TaskState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no record with uid '{0}'")]
    NotFound(String),

    #[error("no workflow with id '{0}'")]
    WorkflowNotFound(String),

    #[error("illegal state transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("claim expired; the task has been reclaimed since")]
    StaleClaim,

    #[error("worker mismatch: lease is held by '{expected}', got '{got}'")]
    WorkerMismatch { expected: String, got: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("writing {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding {path}: {source}")]
    Encoding {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StoreError>;
