// src/intake/mod.rs

//! Ingestion front door.
//!
//! - [`queue`] is a bounded, retrying worker-pool queue decoupling arrival
//!   from processing.
//! - [`decision`] turns raw inbound items into store mutations: immediate
//!   records, cron jobs, one-shot schedules or whole workflows, guided by a
//!   pluggable [`decision::Classifier`].

pub mod decision;
pub mod queue;

pub use decision::{Classifier, Decision, IntakeHandler, WorkItem};
pub use queue::{IngestQueue, ItemHandler, QueueOptions, QueueStats};
