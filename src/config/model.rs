// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::fsm::LeaseTable;
use crate::intake::QueueOptions;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [store]
/// data_dir = "data"
///
/// [lease]
/// general_minutes = 10
/// research_minutes = 20
/// code_minutes = 30
///
/// [intake]
/// concurrency = 1
/// capacity = 1000
/// max_retries = 3
///
/// [sweep]
/// interval_secs = 60
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    /// Durable store location from `[store]`.
    #[serde(default)]
    pub store: StoreSection,

    /// Per-category lease durations from `[lease]`.
    #[serde(default)]
    pub lease: LeaseSection,

    /// Ingestion queue sizing from `[intake]`.
    #[serde(default)]
    pub intake: IntakeSection,

    /// Periodic sweep cadence from `[sweep]`.
    #[serde(default)]
    pub sweep: SweepSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Directory holding `records.json`, `workflows.json`, schedule files
    /// and the transition log. Task content blobs live in `tasks/` below it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// `[lease]` section.
///
/// How long a worker may sit on a claimed task before the sweep (or the
/// next claimant) takes the lease back.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LeaseSection {
    #[serde(default = "default_general_minutes")]
    pub general_minutes: u32,

    #[serde(default = "default_research_minutes")]
    pub research_minutes: u32,

    #[serde(default = "default_code_minutes")]
    pub code_minutes: u32,
}

fn default_general_minutes() -> u32 {
    10
}

fn default_research_minutes() -> u32 {
    20
}

fn default_code_minutes() -> u32 {
    30
}

impl Default for LeaseSection {
    fn default() -> Self {
        Self {
            general_minutes: default_general_minutes(),
            research_minutes: default_research_minutes(),
            code_minutes: default_code_minutes(),
        }
    }
}

impl LeaseSection {
    /// Convert to the table consumed by the FSM layer.
    pub fn to_lease_table(self) -> LeaseTable {
        LeaseTable {
            general: chrono::Duration::minutes(self.general_minutes.into()),
            research: chrono::Duration::minutes(self.research_minutes.into()),
            code: chrono::Duration::minutes(self.code_minutes.into()),
        }
    }
}

/// `[intake]` section.
///
/// Bounds on the background classification queue. `concurrency` caps
/// outstanding classifier calls (backpressure against a rate-limited
/// external service); `capacity` caps pending items before `push`
/// starts rejecting.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IntakeSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_concurrency() -> usize {
    1
}

fn default_capacity() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for IntakeSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            capacity: default_capacity(),
            max_retries: default_max_retries(),
        }
    }
}

impl IntakeSection {
    /// Convert to the options consumed by the ingestion queue. Backoff
    /// delays keep their defaults; only the sizing knobs are configurable.
    pub fn to_queue_options(self) -> QueueOptions {
        QueueOptions {
            concurrency: self.concurrency,
            capacity: self.capacity,
            max_retries: self.max_retries,
            ..QueueOptions::default()
        }
    }
}

/// `[sweep]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SweepSection {
    /// Seconds between lease-reclaim / due-schedule sweeps.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}
