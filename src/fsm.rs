// src/fsm.rs

//! Task lifecycle state machine.
//!
//! Pure, stateless logic: the legal transition table, lease durations per
//! task category, and lease-expiry checks. The durable store is the only
//! caller that actually mutates records; everything here just answers
//! "is this edge legal" and "is this lease still live".
//!
//! State flow:
//! - pending -> claimed -> processing -> completed | failed
//! - pending -> completed (direct completion, back-compat shortcut)
//! - claimed -> pending (timeout release)
//! - failed -> pending (retry)

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Claimed => "claimed",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// True for states with no outgoing edges or where work is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Priority used when de-duplicating records at load time: the record
    /// that has made the most progress wins.
    pub fn dedup_priority(self) -> u8 {
        match self {
            TaskState::Completed => 5,
            TaskState::Processing => 4,
            TaskState::Claimed => 3,
            TaskState::Failed => 2,
            TaskState::Pending => 1,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether `from -> to` is a legal edge.
///
/// Completed is terminal: no outgoing edges.
pub fn can_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    let allowed: &[TaskState] = match from {
        Pending => &[Claimed, Completed],
        Claimed => &[Processing, Pending, Completed],
        Processing => &[Completed, Failed],
        Failed => &[Pending],
        Completed => &[],
    };
    allowed.contains(&to)
}

/// Perform a transition, returning the new state or `InvalidTransition`.
pub fn transition(from: TaskState, to: TaskState) -> Result<TaskState, StoreError> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}

/// Lease durations keyed by task category.
///
/// Categories are open-ended strings; anything unrecognised falls back to
/// the `general` duration.
#[derive(Debug, Clone, Copy)]
pub struct LeaseTable {
    pub general: Duration,
    pub research: Duration,
    pub code: Duration,
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self {
            general: Duration::minutes(10),
            research: Duration::minutes(20),
            code: Duration::minutes(30),
        }
    }
}

impl LeaseTable {
    /// Lease duration for a task category.
    pub fn for_category(&self, category: &str) -> Duration {
        match category {
            "research" => self.research,
            "code" => self.code,
            _ => self.general,
        }
    }
}

/// Check whether a claim has expired.
///
/// `claimed_at` is an RFC 3339 string as persisted on the record. A missing
/// or unparseable timestamp counts as expired: reclaiming an idle lease too
/// eagerly is recoverable, a permanently stuck record is not.
pub fn is_claim_expired(claimed_at: Option<&str>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Some(raw) = claimed_at else {
        return true;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => now.signed_duration_since(at.with_timezone(&Utc)) > ttl,
        Err(_) => true,
    }
}
