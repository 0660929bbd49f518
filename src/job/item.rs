//! Job and item records

use crate::engine::ErrorDetail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an item within its job
pub type ItemId = usize;

/// What a single item runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemInput {
    /// One pass of a repeated run, bound as `iteration`
    Repeat { iteration: usize },
    /// One dataset row; its columns become the seed bindings
    Row {
        index: usize,
        bindings: Map<String, Value>,
    },
}

impl ItemInput {
    /// Seed bindings handed to the interpreter
    pub fn bindings(&self) -> Map<String, Value> {
        match self {
            ItemInput::Repeat { iteration } => {
                let mut seed = Map::new();
                seed.insert("iteration".into(), Value::from(*iteration));
                seed
            }
            ItemInput::Row { bindings, .. } => bindings.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Done,
    Error,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Error | ItemStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Done => "done",
            ItemStatus::Error => "error",
            ItemStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status, always derived from item counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Running,
    Done,
    DoneWithErrors,
    /// Every item was cancelled before it ran
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::DoneWithErrors => "done-with-errors",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Everything the tracker knows about one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: ItemId,
    pub input: ItemInput,
    pub status: ItemStatus,
    pub output_rows: Vec<Map<String, Value>>,
    pub error: Option<ErrorDetail>,
    pub raw_text: Option<String>,
    pub turnaround_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    pub fn pending(item_id: ItemId, input: ItemInput) -> Self {
        Self {
            item_id,
            input,
            status: ItemStatus::Pending,
            output_rows: Vec::new(),
            error: None,
            raw_text: None,
            turnaround_ms: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Counts per status for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    /// Share of terminal items, 0..=100
    pub percent: u8,
}

impl Progress {
    pub fn from_statuses(statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        let mut progress = Self::default();
        for status in statuses {
            progress.total += 1;
            match status {
                ItemStatus::Pending => progress.pending += 1,
                ItemStatus::Running => progress.running += 1,
                ItemStatus::Done => progress.done += 1,
                ItemStatus::Error => progress.error += 1,
                ItemStatus::Cancelled => progress.cancelled += 1,
            }
        }

        progress.percent = if progress.total == 0 {
            100
        } else {
            (progress.terminal() * 100 / progress.total) as u8
        };
        progress
    }

    pub fn terminal(&self) -> usize {
        self.done + self.error + self.cancelled
    }

    pub fn job_status(&self) -> JobStatus {
        if self.pending + self.running > 0 {
            JobStatus::Running
        } else if self.total > 0 && self.cancelled == self.total {
            JobStatus::Cancelled
        } else if self.error > 0 {
            JobStatus::DoneWithErrors
        } else {
            JobStatus::Done
        }
    }
}
