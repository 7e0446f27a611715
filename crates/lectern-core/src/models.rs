//! Data models for generation jobs, source units, and plans.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// JOB LEDGER TYPES
// =============================================================================

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Planning,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Planning,
        JobStatus::Processing,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Planning => "PLANNING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, JobStatus::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("Unknown job status: {}", s)))
    }
}

/// A generation job as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Source collection this job generates content for.
    pub textbook_id: Uuid,
    pub status: JobStatus,
    /// Fraction of work done, in `[0.0, 1.0]`.
    pub progress: f64,
    /// Label of the unit currently executing (a source file name).
    pub current_unit: Option<String>,
    pub total_units: i32,
    pub error_message: Option<String>,
    /// Persisted planner output; a resumed job reuses it instead of re-planning.
    pub generation_plan: Option<GenerationPlan>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh `PENDING` job record.
    pub fn new(id: Uuid, textbook_id: Uuid, total_units: i32) -> Self {
        let now = Utc::now();
        Self {
            id,
            textbook_id,
            status: JobStatus::Pending,
            progress: 0.0,
            current_unit: None,
            total_units,
            error_message: None,
            generation_plan: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Index of the first top-level unit a restarted run should execute.
    ///
    /// `floor(progress × total_units)`: approximate when units differ in size,
    /// so at most one unit is re-executed and none is skipped.
    pub fn resume_index(&self) -> usize {
        if self.total_units <= 0 {
            return 0;
        }
        let index = (clamp_progress(self.progress) * self.total_units as f64).floor() as usize;
        index.min(self.total_units as usize)
    }
}

/// Partial update of a ledger row.
///
/// `current_unit` is doubly optional so callers can clear the label
/// (`Some(None)`) as well as leave it untouched (`None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub current_unit: Option<Option<String>>,
    pub total_units: Option<i32>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only moves the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal failure with a human-readable reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Successful completion: progress pinned to 1.0, unit label cleared.
    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(1.0),
            current_unit: Some(None),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(clamp_progress(progress));
        self
    }

    pub fn with_current_unit(mut self, unit: Option<String>) -> Self {
        self.current_unit = Some(unit);
        self
    }

    pub fn with_total_units(mut self, total: i32) -> Self {
        self.total_units = Some(total.max(0));
        self
    }

    /// Apply to an in-memory job, enforcing the ledger invariants:
    /// `COMPLETED ⇒ progress = 1.0`, `FAILED ⇒ error set`, and any other
    /// status transition clears a stale error.
    pub fn apply(&self, job: &mut Job) {
        if let Some(progress) = self.progress {
            job.progress = clamp_progress(progress);
        }
        if let Some(ref unit) = self.current_unit {
            job.current_unit = unit.clone();
        }
        if let Some(total) = self.total_units {
            job.total_units = total;
        }
        if let Some(status) = self.status {
            job.status = status;
            match status {
                JobStatus::Completed => {
                    job.progress = 1.0;
                    job.error_message = None;
                }
                JobStatus::Failed => {
                    job.error_message = Some(
                        self.error_message
                            .clone()
                            .or_else(|| job.error_message.clone())
                            .unwrap_or_else(|| "Job failed".to_string()),
                    );
                }
                _ => job.error_message = None,
            }
        } else if let Some(ref message) = self.error_message {
            job.error_message = Some(message.clone());
        }
        job.updated_at = Utc::now();
    }
}

/// Clamp a progress value into `[0.0, 1.0]`; NaN becomes 0.
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

// =============================================================================
// SOURCE UNITS
// =============================================================================

/// A positional slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, `"<document-id>:<index>"`.
    pub id: String,
    /// Position within the parent unit.
    pub index: usize,
    /// Nearest markdown heading above the chunk, if any.
    pub heading: Option<String>,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    /// Build the stable chunk id for a document position.
    pub fn make_id(document_id: Uuid, index: usize) -> String {
        format!("{}:{}", document_id, index)
    }
}

/// A top-level unit of work: one source document and its ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub id: Uuid,
    /// Human-readable label, usually the file name.
    pub label: String,
    pub chunks: Vec<Chunk>,
}

impl SourceUnit {
    pub fn is_usable(&self) -> bool {
        !self.chunks.is_empty()
    }
}

// =============================================================================
// PLANS AND GENERATED ITEMS
// =============================================================================

/// How many items of one kind to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuota {
    pub kind: String,
    pub count: u32,
}

/// Planned work for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk_id: String,
    #[serde(default)]
    pub items: Vec<ItemQuota>,
}

impl ChunkPlan {
    /// Total number of items requested for the chunk.
    pub fn total(&self) -> u32 {
        self.items.iter().map(|q| q.count).sum()
    }

    /// Check generator output against this plan.
    ///
    /// Rejects empty output, kinds that were not planned, and null content.
    pub fn validate_items(&self, items: &[GeneratedItem]) -> Result<()> {
        if items.is_empty() {
            return Err(Error::Generation(format!(
                "No items generated for chunk {}",
                self.chunk_id
            )));
        }
        let planned: HashSet<&str> = self.items.iter().map(|q| q.kind.as_str()).collect();
        for item in items {
            if !planned.contains(item.kind.as_str()) {
                return Err(Error::Generation(format!(
                    "Unplanned item kind '{}' for chunk {}",
                    item.kind, self.chunk_id
                )));
            }
            if item.content.is_null() {
                return Err(Error::Generation(format!(
                    "Empty '{}' item for chunk {}",
                    item.kind, self.chunk_id
                )));
            }
        }
        Ok(())
    }
}

/// Planner output covering every chunk of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPlan {
    #[serde(default)]
    pub chunks: Vec<ChunkPlan>,
}

impl GenerationPlan {
    /// Planned work for a chunk; `None` means nothing was planned.
    pub fn work_for(&self, chunk_id: &str) -> Option<&ChunkPlan> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }

    /// Total items across the whole plan.
    pub fn total_items(&self) -> u64 {
        self.chunks.iter().map(|c| c.total() as u64).sum()
    }

    /// Reject plans that reference unknown or duplicate chunk ids.
    pub fn validate(&self, units: &[SourceUnit]) -> Result<()> {
        let known: HashSet<&str> = units
            .iter()
            .flat_map(|u| u.chunks.iter().map(|c| c.id.as_str()))
            .collect();
        let mut seen = HashSet::new();
        for entry in &self.chunks {
            if !known.contains(entry.chunk_id.as_str()) {
                return Err(Error::Planning(format!(
                    "Plan references unknown chunk {}",
                    entry.chunk_id
                )));
            }
            if !seen.insert(entry.chunk_id.as_str()) {
                return Err(Error::Planning(format!(
                    "Plan lists chunk {} more than once",
                    entry.chunk_id
                )));
            }
            if entry.items.iter().any(|q| q.kind.trim().is_empty()) {
                return Err(Error::Planning(format!(
                    "Plan for chunk {} has an item quota without a kind",
                    entry.chunk_id
                )));
            }
        }
        Ok(())
    }
}

/// A single generated item (question, exercise, summary, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub kind: String,
    pub content: JsonValue,
}

/// Context handed to the planner alongside the collected units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanningContext {
    pub job_id: Uuid,
    pub textbook_id: Uuid,
}
