//! Progress snapshot and live-progress wire types.
//!
//! [`ProgressSnapshot`] is the typed record the pipeline publishes to the
//! progress hub. [`ProgressMessage`] is the flat JSON record observers
//! receive, one per stream event:
//!
//! ```text
//! { status, progress, percentage, current_unit, total_units, message, timestamp }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{clamp_progress, Job, JobStatus};

// ============================================================================
// Snapshot
// ============================================================================

/// Last known state of a job, as broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    /// Always within `[0.0, 1.0]`; see [`ProgressSnapshot::new`].
    pub progress: f64,
    pub current_unit: Option<String>,
    pub total_units: i32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Build a snapshot stamped with the current time.
    ///
    /// Progress is clamped into `[0.0, 1.0]` and NaN is published as 0.
    pub fn new(
        status: JobStatus,
        progress: f64,
        current_unit: Option<String>,
        total_units: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            progress: clamp_progress(progress),
            current_unit,
            total_units,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Snapshot mirroring a ledger row.
    pub fn from_job(job: &Job, message: impl Into<String>) -> Self {
        Self::new(
            job.status,
            job.progress,
            job.current_unit.clone(),
            job.total_units,
            message,
        )
    }

    /// Same state, new message and timestamp (used for heartbeats).
    pub fn restamped(&self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// A stream ends after delivering a terminal snapshot.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress as a percentage rounded to one decimal.
    pub fn percentage(&self) -> f64 {
        (self.progress * 1000.0).round() / 10.0
    }
}

// ============================================================================
// Wire record
// ============================================================================

/// Event name of a live-progress stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEventKind {
    /// First message, built from the ledger at subscribe time.
    Connected,
    /// Snapshot published by the pipeline or a control command.
    Progress,
    /// Idle-window keepalive repeating the last known state.
    Heartbeat,
}

impl ProgressEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventKind::Connected => "connected",
            ProgressEventKind::Progress => "progress",
            ProgressEventKind::Heartbeat => "heartbeat",
        }
    }
}

/// Flat JSON record delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub status: JobStatus,
    pub progress: f64,
    pub percentage: f64,
    pub current_unit: Option<String>,
    pub total_units: i32,
    pub message: String,
    /// ISO-8601 / RFC 3339, millisecond precision, UTC.
    pub timestamp: String,
}

impl From<&ProgressSnapshot> for ProgressMessage {
    fn from(snapshot: &ProgressSnapshot) -> Self {
        Self {
            status: snapshot.status,
            progress: snapshot.progress,
            percentage: snapshot.percentage(),
            current_unit: snapshot.current_unit.clone(),
            total_units: snapshot.total_units,
            message: snapshot.message.clone(),
            timestamp: snapshot
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
