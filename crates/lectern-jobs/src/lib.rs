//! # lectern-jobs
//!
//! Job orchestration for lectern.
//!
//! This crate provides:
//! - `JobController`: per-process registry of running jobs with pause and
//!   cancel signals and a cooperative checkpoint
//! - `ProgressHub`: fan-out of progress snapshots with a last-state cache
//! - `JobPipeline`: the collect → plan → generate → persist state machine
//! - `JobControl`: validated start/pause/resume/cancel commands
//! - `recover_orphaned_jobs`: startup sweep relaunching interrupted jobs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lectern_db::Database;
//! use lectern_inference::{ChatClient, LlmGenerator, LlmPlanner};
//! use lectern_jobs::{JobControl, JobPipeline, PipelineConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let client = ChatClient::from_env()?;
//! let pipeline = JobPipeline::new(
//!     Arc::new(db.jobs.clone()),
//!     Arc::new(db.sources.clone()),
//!     Arc::new(LlmPlanner::new(client.clone())),
//!     Arc::new(LlmGenerator::new(client)),
//!     PipelineConfig::from_env(),
//! );
//!
//! let mut progress = pipeline.hub().subscribe(job_id);
//! JobControl::new(pipeline).start(job_id).await?;
//! while let Some(snapshot) = progress.recv().await {
//!     if snapshot.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod control;
pub mod controller;
pub mod hub;
pub mod pipeline;
pub mod recovery;

pub use control::{ControlOutcome, JobControl};
pub use controller::{CancelSignal, JobController, RunGuard};
pub use hub::{ProgressHub, Subscription};
pub use pipeline::{JobPipeline, PipelineConfig, PipelineOutcome, RunStats};
pub use recovery::{recover_orphaned_jobs, RecoveryReport};
