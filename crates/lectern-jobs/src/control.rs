//! Validated start/pause/resume/cancel commands.
//!
//! Each command checks the ledger status first, then signals the
//! controller (if the job is running here), then writes the ledger.
//!
//! | Command | Valid from | Effect |
//! |---------|-----------|--------|
//! | start   | PENDING, PAUSED, PLANNING/PROCESSING not running here | launch a run |
//! | pause   | PENDING, PROCESSING | ledger PAUSED, signal, publish |
//! | resume  | PAUSED | running: clear signal, ledger PROCESSING; else relaunch |
//! | cancel  | any non-terminal | signal, ledger CANCELLED, publish |

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use lectern_core::{Error, Job, JobStatus, JobUpdate, Result};

use crate::controller::CancelSignal;
use crate::pipeline::JobPipeline;

/// Result of an accepted control command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub job_id: Uuid,
    /// Ledger status the command moved the job to.
    pub status: JobStatus,
    pub message: String,
}

impl ControlOutcome {
    fn new(job_id: Uuid, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            message: message.into(),
        }
    }
}

/// Control surface over a [`JobPipeline`].
#[derive(Clone)]
pub struct JobControl {
    pipeline: JobPipeline,
}

impl JobControl {
    pub fn new(pipeline: JobPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &JobPipeline {
        &self.pipeline
    }

    async fn load(&self, job_id: Uuid) -> Result<Job> {
        self.pipeline
            .store()
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Launch a run. Also relaunches interrupted PLANNING/PROCESSING jobs.
    pub async fn start(&self, job_id: Uuid) -> Result<ControlOutcome> {
        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::InvalidTransition {
                action: "start",
                status: job.status,
            });
        }
        if self.pipeline.controller().is_running(job_id) {
            return Err(Error::AlreadyRunning(job_id));
        }
        self.pipeline.start(job_id).await?;
        info!(subsystem = "jobs", component = "control", op = "start", job_id = %job_id, from = %job.status, "Job launched");
        Ok(ControlOutcome::new(job_id, JobStatus::Planning, "Job started"))
    }

    pub async fn pause(&self, job_id: Uuid) -> Result<ControlOutcome> {
        let job = self.load(job_id).await?;
        if !job.status.can_pause() {
            return Err(Error::InvalidTransition {
                action: "pause",
                status: job.status,
            });
        }
        let signalled = self.pipeline.controller().pause(job_id);
        self.pipeline
            .store()
            .update_job(job_id, JobUpdate::status(JobStatus::Paused))
            .await?;
        self.pipeline
            .publish_from_ledger(job_id, JobStatus::Paused, "Job paused")
            .await;
        info!(subsystem = "jobs", component = "control", op = "pause", job_id = %job_id, running = signalled, "Job paused");
        Ok(ControlOutcome::new(job_id, JobStatus::Paused, "Job paused"))
    }

    pub async fn resume(&self, job_id: Uuid) -> Result<ControlOutcome> {
        let job = self.load(job_id).await?;
        if !job.status.can_resume() {
            return Err(Error::InvalidTransition {
                action: "resume",
                status: job.status,
            });
        }

        if self.pipeline.controller().resume(job_id) {
            self.pipeline
                .store()
                .update_job(job_id, JobUpdate::status(JobStatus::Processing))
                .await?;
            info!(subsystem = "jobs", component = "control", op = "resume", job_id = %job_id, "Job resumed");
            return Ok(ControlOutcome::new(job_id, JobStatus::Processing, "Job resumed"));
        }

        // Nothing running here (paused before a restart): relaunch.
        match self.pipeline.start(job_id).await {
            Ok(_) => {}
            // Registered between the check above and now; resuming it is enough.
            Err(Error::AlreadyRunning(_)) => {
                self.pipeline.controller().resume(job_id);
            }
            Err(e) => return Err(e),
        }
        info!(subsystem = "jobs", component = "control", op = "resume", job_id = %job_id, "Job relaunched from pause");
        Ok(ControlOutcome::new(job_id, JobStatus::Planning, "Job relaunched"))
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<ControlOutcome> {
        let job = self.load(job_id).await?;
        if !job.status.can_cancel() {
            return Err(Error::InvalidTransition {
                action: "cancel",
                status: job.status,
            });
        }

        let signal = self.pipeline.controller().try_cancel(job_id);
        if let CancelSignal::TooLate(status) = signal {
            return Err(Error::InvalidTransition {
                action: "cancel",
                status,
            });
        }
        self.pipeline
            .store()
            .update_job(job_id, JobUpdate::status(JobStatus::Cancelled))
            .await?;
        self.pipeline
            .publish_from_ledger(job_id, JobStatus::Cancelled, "Job cancelled")
            .await;
        info!(
            subsystem = "jobs",
            component = "control",
            op = "cancel",
            job_id = %job_id,
            running = (signal == CancelSignal::Signalled),
            "Job cancelled"
        );
        Ok(ControlOutcome::new(job_id, JobStatus::Cancelled, "Job cancelled"))
    }
}
