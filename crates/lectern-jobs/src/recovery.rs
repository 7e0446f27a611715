//! Startup sweep for jobs orphaned by a previous process.

use tracing::{info, warn};
use uuid::Uuid;

use lectern_core::{Error, JobStatus, JobUpdate, Result};

use crate::pipeline::JobPipeline;

/// Jobs touched by [`recover_orphaned_jobs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Reset from PLANNING/PROCESSING to PENDING.
    pub reset: Vec<Uuid>,
    /// Relaunched after the reset.
    pub relaunched: Vec<Uuid>,
}

/// Reset PLANNING/PROCESSING jobs with no live run in this process to
/// PENDING and relaunch them. Progress is kept, so each resumes at
/// `floor(progress × total_units)`. PAUSED jobs wait for an explicit resume.
pub async fn recover_orphaned_jobs(pipeline: &JobPipeline) -> Result<RecoveryReport> {
    let orphans = pipeline
        .store()
        .list_jobs_by_status(&[JobStatus::Planning, JobStatus::Processing])
        .await?;
    let mut report = RecoveryReport::default();

    for job in orphans {
        if pipeline.controller().is_running(job.id) {
            continue;
        }
        pipeline
            .store()
            .update_job(job.id, JobUpdate::status(JobStatus::Pending))
            .await?;
        report.reset.push(job.id);

        match pipeline.start(job.id).await {
            Ok(_) => {
                info!(
                    subsystem = "jobs",
                    component = "recovery",
                    job_id = %job.id,
                    from = %job.status,
                    progress = job.progress,
                    resume_index = job.resume_index(),
                    "Relaunched orphaned job"
                );
                report.relaunched.push(job.id);
            }
            Err(Error::AlreadyRunning(_)) => {}
            Err(e) => warn!(
                subsystem = "jobs",
                component = "recovery",
                job_id = %job.id,
                error = %e,
                "Failed to relaunch orphaned job"
            ),
        }
    }

    info!(
        subsystem = "jobs",
        component = "recovery",
        reset = report.reset.len(),
        relaunched = report.relaunched.len(),
        "Recovery sweep finished"
    );
    Ok(report)
}
