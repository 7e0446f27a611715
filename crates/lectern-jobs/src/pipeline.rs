//! Job execution state machine.
//!
//! A run walks a job through `PLANNING → PROCESSING → COMPLETED`:
//!
//! 1. collect the textbook's source units (FAILED if none are usable),
//! 2. reuse the persisted generation plan or ask the planner for one,
//! 3. generate, validate and store items chunk by chunk, checkpointing
//!    before every chunk and publishing progress after it,
//! 4. finish as COMPLETED, or CANCELLED if a cancel got in first.
//!
//! Resuming is the same routine: units below
//! `floor(progress × total_units)` are skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use lectern_core::{
    defaults, retry_async, Chunk, Error, GeneratedItem, GenerationPlan, Generator, JobStatus,
    JobStore, JobUpdate, Planner, PlanningContext, ProgressSnapshot, Result, RetryPolicy,
    SourceUnit, UnitCollector,
};

use crate::controller::{JobController, RunGuard};
use crate::hub::ProgressHub;

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Generator attempts per chunk before the chunk is skipped.
    pub generator_max_attempts: u32,
    /// Fixed delay between generator attempts.
    pub generator_retry_delay: Duration,
    /// Queue length of each progress subscriber.
    pub subscriber_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator_max_attempts: defaults::GENERATOR_MAX_ATTEMPTS,
            generator_retry_delay: Duration::from_millis(defaults::GENERATOR_RETRY_DELAY_MS),
            subscriber_capacity: defaults::SUBSCRIBER_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GENERATOR_MAX_ATTEMPTS` | 3 |
    /// | `GENERATOR_RETRY_DELAY_MS` | 500 |
    /// | `SUBSCRIBER_CAPACITY` | 64 |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            generator_max_attempts: std::env::var("GENERATOR_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.generator_max_attempts),
            generator_retry_delay: std::env::var("GENERATOR_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(base.generator_retry_delay),
            subscriber_capacity: std::env::var("SUBSCRIBER_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.subscriber_capacity),
        }
    }

    pub fn with_generator_max_attempts(mut self, attempts: u32) -> Self {
        self.generator_max_attempts = attempts;
        self
    }

    pub fn with_generator_retry_delay(mut self, delay: Duration) -> Self {
        self.generator_retry_delay = delay;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    /// Per-chunk generator retry: fixed delay, every error kind retried.
    pub fn generator_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.generator_max_attempts, self.generator_retry_delay)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub units_total: usize,
    /// Units skipped because a previous run already covered them.
    pub units_resumed_past: usize,
    pub chunks_processed: usize,
    /// Chunks with no planned work.
    pub chunks_skipped: usize,
    /// Chunks dropped after generation or storage failed.
    pub chunks_failed: usize,
    pub items_stored: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed(RunStats),
    Cancelled(RunStats),
    Failed(String),
    /// The job was already terminal when the run started.
    Skipped(JobStatus),
}

impl PipelineOutcome {
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            Self::Completed(_) => Some(JobStatus::Completed),
            Self::Cancelled(_) => Some(JobStatus::Cancelled),
            Self::Failed(_) => Some(JobStatus::Failed),
            Self::Skipped(_) => None,
        }
    }
}

/// Executes jobs against the store, collector, planner and generator.
///
/// Cheap to clone; every run is spawned on its own task with a clone.
#[derive(Clone)]
pub struct JobPipeline {
    store: Arc<dyn JobStore>,
    collector: Arc<dyn UnitCollector>,
    planner: Arc<dyn Planner>,
    generator: Arc<dyn Generator>,
    controller: JobController,
    hub: ProgressHub,
    config: PipelineConfig,
}

impl JobPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        collector: Arc<dyn UnitCollector>,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            collector,
            planner,
            generator,
            controller: JobController::new(),
            hub: ProgressHub::new(config.subscriber_capacity),
            config,
        }
    }

    /// Share an existing controller.
    pub fn with_controller(mut self, controller: JobController) -> Self {
        self.controller = controller;
        self
    }

    /// Share an existing hub.
    pub fn with_hub(mut self, hub: ProgressHub) -> Self {
        self.hub = hub;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Register and spawn a run of `job_id`.
    ///
    /// A non-terminal job reads PLANNING in the ledger once this returns.
    /// Fails with [`Error::AlreadyRunning`] if a run is live in this process.
    pub async fn start(&self, job_id: Uuid) -> Result<JoinHandle<PipelineOutcome>> {
        let guard = self
            .controller
            .try_register(job_id)
            .ok_or(Error::AlreadyRunning(job_id))?;
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            self.store
                .update_job(job_id, JobUpdate::status(JobStatus::Planning))
                .await?;
        }
        let run_id = guard.run_id();
        let pipeline = self.clone();
        let handle = tokio::spawn(async move { pipeline.run(guard).await });
        self.controller
            .attach_task(job_id, run_id, handle.abort_handle());
        Ok(handle)
    }

    /// Execute a registered run to its end. Job-level errors are recorded
    /// as FAILED here, unless the run was cancelled first; nothing escapes.
    pub async fn run(&self, mut guard: RunGuard) -> PipelineOutcome {
        let job_id = guard.job_id();
        let started = Instant::now();
        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "run",
            job_id = %job_id,
            "Job run started"
        );

        let outcome = match self.execute(&mut guard).await {
            Ok(outcome) => outcome,
            Err(Error::JobNotFound(id)) => {
                warn!(subsystem = "jobs", component = "pipeline", job_id = %id, "Job not found, nothing to run");
                PipelineOutcome::Failed(Error::JobNotFound(id).to_string())
            }
            Err(e) if guard.begin_finish(JobStatus::Failed) => {
                self.fail(job_id, &e).await;
                PipelineOutcome::Failed(e.to_string())
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    error = %e,
                    "Job error after cancellation, recording CANCELLED"
                );
                let stats = RunStats::default();
                match self.finish_cancelled(job_id, &stats).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(subsystem = "jobs", component = "pipeline", job_id = %job_id, error = %e, "Failed to record job cancellation");
                        PipelineOutcome::Cancelled(stats)
                    }
                }
            }
        };

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "run",
            job_id = %job_id,
            outcome = ?outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "Job run finished"
        );
        outcome
    }

    async fn execute(&self, guard: &mut RunGuard) -> Result<PipelineOutcome> {
        let job_id = guard.job_id();
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                job_id = %job_id,
                status = %job.status,
                "Job already terminal, not running"
            );
            return Ok(PipelineOutcome::Skipped(job.status));
        }

        let prior_progress = job.progress;
        let mut stats = RunStats::default();
        if guard.is_cancelled() {
            return self.finish_cancelled(job_id, &stats).await;
        }

        // Collect
        self.store
            .update_job(job_id, JobUpdate::status(phase(guard, JobStatus::Planning)))
            .await?;
        let units = self.collect(job_id, job.textbook_id).await?;
        let total = units.len();
        stats.units_total = total;
        let resume_index = job.resume_index().min(total);
        stats.units_resumed_past = resume_index;
        self.store
            .update_job(job_id, JobUpdate::new().with_total_units(total as i32))
            .await?;
        if resume_index > 0 {
            debug!(
                subsystem = "jobs",
                component = "pipeline",
                job_id = %job_id,
                resume_index,
                total_units = total,
                progress = job.progress,
                "Resuming past completed units"
            );
        }

        // Plan
        let plan = match job.generation_plan {
            Some(plan) => {
                debug!(subsystem = "jobs", component = "pipeline", job_id = %job_id, "Reusing persisted generation plan");
                plan.validate(&units)?;
                plan
            }
            None => self.plan(job_id, job.textbook_id, &units).await?,
        };
        if guard.is_cancelled() {
            return self.finish_cancelled(job_id, &stats).await;
        }

        // Process
        self.store
            .update_job(job_id, JobUpdate::status(phase(guard, JobStatus::Processing)))
            .await?;
        for (unit_index, unit) in units.iter().enumerate().skip(resume_index) {
            let chunk_count = unit.chunks.len();
            debug!(
                subsystem = "jobs",
                component = "pipeline",
                job_id = %job_id,
                unit = %unit.label,
                chunk_count,
                "Processing unit"
            );
            for (chunk_index, chunk) in unit.chunks.iter().enumerate() {
                if !self.checkpoint(guard).await? {
                    return self.finish_cancelled(job_id, &stats).await;
                }
                self.process_chunk(job_id, &plan, chunk, &mut stats).await;

                // The last chunk's progress is reported by the completion.
                if unit_index + 1 == total && chunk_index + 1 == chunk_count {
                    break;
                }
                // Re-entering a partly done unit never moves the ledger backwards.
                let progress = ((unit_index as f64
                    + (chunk_index + 1) as f64 / chunk_count as f64)
                    / total as f64)
                    .max(prior_progress);
                self.store
                    .update_job(
                        job_id,
                        JobUpdate::new()
                            .with_progress(progress)
                            .with_current_unit(Some(unit.label.clone())),
                    )
                    .await?;
                // A cancelled run publishes once more, when it stops.
                if guard.is_cancelled() {
                    continue;
                }
                let status = if guard.is_paused() {
                    JobStatus::Paused
                } else {
                    JobStatus::Processing
                };
                self.hub.publish(
                    job_id,
                    ProgressSnapshot::new(
                        status,
                        progress,
                        Some(unit.label.clone()),
                        total as i32,
                        format!(
                            "Processed chunk {} of {} in {}",
                            chunk_index + 1,
                            chunk_count,
                            unit.label
                        ),
                    ),
                );
            }
        }

        // Finish
        if !guard.begin_finish(JobStatus::Completed) {
            return self.finish_cancelled(job_id, &stats).await;
        }
        self.store
            .update_job(job_id, JobUpdate::completed())
            .await?;
        self.hub.publish(
            job_id,
            ProgressSnapshot::new(JobStatus::Completed, 1.0, None, total as i32, "Job completed"),
        );
        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            chunks_processed = stats.chunks_processed,
            chunks_skipped = stats.chunks_skipped,
            chunks_failed = stats.chunks_failed,
            item_count = stats.items_stored,
            "Job completed"
        );
        Ok(PipelineOutcome::Completed(stats))
    }

    async fn collect(&self, job_id: Uuid, textbook_id: Uuid) -> Result<Vec<SourceUnit>> {
        let units = self
            .collector
            .collect_units(textbook_id)
            .await
            .map_err(|e| match e {
                Error::Collection(_) => e,
                other => Error::Collection(format!("Failed to collect source units: {}", other)),
            })?;
        let collected = units.len();
        let usable: Vec<SourceUnit> = units.into_iter().filter(SourceUnit::is_usable).collect();
        if usable.is_empty() {
            return Err(Error::Collection(format!(
                "No usable source units for textbook {}",
                textbook_id
            )));
        }
        if usable.len() < collected {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                job_id = %job_id,
                dropped = collected - usable.len(),
                "Ignoring source units without chunks"
            );
        }
        Ok(usable)
    }

    async fn plan(
        &self,
        job_id: Uuid,
        textbook_id: Uuid,
        units: &[SourceUnit],
    ) -> Result<GenerationPlan> {
        let started = Instant::now();
        let ctx = PlanningContext {
            job_id,
            textbook_id,
        };
        let plan = self
            .planner
            .plan(&ctx, units)
            .await
            .map_err(|e| match e {
                Error::Planning(_) => e,
                other => Error::Planning(other.to_string()),
            })?;
        plan.validate(units)?;
        self.store.set_job_plan(job_id, &plan).await?;
        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "plan",
            job_id = %job_id,
            chunk_count = plan.chunks.len(),
            item_count = plan.total_items(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Generation plan persisted"
        );
        Ok(plan)
    }

    /// Checkpoint that records a pause in the ledger while waiting.
    async fn checkpoint(&self, guard: &mut RunGuard) -> Result<bool> {
        if !guard.is_paused() || guard.is_cancelled() {
            return Ok(guard.checkpoint().await);
        }

        let job_id = guard.job_id();
        self.store
            .update_job(job_id, JobUpdate::status(JobStatus::Paused))
            .await?;
        self.publish_from_ledger(job_id, JobStatus::Paused, "Job paused")
            .await;
        info!(subsystem = "jobs", component = "pipeline", op = "checkpoint", job_id = %job_id, "Job paused at checkpoint");

        if !guard.checkpoint().await {
            return Ok(false);
        }
        self.store
            .update_job(job_id, JobUpdate::status(JobStatus::Processing))
            .await?;
        self.publish_from_ledger(job_id, JobStatus::Processing, "Job resumed")
            .await;
        info!(subsystem = "jobs", component = "pipeline", op = "checkpoint", job_id = %job_id, "Job resumed");
        Ok(true)
    }

    /// Generate, validate and store one chunk's items. Failures are
    /// counted and logged, never returned.
    async fn process_chunk(
        &self,
        job_id: Uuid,
        plan: &GenerationPlan,
        chunk: &Chunk,
        stats: &mut RunStats,
    ) {
        let Some(work) = plan.work_for(&chunk.id).filter(|w| w.total() > 0) else {
            trace!(job_id = %job_id, chunk_id = %chunk.id, "No planned work, chunk skipped");
            stats.chunks_skipped += 1;
            return;
        };

        let policy = self.config.generator_policy();
        let started = Instant::now();
        let generated: Result<Vec<GeneratedItem>> =
            retry_async(&policy, "generate", |attempt| async move {
                trace!(job_id = %job_id, chunk_id = %chunk.id, attempt, "Generating items");
                let items = self.generator.generate(chunk, work).await?;
                work.validate_items(&items)?;
                Ok(items)
            })
            .await;

        let items = match generated {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    chunk_id = %chunk.id,
                    attempt = self.config.generator_max_attempts,
                    error = %e,
                    "Chunk generation failed, skipping chunk"
                );
                stats.chunks_failed += 1;
                return;
            }
        };

        match self
            .store
            .store_generated_items(job_id, &chunk.id, &items)
            .await
        {
            Ok(stored) => {
                stats.chunks_processed += 1;
                stats.items_stored += stored;
                trace!(
                    job_id = %job_id,
                    chunk_id = %chunk.id,
                    item_count = stored,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Chunk items stored"
                );
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    chunk_id = %chunk.id,
                    error = %e,
                    "Failed to store generated items, skipping chunk"
                );
                stats.chunks_failed += 1;
            }
        }
    }

    async fn finish_cancelled(&self, job_id: Uuid, stats: &RunStats) -> Result<PipelineOutcome> {
        self.store
            .update_job(job_id, JobUpdate::status(JobStatus::Cancelled))
            .await?;
        self.publish_from_ledger(job_id, JobStatus::Cancelled, "Job cancelled")
            .await;
        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            chunks_processed = stats.chunks_processed,
            "Job cancelled"
        );
        Ok(PipelineOutcome::Cancelled(stats.clone()))
    }

    /// Record FAILED and publish a final snapshot. Reporting failures are
    /// logged and swallowed.
    async fn fail(&self, job_id: Uuid, err: &Error) {
        let message = err.to_string();
        error!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            error = %message,
            "Job failed"
        );
        if let Err(e) = self
            .store
            .update_job(job_id, JobUpdate::failed(message.clone()))
            .await
        {
            error!(subsystem = "jobs", component = "pipeline", job_id = %job_id, error = %e, "Failed to record job failure");
        }
        self.publish_from_ledger(job_id, JobStatus::Failed, &message)
            .await;
    }

    /// Publish the ledger row under `status`. Falls back to the cached
    /// snapshot when the ledger cannot be read.
    pub(crate) async fn publish_from_ledger(&self, job_id: Uuid, status: JobStatus, message: &str) {
        let mut snapshot = match self.store.get_job(job_id).await {
            Ok(Some(job)) => ProgressSnapshot::from_job(&job, message),
            Ok(None) => return,
            Err(e) => {
                warn!(subsystem = "jobs", component = "pipeline", job_id = %job_id, error = %e, "Ledger unreadable, publishing cached state");
                match self.hub.last_snapshot(job_id) {
                    Some(last) => last.restamped(message),
                    None => ProgressSnapshot::new(status, 0.0, None, 0, message),
                }
            }
        };
        snapshot.status = status;
        if status == JobStatus::Completed {
            snapshot.progress = 1.0;
        }
        self.hub.publish(job_id, snapshot);
    }
}

/// Ledger status for entering `status`; a run paused before its first
/// checkpoint stays PAUSED so the pause stays visible and resumable.
fn phase(guard: &RunGuard, status: JobStatus) -> JobStatus {
    if guard.is_paused() {
        JobStatus::Paused
    } else {
        status
    }
}
