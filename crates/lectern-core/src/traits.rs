//! Trait seams between the job engine and its collaborators.
//!
//! The engine only talks to storage, collection and inference through these
//! traits; concrete implementations live in `lectern-db` and
//! `lectern-inference`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Chunk, ChunkPlan, GeneratedItem, GenerationPlan, Job, JobStatus, JobUpdate, PlanningContext,
    SourceUnit,
};

// =============================================================================
// JOB LEDGER
// =============================================================================

/// Durable record of generation jobs and their output.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `PENDING` job. Returns `false` if the id already exists.
    async fn create_job(&self, id: Uuid, textbook_id: Uuid, total_units: i32) -> Result<bool>;

    /// Fetch a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Apply a partial update atomically. Returns `false` if the job is unknown.
    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<bool>;

    /// Persist the planner output. Returns `false` if the job is unknown.
    async fn set_job_plan(&self, id: Uuid, plan: &GenerationPlan) -> Result<bool>;

    /// Store items for a chunk, keyed by `(job_id, chunk_id, ordinal)`.
    ///
    /// Writing the same chunk twice overwrites rather than duplicates.
    /// Returns the number of items written.
    async fn store_generated_items(
        &self,
        job_id: Uuid,
        chunk_id: &str,
        items: &[GeneratedItem],
    ) -> Result<usize>;

    /// Jobs currently in any of `statuses`, oldest first.
    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;
}

// =============================================================================
// COLLECTION
// =============================================================================

/// Produces the ordered top-level units (source documents split into chunks)
/// for a textbook.
#[async_trait]
pub trait UnitCollector: Send + Sync {
    async fn collect_units(&self, textbook_id: Uuid) -> Result<Vec<SourceUnit>>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Decides how much of what to generate for every chunk.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &PlanningContext, units: &[SourceUnit]) -> Result<GenerationPlan>;
}

/// Produces items for one chunk according to its planned work.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, chunk: &Chunk, work: &ChunkPlan) -> Result<Vec<GeneratedItem>>;
}
