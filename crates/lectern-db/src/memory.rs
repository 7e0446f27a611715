//! In-process job store and unit collector.
//!
//! Same contracts as the PostgreSQL implementations, without a database.
//! Used by the test suites and for running the engine without persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use lectern_core::{
    Error, GeneratedItem, GenerationPlan, Job, JobStatus, JobStore, JobUpdate, Result, SourceUnit,
    UnitCollector,
};

use crate::chunking::{Chunker, MarkdownChunker};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    items: HashMap<(Uuid, String), Vec<GeneratedItem>>,
    updates: Vec<(Uuid, JobUpdate)>,
}

/// [`JobStore`] backed by a `HashMap`. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<RwLock<MemoryState>>,
    fail_item_writes: Arc<AtomicBool>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job record as-is (seeding crash/restart states).
    pub async fn insert_job(&self, job: Job) {
        self.state.write().await.jobs.insert(job.id, job);
    }

    /// Make `store_generated_items` fail until switched off again.
    pub fn set_fail_item_writes(&self, fail: bool) {
        self.fail_item_writes.store(fail, Ordering::SeqCst);
    }

    /// Items stored for one chunk.
    pub async fn items_for_chunk(&self, job_id: Uuid, chunk_id: &str) -> Vec<GeneratedItem> {
        self.state
            .read()
            .await
            .items
            .get(&(job_id, chunk_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total items stored for a job.
    pub async fn count_items(&self, job_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .items
            .iter()
            .filter(|((id, _), _)| *id == job_id)
            .map(|(_, items)| items.len())
            .sum()
    }

    /// Every update applied to a job, in order.
    pub async fn updates_for(&self, job_id: Uuid) -> Vec<JobUpdate> {
        self.state
            .read()
            .await
            .updates
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, update)| update.clone())
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, id: Uuid, textbook_id: Uuid, total_units: i32) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&id) {
            return Ok(false);
        }
        state
            .jobs
            .insert(id, Job::new(id, textbook_id, total_units.max(0)));
        Ok(true)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        update.apply(job);
        state.updates.push((id, update));
        Ok(true)
    }

    async fn set_job_plan(&self, id: Uuid, plan: &GenerationPlan) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) => {
                job.generation_plan = Some(plan.clone());
                job.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn store_generated_items(
        &self,
        job_id: Uuid,
        chunk_id: &str,
        items: &[GeneratedItem],
    ) -> Result<usize> {
        if self.fail_item_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("item store unavailable".to_string()));
        }
        self.state
            .write()
            .await
            .items
            .insert((job_id, chunk_id.to_string()), items.to_vec());
        Ok(items.len())
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

/// [`UnitCollector`] over units registered in memory.
#[derive(Clone, Default)]
pub struct MemoryUnitCollector {
    units: Arc<RwLock<HashMap<Uuid, Vec<SourceUnit>>>>,
    chunker: MarkdownChunker,
}

impl MemoryUnitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the units of a textbook.
    pub async fn set_units(&self, textbook_id: Uuid, units: Vec<SourceUnit>) {
        self.units.write().await.insert(textbook_id, units);
    }

    /// Chunk a document and append it as a unit of the textbook.
    pub async fn add_document(&self, textbook_id: Uuid, label: &str, content: &str) -> SourceUnit {
        let id = Uuid::now_v7();
        let unit = SourceUnit {
            id,
            label: label.to_string(),
            chunks: self.chunker.chunk(id, content),
        };
        self.units
            .write()
            .await
            .entry(textbook_id)
            .or_default()
            .push(unit.clone());
        unit
    }
}

#[async_trait]
impl UnitCollector for MemoryUnitCollector {
    async fn collect_units(&self, textbook_id: Uuid) -> Result<Vec<SourceUnit>> {
        Ok(self
            .units
            .read()
            .await
            .get(&textbook_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(kind: &str, n: u32) -> GeneratedItem {
        GeneratedItem {
            kind: kind.to_string(),
            content: json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn test_create_job_is_idempotent() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        assert!(store.create_job(id, Uuid::nil(), 3).await.unwrap());
        assert!(!store.create_job(id, Uuid::nil(), 5).await.unwrap());
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_units, 3);
    }

    #[tokio::test]
    async fn test_update_unknown_job_returns_false() {
        let store = MemoryJobStore::new();
        let updated = store
            .update_job(Uuid::now_v7(), JobUpdate::status(JobStatus::Planning))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_update_applies_invariants() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        store.create_job(id, Uuid::nil(), 2).await.unwrap();
        store.update_job(id, JobUpdate::completed()).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert_eq!(store.updates_for(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_items_overwrites() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        store
            .store_generated_items(id, "c:0", &[item("mcq", 1), item("mcq", 2)])
            .await
            .unwrap();
        store
            .store_generated_items(id, "c:0", &[item("mcq", 3)])
            .await
            .unwrap();
        let items = store.items_for_chunk(id, "c:0").await;
        assert_eq!(items, vec![item("mcq", 3)]);
        assert_eq!(store.count_items(id).await, 1);
    }

    #[tokio::test]
    async fn test_failing_item_writes() {
        let store = MemoryJobStore::new();
        store.set_fail_item_writes(true);
        assert!(store
            .store_generated_items(Uuid::nil(), "c:0", &[item("mcq", 1)])
            .await
            .is_err());
        store.set_fail_item_writes(false);
        assert!(store
            .store_generated_items(Uuid::nil(), "c:0", &[item("mcq", 1)])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_list_jobs_by_status() {
        let store = MemoryJobStore::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        store.create_job(a, Uuid::nil(), 1).await.unwrap();
        store.create_job(b, Uuid::nil(), 1).await.unwrap();
        store
            .update_job(b, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();

        let processing = store
            .list_jobs_by_status(&[JobStatus::Processing, JobStatus::Planning])
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, b);
    }

    #[tokio::test]
    async fn test_set_plan() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        assert!(!store.set_job_plan(id, &GenerationPlan::default()).await.unwrap());
        store.create_job(id, Uuid::nil(), 1).await.unwrap();
        assert!(store.set_job_plan(id, &GenerationPlan::default()).await.unwrap());
        assert!(store.get_job(id).await.unwrap().unwrap().generation_plan.is_some());
    }

    #[tokio::test]
    async fn test_memory_collector_chunks_documents() {
        let collector = MemoryUnitCollector::new();
        let textbook = Uuid::now_v7();
        collector
            .add_document(textbook, "ch1.md", "# One\n\nFirst chapter.\n")
            .await;
        collector.add_document(textbook, "empty.md", "").await;

        let units = collector.collect_units(textbook).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].label, "ch1.md");
        assert!(units[0].is_usable());
        assert!(!units[1].is_usable());
        assert!(collector
            .collect_units(Uuid::now_v7())
            .await
            .unwrap()
            .is_empty());
    }
}
