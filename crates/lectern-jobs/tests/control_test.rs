//! Integration tests for JobControl command validation.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use lectern_core::{Chunk, Error, Job, JobStatus, JobStore, JobUpdate, SourceUnit};
use lectern_db::{MemoryJobStore, MemoryUnitCollector};
use lectern_inference::{MockGenerator, MockPlanner};
use lectern_jobs::{JobControl, JobPipeline, PipelineConfig};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Fixture {
    store: MemoryJobStore,
    control: JobControl,
    job_id: Uuid,
}

async fn fixture(generator: MockGenerator) -> Fixture {
    let store = MemoryJobStore::new();
    let collector = MemoryUnitCollector::new();
    let textbook = Uuid::now_v7();
    let doc = Uuid::now_v7();
    collector
        .set_units(
            textbook,
            vec![SourceUnit {
                id: doc,
                label: "photosynthesis.md".to_string(),
                chunks: (0..4)
                    .map(|i| Chunk {
                        id: Chunk::make_id(doc, i),
                        index: i,
                        heading: None,
                        text: format!("Light reactions, part {}.", i + 1),
                        start_offset: 0,
                        end_offset: 24,
                    })
                    .collect(),
            }],
        )
        .await;

    let job_id = Uuid::now_v7();
    store.create_job(job_id, textbook, 0).await.unwrap();

    let pipeline = JobPipeline::new(
        Arc::new(store.clone()),
        Arc::new(collector),
        Arc::new(MockPlanner::new()),
        Arc::new(generator),
        PipelineConfig::default().with_generator_retry_delay(Duration::from_millis(1)),
    );
    Fixture {
        store,
        control: JobControl::new(pipeline),
        job_id,
    }
}

async fn job(store: &MemoryJobStore, job_id: Uuid) -> Job {
    store.get_job(job_id).await.unwrap().expect("job exists")
}

async fn wait_for_status(store: &MemoryJobStore, job_id: Uuid, status: JobStatus) -> Job {
    for _ in 0..500 {
        let current = job(store, job_id).await;
        if current.status == status {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, status);
}

async fn wait_until_idle(control: &JobControl, job_id: Uuid) {
    for _ in 0..500 {
        if !control.pipeline().controller().is_running(job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} still running", job_id);
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let f = fixture(MockGenerator::new()).await;
    let missing = Uuid::now_v7();
    assert!(matches!(f.control.start(missing).await, Err(Error::JobNotFound(id)) if id == missing));
    assert!(matches!(f.control.pause(missing).await, Err(Error::JobNotFound(_))));
    assert!(matches!(f.control.resume(missing).await, Err(Error::JobNotFound(_))));
    assert!(matches!(f.control.cancel(missing).await, Err(Error::JobNotFound(_))));
}

#[tokio::test]
async fn test_start_runs_job_to_completion() {
    let f = fixture(MockGenerator::new()).await;
    let outcome = f.control.start(f.job_id).await.unwrap();
    assert_eq!(outcome.job_id, f.job_id);
    assert_eq!(outcome.status, JobStatus::Planning);

    let done = wait_for_status(&f.store, f.job_id, JobStatus::Completed).await;
    assert_eq!(done.progress, 1.0);
}

#[tokio::test]
async fn test_start_leaves_ledger_planning() {
    let generator = MockGenerator::new().with_latency(Duration::from_millis(50));
    let f = fixture(generator).await;
    let outcome = f.control.start(f.job_id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Planning);

    let launched = job(&f.store, f.job_id).await;
    assert!(
        matches!(launched.status, JobStatus::Planning | JobStatus::Processing),
        "got {}",
        launched.status
    );
    f.control.cancel(f.job_id).await.unwrap();
    wait_until_idle(&f.control, f.job_id).await;
}

#[tokio::test]
async fn test_start_rejects_running_and_terminal_jobs() {
    let generator = MockGenerator::new().with_latency(Duration::from_millis(20));
    let f = fixture(generator).await;
    f.control.start(f.job_id).await.unwrap();
    assert!(matches!(
        f.control.start(f.job_id).await,
        Err(Error::AlreadyRunning(_))
    ));

    wait_for_status(&f.store, f.job_id, JobStatus::Completed).await;
    wait_until_idle(&f.control, f.job_id).await;
    let err = f.control.start(f.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: "start",
            status: JobStatus::Completed
        }
    ));
    assert_eq!(err.to_string(), "Cannot start job in status COMPLETED");
}

#[tokio::test]
async fn test_pause_and_resume_idle_job() {
    let f = fixture(MockGenerator::new()).await;

    let paused = f.control.pause(f.job_id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(job(&f.store, f.job_id).await.status, JobStatus::Paused);
    let last = f
        .control
        .pipeline()
        .hub()
        .last_snapshot(f.job_id)
        .unwrap();
    assert_eq!(last.status, JobStatus::Paused);

    // Paused twice is not a valid transition.
    assert!(matches!(
        f.control.pause(f.job_id).await,
        Err(Error::InvalidTransition { action: "pause", .. })
    ));

    // Not running in this process: resume relaunches.
    let resumed = f.control.resume(f.job_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Planning);
    assert_ne!(job(&f.store, f.job_id).await.status, JobStatus::Paused);
    wait_for_status(&f.store, f.job_id, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_resume_requires_paused() {
    let f = fixture(MockGenerator::new()).await;
    let err = f.control.resume(f.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: "resume",
            status: JobStatus::Pending
        }
    ));
}

#[tokio::test]
async fn test_pause_and_resume_running_job() {
    let generator = MockGenerator::new().with_latency(Duration::from_millis(20));
    let f = fixture(generator.clone()).await;
    f.control.start(f.job_id).await.unwrap();
    wait_for_status(&f.store, f.job_id, JobStatus::Processing).await;

    f.control.pause(f.job_id).await.unwrap();
    assert!(f.control.pipeline().controller().is_paused(f.job_id));
    tokio::time::sleep(Duration::from_millis(60)).await;
    let calls_while_paused = generator.call_count();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(generator.call_count(), calls_while_paused);
    assert_eq!(job(&f.store, f.job_id).await.status, JobStatus::Paused);

    let resumed = f.control.resume(f.job_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Processing);
    wait_for_status(&f.store, f.job_id, JobStatus::Completed).await;
    assert_eq!(generator.call_count(), 4);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let generator = MockGenerator::new().with_latency(Duration::from_millis(20));
    let f = fixture(generator.clone()).await;
    f.control.start(f.job_id).await.unwrap();
    wait_for_status(&f.store, f.job_id, JobStatus::Processing).await;

    let cancelled = f.control.cancel(f.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    wait_until_idle(&f.control, f.job_id).await;

    assert_eq!(job(&f.store, f.job_id).await.status, JobStatus::Cancelled);
    assert!(generator.call_count() < 4);
    let last = f
        .control
        .pipeline()
        .hub()
        .last_snapshot(f.job_id)
        .unwrap();
    assert_eq!(last.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_idle_and_terminal_jobs() {
    let f = fixture(MockGenerator::new()).await;
    let cancelled = f.control.cancel(f.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(job(&f.store, f.job_id).await.status, JobStatus::Cancelled);

    assert!(matches!(
        f.control.cancel(f.job_id).await,
        Err(Error::InvalidTransition {
            action: "cancel",
            status: JobStatus::Cancelled
        })
    ));
}

#[tokio::test]
async fn test_failed_job_cannot_be_controlled() {
    let f = fixture(MockGenerator::new()).await;
    f.store
        .update_job(f.job_id, JobUpdate::failed("boom"))
        .await
        .unwrap();
    assert!(f.control.start(f.job_id).await.is_err());
    assert!(f.control.pause(f.job_id).await.is_err());
    assert!(f.control.cancel(f.job_id).await.is_err());
}
