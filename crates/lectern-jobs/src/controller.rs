//! In-process registry of running jobs and their pause/cancel signals.
//!
//! Cancellation is cooperative: the pipeline calls
//! [`RunGuard::checkpoint`] before every chunk, which returns `false` once
//! the job is cancelled and parks the task (without blocking a thread)
//! while the job is paused.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use lectern_core::JobStatus;

/// Signals and task reference for one run of a job. Never persisted.
struct RunHandle {
    run_id: u64,
    cancel: Arc<watch::Sender<bool>>,
    pause: Arc<watch::Sender<bool>>,
    /// Terminal status the run committed to; cancel is too late after.
    finishing: Option<JobStatus>,
    task: Option<AbortHandle>,
}

impl RunHandle {
    fn is_live(&self) -> bool {
        self.task.as_ref().map_or(true, |t| !t.is_finished())
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSignal {
    /// No run is registered for the job.
    NotRunning,
    /// The run was signalled and will stop at its next checkpoint.
    Signalled,
    /// The run already committed to the given terminal status.
    TooLate(JobStatus),
}

#[derive(Default)]
struct ControllerInner {
    runs: RwLock<HashMap<Uuid, RunHandle>>,
    next_run_id: AtomicU64,
}

/// Registry mapping running job ids to their control signals.
///
/// Cheap to clone; clones share the registry. The lock is never held
/// across an await.
#[derive(Clone, Default)]
pub struct JobController {
    inner: Arc<ControllerInner>,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, RunHandle>> {
        self.inner.runs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, RunHandle>> {
        self.inner.runs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn new_run(&self, job_id: Uuid) -> (RunHandle, RunGuard) {
        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let pause = Arc::new(pause_tx);
        let handle = RunHandle {
            run_id,
            cancel: cancel.clone(),
            pause: pause.clone(),
            finishing: None,
            task: None,
        };
        let guard = RunGuard {
            controller: self.clone(),
            job_id,
            run_id,
            cancel_rx,
            pause_rx,
            _cancel: cancel,
            _pause: pause,
        };
        (handle, guard)
    }

    /// Register a run for `job_id`, replacing any existing registration.
    ///
    /// Dropping the returned guard unregisters the run.
    pub fn register(&self, job_id: Uuid) -> RunGuard {
        let (handle, guard) = self.new_run(job_id);
        if let Some(old) = self.write().insert(job_id, handle) {
            debug!(
                subsystem = "jobs",
                component = "controller",
                job_id = %job_id,
                replaced_run = old.run_id,
                "Replaced existing run registration"
            );
        }
        guard
    }

    /// Register a run unless one is already live for `job_id`.
    pub fn try_register(&self, job_id: Uuid) -> Option<RunGuard> {
        let mut runs = self.write();
        if runs.get(&job_id).is_some_and(RunHandle::is_live) {
            return None;
        }
        let (handle, guard) = self.new_run(job_id);
        runs.insert(job_id, handle);
        Some(guard)
    }

    /// Record the task executing a run. Ignored if the run was replaced.
    pub fn attach_task(&self, job_id: Uuid, run_id: u64, task: AbortHandle) {
        if let Some(handle) = self.write().get_mut(&job_id) {
            if handle.run_id == run_id {
                handle.task = Some(task);
            }
        }
    }

    /// Remove the registration for `job_id`. Idempotent.
    pub fn unregister(&self, job_id: Uuid) {
        self.write().remove(&job_id);
    }

    fn unregister_run(&self, job_id: Uuid, run_id: u64) {
        let mut runs = self.write();
        if runs.get(&job_id).is_some_and(|h| h.run_id == run_id) {
            runs.remove(&job_id);
        }
    }

    /// Ask a running job to pause at its next checkpoint.
    /// Returns whether the job was registered.
    pub fn pause(&self, job_id: Uuid) -> bool {
        match self.read().get(&job_id) {
            Some(handle) => {
                handle.pause.send_replace(true);
                info!(subsystem = "jobs", component = "controller", job_id = %job_id, "Pause signalled");
                true
            }
            None => false,
        }
    }

    /// Clear the pause signal. Returns whether the job was registered.
    pub fn resume(&self, job_id: Uuid) -> bool {
        match self.read().get(&job_id) {
            Some(handle) => {
                handle.pause.send_replace(false);
                info!(subsystem = "jobs", component = "controller", job_id = %job_id, "Resume signalled");
                true
            }
            None => false,
        }
    }

    /// Signal cancellation. Terminal: a cancelled run never un-cancels.
    pub fn try_cancel(&self, job_id: Uuid) -> CancelSignal {
        let runs = self.read();
        match runs.get(&job_id) {
            None => CancelSignal::NotRunning,
            Some(RunHandle {
                finishing: Some(status),
                ..
            }) => CancelSignal::TooLate(*status),
            Some(handle) => {
                handle.cancel.send_replace(true);
                info!(subsystem = "jobs", component = "controller", job_id = %job_id, "Cancel signalled");
                CancelSignal::Signalled
            }
        }
    }

    /// Signal cancellation. Returns whether the job was registered.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        self.try_cancel(job_id) != CancelSignal::NotRunning
    }

    /// Mark a run as finishing with `status` unless it was cancelled first.
    ///
    /// `None` if the run is no longer the registered one.
    fn begin_finish(&self, job_id: Uuid, run_id: u64, status: JobStatus) -> Option<bool> {
        let mut runs = self.write();
        let handle = runs.get_mut(&job_id).filter(|h| h.run_id == run_id)?;
        if *handle.cancel.borrow() {
            return Some(false);
        }
        handle.finishing = Some(status);
        Some(true)
    }

    /// Cooperative checkpoint by job id.
    ///
    /// `false` if cancelled; waits while paused; `true` for unregistered jobs.
    pub async fn checkpoint(&self, job_id: Uuid) -> bool {
        let receivers = self
            .read()
            .get(&job_id)
            .map(|h| (h.cancel.subscribe(), h.pause.subscribe()));
        match receivers {
            Some((mut cancel, mut pause)) => wait_for_signals(&mut cancel, &mut pause).await,
            None => true,
        }
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.read().get(&job_id).is_some_and(RunHandle::is_live)
    }

    pub fn is_paused(&self, job_id: Uuid) -> bool {
        self.read().get(&job_id).is_some_and(|h| *h.pause.borrow())
    }

    pub fn is_cancelled(&self, job_id: Uuid) -> bool {
        self.read().get(&job_id).is_some_and(|h| *h.cancel.borrow())
    }

    /// Ids of every job with a live run.
    pub fn list_running(&self) -> HashSet<Uuid> {
        self.read()
            .iter()
            .filter(|(_, h)| h.is_live())
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Wait until not paused (`true`) or cancelled (`false`).
async fn wait_for_signals(
    cancel: &mut watch::Receiver<bool>,
    pause: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if *cancel.borrow_and_update() {
            return false;
        }
        if !*pause.borrow_and_update() {
            return true;
        }
        let closed = tokio::select! {
            changed = cancel.changed() => changed.is_err(),
            changed = pause.changed() => changed.is_err(),
        };
        if closed {
            return !*cancel.borrow();
        }
    }
}

/// Registration of one run. Unregisters on drop, but only if the
/// registration still belongs to this run.
pub struct RunGuard {
    controller: JobController,
    job_id: Uuid,
    run_id: u64,
    cancel_rx: watch::Receiver<bool>,
    pause_rx: watch::Receiver<bool>,
    _cancel: Arc<watch::Sender<bool>>,
    _pause: Arc<watch::Sender<bool>>,
}

impl RunGuard {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    /// `false` if cancelled; suspends while paused.
    pub async fn checkpoint(&mut self) -> bool {
        wait_for_signals(&mut self.cancel_rx, &mut self.pause_rx).await
    }

    /// Commit to ending with `status` (COMPLETED or FAILED). Returns
    /// `false` if a cancel got in first.
    pub fn begin_finish(&self, status: JobStatus) -> bool {
        self.controller
            .begin_finish(self.job_id, self.run_id, status)
            .unwrap_or_else(|| !self.is_cancelled())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.controller.unregister_run(self.job_id, self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_and_unregister() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.register(id);
        assert!(controller.is_running(id));
        assert!(controller.list_running().contains(&id));
        drop(guard);
        assert!(!controller.is_running(id));
        controller.unregister(id);
        controller.unregister(id);
    }

    #[test]
    fn test_signals_report_registration() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        assert!(!controller.pause(id));
        assert!(!controller.resume(id));
        assert!(!controller.cancel(id));

        let _guard = controller.register(id);
        assert!(controller.pause(id));
        assert!(controller.is_paused(id));
        assert!(controller.resume(id));
        assert!(!controller.is_paused(id));
        assert!(controller.cancel(id));
        assert!(controller.is_cancelled(id));
    }

    #[test]
    fn test_try_register_rejects_live_run() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.try_register(id).unwrap();
        assert!(controller.try_register(id).is_none());
        drop(guard);
        assert!(controller.try_register(id).is_some());
    }

    #[test]
    fn test_stale_guard_does_not_unregister_new_run() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let first = controller.register(id);
        let second = controller.register(id);
        assert_ne!(first.run_id(), second.run_id());
        drop(first);
        assert!(controller.is_running(id));
        drop(second);
        assert!(!controller.is_running(id));
    }

    #[tokio::test]
    async fn test_checkpoint_unregistered_is_true() {
        let controller = JobController::new();
        assert!(controller.checkpoint(Uuid::now_v7()).await);
    }

    #[tokio::test]
    async fn test_checkpoint_cancelled_is_false() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let mut guard = controller.register(id);
        assert!(guard.checkpoint().await);
        controller.cancel(id);
        assert!(!guard.checkpoint().await);
        assert!(!controller.checkpoint(id).await);
    }

    #[tokio::test]
    async fn test_checkpoint_waits_while_paused() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let mut guard = controller.register(id);
        controller.pause(id);

        let waiter = tokio::spawn(async move { guard.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        controller.resume(id);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn test_cancel_while_paused_releases_checkpoint() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let mut guard = controller.register(id);
        controller.pause(id);

        let waiter = tokio::spawn(async move { guard.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.cancel(id);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!result);
    }

    #[test]
    fn test_cancel_after_begin_finish_is_too_late() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.register(id);
        assert!(guard.begin_finish(JobStatus::Completed));
        assert_eq!(
            controller.try_cancel(id),
            CancelSignal::TooLate(JobStatus::Completed)
        );
        assert!(!guard.is_cancelled());
    }

    #[test]
    fn test_cancel_after_failure_commit_reports_failed() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.register(id);
        assert!(guard.begin_finish(JobStatus::Failed));
        assert_eq!(
            controller.try_cancel(id),
            CancelSignal::TooLate(JobStatus::Failed)
        );
    }

    #[test]
    fn test_begin_finish_after_cancel_fails() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.register(id);
        assert_eq!(controller.try_cancel(id), CancelSignal::Signalled);
        assert!(!guard.begin_finish(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_finished_task_is_not_running() {
        let controller = JobController::new();
        let id = Uuid::now_v7();
        let guard = controller.register(id);
        let task = tokio::spawn(async {});
        controller.attach_task(id, guard.run_id(), task.abort_handle());
        task.await.unwrap();
        assert!(!controller.is_running(id));
        assert!(controller.try_register(id).is_some());
        drop(guard);
    }
}
