//! Fan-out of progress snapshots to live observers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full
//! queue misses that update (observers still get the next one, and the
//! latest state is always available from the cache), a closed queue is
//! pruned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

use lectern_core::{defaults, ProgressSnapshot};

#[derive(Default)]
struct HubState {
    subscribers: HashMap<Uuid, Vec<(u64, mpsc::Sender<ProgressSnapshot>)>>,
    last: HashMap<Uuid, ProgressSnapshot>,
    next_id: u64,
}

/// Per-job broadcaster with a last-snapshot cache.
///
/// Cheap to clone; clones share state. The mutex is never held across an
/// await.
#[derive(Clone)]
pub struct ProgressHub {
    state: Arc<Mutex<HubState>>,
    capacity: usize,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(defaults::SUBSCRIBER_CAPACITY)
    }
}

impl ProgressHub {
    /// Hub whose subscriber queues hold `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a queue receiving every snapshot published for `job_id` from now on.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let subscribers = state.subscribers.entry(job_id).or_default();
        subscribers.push((id, tx));
        debug!(
            subsystem = "jobs",
            component = "hub",
            job_id = %job_id,
            subscriber_count = subscribers.len(),
            "Subscriber added"
        );
        Subscription {
            hub: self.clone(),
            job_id,
            id,
            rx,
        }
    }

    /// Remove a subscriber. Safe when already removed.
    pub fn unsubscribe(&self, job_id: Uuid, subscriber_id: u64) {
        let mut state = self.lock();
        let now_empty = match state.subscribers.get_mut(&job_id) {
            Some(subscribers) => {
                subscribers.retain(|(id, _)| *id != subscriber_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.subscribers.remove(&job_id);
        }
    }

    /// Cache `snapshot` as the job's last state and offer it to every subscriber.
    pub fn publish(&self, job_id: Uuid, snapshot: ProgressSnapshot) {
        let mut state = self.lock();
        state.last.insert(job_id, snapshot.clone());

        let now_empty = match state.subscribers.get_mut(&job_id) {
            Some(subscribers) => {
                subscribers.retain(|(id, tx)| match tx.try_send(snapshot.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        trace!(job_id = %job_id, subscriber = id, "Subscriber queue full, update dropped");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.subscribers.remove(&job_id);
        }

        trace!(
            subsystem = "jobs",
            component = "hub",
            job_id = %job_id,
            status = %snapshot.status,
            progress = snapshot.progress,
            "Snapshot published"
        );
    }

    /// Last snapshot published for `job_id`, if any.
    pub fn last_snapshot(&self, job_id: Uuid) -> Option<ProgressSnapshot> {
        self.lock().last.get(&job_id).cloned()
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.lock().subscribers.get(&job_id).map_or(0, Vec::len)
    }
}

/// Receiving end of a subscription. Unsubscribes on drop.
pub struct Subscription {
    hub: ProgressHub,
    job_id: Uuid,
    id: u64,
    rx: mpsc::Receiver<ProgressSnapshot>,
}

impl Subscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next snapshot. `None` once the hub side is gone.
    pub async fn recv(&mut self) -> Option<ProgressSnapshot> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<ProgressSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.job_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::JobStatus;

    fn snapshot(progress: f64) -> ProgressSnapshot {
        ProgressSnapshot::new(JobStatus::Processing, progress, None, 3, "step")
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = ProgressHub::new(8);
        let job = Uuid::now_v7();
        let mut a = hub.subscribe(job);
        let mut b = hub.subscribe(job);
        assert_eq!(hub.subscriber_count(job), 2);

        hub.publish(job, snapshot(0.5));
        assert_eq!(a.recv().await.unwrap().progress, 0.5);
        assert_eq!(b.recv().await.unwrap().progress, 0.5);
    }

    #[test]
    fn test_publish_caches_without_subscribers() {
        let hub = ProgressHub::default();
        let job = Uuid::now_v7();
        assert!(hub.last_snapshot(job).is_none());
        hub.publish(job, snapshot(0.25));
        hub.publish(job, snapshot(0.75));
        assert_eq!(hub.last_snapshot(job).unwrap().progress, 0.75);
    }

    #[test]
    fn test_full_queue_drops_update() {
        let hub = ProgressHub::new(1);
        let job = Uuid::now_v7();
        let mut sub = hub.subscribe(job);

        hub.publish(job, snapshot(0.1));
        hub.publish(job, snapshot(0.2));

        assert_eq!(sub.try_recv().unwrap().progress, 0.1);
        assert!(sub.try_recv().is_none());
        assert_eq!(hub.subscriber_count(job), 1);
        assert_eq!(hub.last_snapshot(job).unwrap().progress, 0.2);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = ProgressHub::default();
        let job = Uuid::now_v7();
        let sub = hub.subscribe(job);
        let id = sub.id();
        drop(sub);
        assert_eq!(hub.subscriber_count(job), 0);
        hub.unsubscribe(job, id);
        hub.publish(job, snapshot(0.3));
    }

    #[test]
    fn test_jobs_are_isolated() {
        let hub = ProgressHub::default();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let mut sub = hub.subscribe(first);
        hub.publish(second, snapshot(0.9));
        assert!(sub.try_recv().is_none());
        assert!(hub.last_snapshot(first).is_none());
    }
}
