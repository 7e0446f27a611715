//! Mock planner and generator for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lectern_inference::mock::{MockGenerator, MockPlanner};
//!
//! let planner = MockPlanner::new().with_quota("mcq", 2);
//! let generator = MockGenerator::new()
//!     .with_always_fail("doc:3")
//!     .with_hook(|call, _chunk| if call == 2 { controller.cancel(job_id); });
//!
//! // ... run a job ...
//! assert_eq!(generator.call_count(), 2);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use lectern_core::{
    Chunk, ChunkPlan, Error, GeneratedItem, GenerationPlan, Generator, ItemQuota, Planner,
    PlanningContext, Result, SourceUnit,
};

// =============================================================================
// PLANNER
// =============================================================================

#[derive(Debug, Clone)]
struct MockPlannerConfig {
    quotas: Vec<ItemQuota>,
    fixed_plan: Option<GenerationPlan>,
    skip_chunks: HashSet<String>,
    failure: Option<String>,
    latency: Duration,
}

impl Default for MockPlannerConfig {
    fn default() -> Self {
        Self {
            quotas: vec![ItemQuota {
                kind: "mcq".to_string(),
                count: 2,
            }],
            fixed_plan: None,
            skip_chunks: HashSet::new(),
            failure: None,
            latency: Duration::ZERO,
        }
    }
}

/// Planner that assigns the same quotas to every chunk.
#[derive(Clone, Default)]
pub struct MockPlanner {
    config: Arc<MockPlannerConfig>,
    calls: Arc<AtomicUsize>,
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the per-chunk quotas with a single `(kind, count)`.
    pub fn with_quota(mut self, kind: impl Into<String>, count: u32) -> Self {
        Arc::make_mut(&mut self.config).quotas = vec![ItemQuota {
            kind: kind.into(),
            count,
        }];
        self
    }

    /// Return this plan verbatim, whatever the units.
    pub fn with_plan(mut self, plan: GenerationPlan) -> Self {
        Arc::make_mut(&mut self.config).fixed_plan = Some(plan);
        self
    }

    /// Leave a chunk out of the plan (zero planned work).
    pub fn with_skipped_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .skip_chunks
            .insert(chunk_id.into());
        self
    }

    /// Fail every call with a planning error.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(message.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, _ctx: &PlanningContext, units: &[SourceUnit]) -> Result<GenerationPlan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if let Some(ref message) = self.config.failure {
            return Err(Error::Planning(message.clone()));
        }
        if let Some(ref plan) = self.config.fixed_plan {
            return Ok(plan.clone());
        }
        let chunks = units
            .iter()
            .flat_map(|u| u.chunks.iter())
            .filter(|c| !self.config.skip_chunks.contains(&c.id))
            .map(|c| ChunkPlan {
                chunk_id: c.id.clone(),
                items: self.config.quotas.clone(),
            })
            .collect();
        Ok(GenerationPlan { chunks })
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// Callback run at the start of every generator call with the 1-based
/// call number and the chunk.
pub type GeneratorHook = Arc<dyn Fn(usize, &Chunk) + Send + Sync>;

#[derive(Clone, Default)]
struct MockGeneratorConfig {
    latency: Duration,
    always_fail: HashSet<String>,
    fail_first: HashMap<String, usize>,
    invalid_output: HashSet<String>,
    hook: Option<GeneratorHook>,
}

/// A recorded generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub chunk_id: String,
    /// 1-based count of calls for this chunk so far.
    pub attempt: usize,
}

/// Generator that writes exactly the planned number of items, with
/// scriptable failures.
#[derive(Clone, Default)]
pub struct MockGenerator {
    config: Arc<MockGeneratorConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Every call for this chunk fails.
    pub fn with_always_fail(mut self, chunk_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .always_fail
            .insert(chunk_id.into());
        self
    }

    /// The first `times` calls for this chunk fail with a transient error.
    pub fn with_fail_first(mut self, chunk_id: impl Into<String>, times: usize) -> Self {
        Arc::make_mut(&mut self.config)
            .fail_first
            .insert(chunk_id.into(), times);
        self
    }

    /// Calls for this chunk return items of a kind nobody planned.
    pub fn with_invalid_output(mut self, chunk_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .invalid_output
            .insert(chunk_id.into());
        self
    }

    /// Run `hook` at the start of every call.
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, &Chunk) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.config).hook = Some(Arc::new(hook));
        self
    }

    fn log(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All calls, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.log().clone()
    }

    pub fn call_count(&self) -> usize {
        self.log().len()
    }

    /// Number of calls made for one chunk.
    pub fn calls_for(&self, chunk_id: &str) -> usize {
        self.log().iter().filter(|c| c.chunk_id == chunk_id).count()
    }

    /// Distinct chunk ids in first-call order.
    pub fn chunks_called(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.log()
            .iter()
            .filter(|c| seen.insert(c.chunk_id.clone()))
            .map(|c| c.chunk_id.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, chunk: &Chunk, work: &ChunkPlan) -> Result<Vec<GeneratedItem>> {
        let (call_number, attempt) = {
            let mut log = self.log();
            let attempt = log.iter().filter(|c| c.chunk_id == chunk.id).count() + 1;
            log.push(MockCall {
                chunk_id: chunk.id.clone(),
                attempt,
            });
            (log.len(), attempt)
        };

        if let Some(ref hook) = self.config.hook {
            hook(call_number, chunk);
        }
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.config.always_fail.contains(&chunk.id) {
            return Err(Error::Generation(format!(
                "mock generator failure for chunk {}",
                chunk.id
            )));
        }
        if let Some(&times) = self.config.fail_first.get(&chunk.id) {
            if attempt <= times {
                return Err(Error::Transient(format!(
                    "mock transient failure {} for chunk {}",
                    attempt, chunk.id
                )));
            }
        }
        if self.config.invalid_output.contains(&chunk.id) {
            return Ok(vec![GeneratedItem {
                kind: "unplanned".to_string(),
                content: json!({ "chunk_id": chunk.id }),
            }]);
        }

        Ok(work
            .items
            .iter()
            .flat_map(|quota| {
                (0..quota.count).map(move |n| GeneratedItem {
                    kind: quota.kind.clone(),
                    content: json!({
                        "chunk_id": chunk.id,
                        "n": n,
                        "question": format!("{} #{} about {}", quota.kind, n + 1, chunk.id),
                    }),
                })
            })
            .collect())
    }
}
