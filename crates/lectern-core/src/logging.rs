//! Structured logging field names shared by every lectern crate.
//!
//! Use these constants as `tracing` field names so logs can be queried by the
//! same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (chunk skipped, retry) |
//! | INFO  | Lifecycle events (job started, paused, completed), startup/shutdown |
//! | DEBUG | Decision points, resume index, plan reuse |
//! | TRACE | Per-chunk iteration, hub deliveries |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pipeline", "controller", "hub", "control", "recovery", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "start", "plan", "generate", "checkpoint", "publish"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Parent collection of a job.
pub const TEXTBOOK_ID: &str = "textbook_id";

/// Label of the top-level unit being executed.
pub const UNIT: &str = "unit";

/// Chunk identifier (`<document>:<index>`).
pub const CHUNK_ID: &str = "chunk_id";

/// Job status at the time of the event.
pub const STATUS: &str = "status";

/// Model name used for an inference call.
pub const MODEL: &str = "model";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Fractional job progress.
pub const PROGRESS: &str = "progress";

/// 1-based attempt number of a retried call.
pub const ATTEMPT: &str = "attempt";

/// Number of chunks in a unit or plan.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of items generated or stored.
pub const ITEM_COUNT: &str = "item_count";

/// Number of active subscribers for a job.
pub const SUBSCRIBER_COUNT: &str = "subscriber_count";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";
