//! Centralized default constants for the lectern job engine.
//!
//! Every crate reads its fallback values from here instead of defining its
//! own magic numbers. Config structs' `Default` impls mirror these.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target maximum characters per chunk.
pub const CHUNK_SIZE: usize = 1500;

/// Chunks shorter than this are merged into their predecessor.
pub const CHUNK_MIN_SIZE: usize = 200;

// =============================================================================
// PIPELINE
// =============================================================================

/// Generator attempts per chunk before the chunk is skipped.
pub const GENERATOR_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between per-chunk generator attempts (milliseconds).
pub const GENERATOR_RETRY_DELAY_MS: u64 = 500;

/// Bounded queue depth of each progress subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 64;

// =============================================================================
// RETRY / BACKOFF
// =============================================================================

/// Attempts for transient inference failures.
pub const RETRY_MAX_ATTEMPTS: u32 = 4;

/// First backoff delay (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Backoff ceiling (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Backoff growth factor.
pub const RETRY_MULTIPLIER: f64 = 2.0;

/// First backoff delay for reasoning-class models (milliseconds).
pub const RETRY_REASONING_BASE_DELAY_MS: u64 = 5000;

/// Backoff ceiling for reasoning-class models (milliseconds).
pub const RETRY_REASONING_MAX_DELAY_MS: u64 = 120_000;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible endpoint.
pub const LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model used for planning.
pub const LLM_PLAN_MODEL: &str = "gpt-4o-mini";

/// Default model used for item generation.
pub const LLM_GEN_MODEL: &str = "gpt-4o-mini";

/// HTTP timeout for a single chat completion (seconds).
pub const LLM_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature for planning (low: plans should be stable).
pub const LLM_PLAN_TEMPERATURE: f32 = 0.2;

/// Sampling temperature for generation.
pub const LLM_GEN_TEMPERATURE: f32 = 0.7;

/// Characters of chunk text shown to the planner per chunk.
pub const PLAN_PREVIEW_CHARS: usize = 400;

// =============================================================================
// DATABASE
// =============================================================================

pub const POOL_MAX_CONNECTIONS: u32 = 20;
pub const POOL_MIN_CONNECTIONS: u32 = 2;
pub const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;
pub const POOL_MAX_LIFETIME_SECS: u64 = 1800;

// =============================================================================
// SERVER
// =============================================================================

pub const SERVER_HOST: &str = "0.0.0.0";
pub const SERVER_PORT: u16 = 3000;

/// Idle window after which the progress stream emits a heartbeat (seconds).
pub const SSE_HEARTBEAT_SECS: u64 = 15;

/// Startup sweep of orphaned jobs is on unless disabled.
pub const RECOVER_ON_STARTUP: bool = true;
