//! # lectern-core
//!
//! Core types, traits, and abstractions for the lectern job engine.
//!
//! This crate provides the job ledger model, the live-progress wire types, and
//! the trait seams (`JobStore`, `UnitCollector`, `Planner`, `Generator`) that
//! the other lectern crates implement or consume.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod retry;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{ProgressEventKind, ProgressMessage, ProgressSnapshot};
pub use models::*;
pub use retry::{retry_async, RetryPolicy};
pub use traits::*;
pub use uuid_utils::new_v7;
