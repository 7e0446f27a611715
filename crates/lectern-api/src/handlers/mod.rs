//! HTTP handlers for lectern-api.

pub mod jobs;
pub mod progress;
