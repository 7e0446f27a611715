//! UUIDv7 helpers.
//!
//! Job ids are UUIDv7 so ledger rows sort by creation time.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
