//! UUID v7 utilities for time-ordered identifiers.
//!
//! Every record id (chain parameters, build requests, models, jobs, build
//! log entries) is a UUIDv7, so ids sort in creation order.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use ccbuilder_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert_ne!(a, b);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
