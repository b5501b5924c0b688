//! core::ops
//!
//! Resource locking for background tasks.
//!
//! # Modules
//!
//! - [`lock`] - Shared/exclusive all-or-nothing reservations
//!
//! # Architecture
//!
//! Every mutating task:
//! 1. Declares its full resource set before it is queued
//! 2. Waits until the whole set is granted
//! 3. Runs with no further lock acquisition
//! 4. Releases every reservation when it finishes, fails or is cancelled

pub mod lock;

pub use lock::{LockManager, Reservation, ResourceState};
