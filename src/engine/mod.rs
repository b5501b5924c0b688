//! engine
//!
//! Validates, queues and executes repository tasks.
//!
//! # Architecture
//!
//! Every mutation of repository state is a task. A task moves through a
//! fixed lifecycle owned by the [`Dispatcher`]:
//!
//! ```text
//! Validate -> Reserve -> Execute -> Commit
//! ```
//!
//! 1. **Validate**: the request is checked against the store and turned into
//!    a typed [`Job`]; failures are returned synchronously and nothing is
//!    queued
//! 2. **Reserve**: the job's resources are reserved through the
//!    [`LockManager`](crate::core::ops::LockManager), waiting as long as needed
//! 3. **Execute**: a pool worker runs the job body, which stages writes in a
//!    [`Transaction`](crate::core::store::Transaction)
//! 4. **Commit**: the store applies the transaction atomically, then the
//!    reservation is released and the terminal status reported
//!
//! # Invariants
//!
//! - Validation errors never queue, lock or write anything
//! - Job bodies never write to the store directly
//! - A failed or canceled task commits nothing
//! - Reservations are held until the body finishes, success or not
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use repodepot::core::clock::SystemClock;
//! use repodepot::core::store::MemoryStore;
//! use repodepot::core::types::{RepositoryId, VersionNumber};
//! use repodepot::engine::{Dispatcher, DispatcherSettings, Executor, TaskRequest};
//! use repodepot::engine::task::PublishRequest;
//! use repodepot::engine::upstream::MemoryUpstream;
//!
//! # async fn demo(repo: RepositoryId) {
//! let executor = Executor::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryUpstream::new()),
//!     Arc::new(SystemClock),
//! );
//! let dispatcher = Dispatcher::start(executor, DispatcherSettings::default());
//!
//! let handle = dispatcher
//!     .dispatch(TaskRequest::Publish(PublishRequest::new(repo, VersionNumber::ZERO)))
//!     .unwrap();
//! println!("{:?}", handle.wait().await);
//! # }
//! ```

pub mod copy;
pub mod dispatch;
pub mod exec;
pub mod policy;
pub mod publish;
pub mod task;
pub mod upstream;

pub use copy::{CopyEntry, CopyPlan, CopyPlanner, CopyRequest, DependencySolver, RequiresClosure};
pub use dispatch::{Dispatcher, DispatcherSettings};
pub use exec::{ExecError, Executor};
pub use task::{Job, TaskHandle, TaskId, TaskKind, TaskRequest, TaskStatus};

use thiserror::Error;

use crate::core::store::StoreError;
use policy::PolicyError;

/// Errors returned synchronously by [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The request is inconsistent with itself or with repository settings.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store failed while validating.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => DispatchError::NotFound(err.to_string()),
            other => DispatchError::Store(other),
        }
    }
}

impl From<PolicyError> for DispatchError {
    fn from(err: PolicyError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}
