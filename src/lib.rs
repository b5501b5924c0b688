//! repodepot - Versioned content repositories with serialized mutation tasks
//!
//! A repository is an append-only sequence of immutable versions. Tasks
//! (sync, publish, copy, modify) create new versions and publications;
//! a dispatcher serializes them over the resources they touch. Checkpoint
//! publications are served by timestamp so clients can read a repository
//! as it was at any past instant.
//!
//! # Architecture
//!
//! - [`core`] - Domain types, the repository store, config and the lock manager
//! - [`engine`] - Task requests, planning, the dispatcher and task bodies
//! - [`checkpoint`] - Lock-free read path and checkpoint resolution
//! - [`cli`] - Command-line interface for the `depot` binary
//! - [`ui`] - Output formatting and log setup
//!
//! # Correctness Invariants
//!
//! 1. Version numbers of a repository are gapless and never reused
//! 2. A task's versions and publications commit atomically or not at all
//! 3. Tasks holding conflicting resources never run at the same time, and
//!    tasks wanting the same resource are admitted in arrival order
//! 4. Checkpoint timestamps of a repository are strictly increasing at
//!    second precision
//! 5. The read path never takes a reservation and never observes a
//!    partially committed task

pub mod checkpoint;
pub mod cli;
pub mod core;
pub mod engine;
pub mod ui;
