//! core
//!
//! Domain types, persistence and locking for repodepot.
//!
//! # Modules
//!
//! - [`types`] - Strong types: identifiers, version numbers, timestamps
//! - [`model`] - Repository, version, publication and distribution records
//! - [`store`] - Versioned repository store with atomic commits
//! - [`ops`] - Resource lock manager
//! - [`clock`] - Injectable time source
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Committed history is append-only
//! - Every write goes through one transactional commit
//! - Identifiers are typed so they cannot be mixed up

pub mod clock;
pub mod config;
pub mod model;
pub mod ops;
pub mod store;
pub mod types;
