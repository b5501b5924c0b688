//! engine::upstream
//!
//! Upstream content sources consulted by sync.
//!
//! # Design
//!
//! Fetching and parsing remote metadata is a collaborator behind the
//! [`Upstream`] trait. Sync only needs two answers from it: a cheap revision
//! marker used to skip unchanged remotes, and the full list of content units
//! the remote currently offers.
//!
//! [`MemoryUpstream`] is the in-process implementation. It serves listings
//! registered per remote URL, records every call, and can be told to fail.
//! Its revision marker is a digest of the offered unit ids, so republishing
//! the same units yields the same revision.
//!
//! # Example
//!
//! ```
//! use repodepot::core::model::{ContentUnit, Remote};
//! use repodepot::core::types::ContentKind;
//! use repodepot::engine::upstream::{MemoryUpstream, Upstream};
//!
//! # futures::executor::block_on(async {
//! let upstream = MemoryUpstream::new();
//! let remote = Remote::new("fedora", "https://example.invalid/fedora/");
//! let unit = ContentUnit::new(ContentKind::new("package").unwrap(), "walrus-5.21");
//! upstream.publish(&remote.url, vec![unit.clone()]);
//!
//! let listing = upstream.fetch(&remote).await.unwrap();
//! assert_eq!(listing.units, vec![unit]);
//! assert_eq!(upstream.revision(&remote).await.unwrap(), listing.revision);
//! # });
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::core::model::{ContentUnit, Remote};

/// Errors from upstream access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Nothing is published at the remote's URL.
    #[error("no repository metadata at '{0}'")]
    NotFound(String),

    /// The remote could not be reached or answered garbage.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

/// What a remote offers at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamListing {
    /// Changes whenever the remote's content changes.
    pub revision: String,
    pub units: Vec<ContentUnit>,
}

/// A source of upstream content.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    /// Current revision marker of the remote, without fetching content.
    async fn revision(&self, remote: &Remote) -> Result<String, UpstreamError>;

    /// Everything the remote currently offers.
    async fn fetch(&self, remote: &Remote) -> Result<UpstreamListing, UpstreamError>;
}

/// Recorded call for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCall {
    Revision { url: String },
    Fetch { url: String },
}

#[derive(Debug, Default)]
struct MemoryUpstreamInner {
    listings: HashMap<String, UpstreamListing>,
    fail_with: Option<UpstreamError>,
    calls: Vec<UpstreamCall>,
}

/// In-memory upstream keyed by remote URL.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpstream {
    inner: Arc<Mutex<MemoryUpstreamInner>>,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryUpstreamInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace what `url` offers; returns the new revision.
    pub fn publish(&self, url: &str, units: Vec<ContentUnit>) -> String {
        let revision = revision_of(&units);
        self.lock().listings.insert(
            url.to_string(),
            UpstreamListing {
                revision: revision.clone(),
                units,
            },
        );
        revision
    }

    /// Make every subsequent call fail with `error`, or stop failing.
    pub fn fail_with(&self, error: Option<UpstreamError>) {
        self.lock().fail_with = error;
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.lock().calls.clone()
    }

    /// Number of full fetches made so far.
    pub fn fetch_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, UpstreamCall::Fetch { .. }))
            .count()
    }

    fn listing(&self, url: &str) -> Result<UpstreamListing, UpstreamError> {
        let inner = self.lock();
        if let Some(err) = &inner.fail_with {
            return Err(err.clone());
        }
        inner
            .listings
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(url.to_string()))
    }
}

/// `sha256:<hex>` over the sorted unit ids.
fn revision_of(units: &[ContentUnit]) -> String {
    let mut ids: Vec<String> = units.iter().map(|u| u.id.to_string()).collect();
    ids.sort();

    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[async_trait]
impl Upstream for MemoryUpstream {
    async fn revision(&self, remote: &Remote) -> Result<String, UpstreamError> {
        self.lock().calls.push(UpstreamCall::Revision {
            url: remote.url.clone(),
        });
        self.listing(&remote.url).map(|l| l.revision)
    }

    async fn fetch(&self, remote: &Remote) -> Result<UpstreamListing, UpstreamError> {
        self.lock().calls.push(UpstreamCall::Fetch {
            url: remote.url.clone(),
        });
        self.listing(&remote.url)
    }
}
