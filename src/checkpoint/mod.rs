//! checkpoint
//!
//! Read path for distributions, including time-addressed checkpoints.
//!
//! # Architecture
//!
//! A checkpoint distribution exposes every checkpoint publication of one
//! repository under `{base_path}{timestamp}/`. The base path itself lists
//! the available timestamps. Any timestamp between two checkpoints resolves
//! to the earlier one, so clients can ask for "the repository as of T".
//!
//! Other distributions serve one publication at their base path: a fixed
//! publication, the newest publication of a fixed version, or the newest
//! publication of the repository.
//!
//! The read path takes no reservations and never writes. It only sees
//! committed publications.
//!
//! # Canonical Locations
//!
//! A timestamp that is not itself a checkpoint is served transparently with
//! the content of the checkpoint it resolves to, rendered under the
//! canonical path. [`Response::redirect_location`] exposes that path so an
//! HTTP front end can choose to redirect instead.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use repodepot::checkpoint::{serve, Response};
//! use repodepot::core::model::{Distribution, DistributionTarget, Repository, RepositoryConfig};
//! use repodepot::core::store::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let repo = store.add_repository(Repository::new("demo", RepositoryConfig::default()), Utc::now());
//! let dist = Distribution::new("demo", "demo", DistributionTarget::Checkpoints { repository: repo });
//!
//! let response = serve(&store, &dist, "", Utc::now()).unwrap();
//! assert!(matches!(response, Response::Listing { .. }));
//! assert!(response.body().contains("<h1>Index of /demo/</h1>"));
//! ```

pub mod listing;
pub mod resolver;

pub use listing::Renderer;
pub use resolver::{resolve, ResolvedCheckpoint};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::core::model::{Distribution, DistributionTarget, Publication};
use crate::core::store::{RepositoryStore, StoreError};
use crate::core::types::{CheckpointTimestamp, RepositoryId, VersionNumber};

/// Errors from the read path. All of them mean "404".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        ResolveError::NotFound(err.to_string())
    }
}

/// What the read path serves for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Listing of checkpoint timestamps at a checkpoint distribution's base.
    Listing {
        path: String,
        checkpoints: Vec<CheckpointTimestamp>,
        body: String,
    },
    /// Index of one publication.
    Index {
        /// Path as requested, normalized to end in `/`.
        path: String,
        /// Path the content actually lives at.
        canonical_path: String,
        publication: Publication,
        body: String,
    },
}

impl Response {
    pub fn path(&self) -> &str {
        match self {
            Response::Listing { path, .. } | Response::Index { path, .. } => path,
        }
    }

    /// Rendered HTML.
    pub fn body(&self) -> &str {
        match self {
            Response::Listing { body, .. } | Response::Index { body, .. } => body,
        }
    }

    /// Where the content canonically lives, when that is not where it was
    /// requested.
    pub fn redirect_location(&self) -> Option<&str> {
        match self {
            Response::Index {
                path,
                canonical_path,
                ..
            } if path != canonical_path => Some(canonical_path),
            _ => None,
        }
    }
}

/// Serve `path`, relative to the distribution's base path, as of `now`.
pub fn serve(
    store: &dyn RepositoryStore,
    distribution: &Distribution,
    path: &str,
    now: DateTime<Utc>,
) -> Result<Response, ResolveError> {
    serve_with(store, distribution, path, now, &Renderer::default())
}

/// [`serve`] with a custom renderer.
pub fn serve_with(
    store: &dyn RepositoryStore,
    distribution: &Distribution,
    path: &str,
    now: DateTime<Utc>,
    renderer: &Renderer,
) -> Result<Response, ResolveError> {
    let relative = path.trim_matches('/');
    debug!(distribution = %distribution.name, path = relative, "serving");

    let publication = match &distribution.target {
        DistributionTarget::Checkpoints { repository } => {
            return serve_checkpoints(store, distribution, repository, relative, now, renderer);
        }
        _ if !relative.is_empty() => return Err(not_found_path(distribution, relative)),
        DistributionTarget::Publication { publication } => store.publication(publication)?,
        DistributionTarget::Version { repository, number } => {
            newest_publication(store, repository, *number)?
        }
        DistributionTarget::Latest { repository } => store
            .publications(repository)?
            .pop()
            .ok_or_else(|| ResolveError::NotFound("no publications".to_string()))?,
    };

    let path = distribution.base_path.clone();
    let body = render_index(store, &publication, &path, renderer)?;
    Ok(Response::Index {
        canonical_path: path.clone(),
        path,
        publication,
        body,
    })
}

fn serve_checkpoints(
    store: &dyn RepositoryStore,
    distribution: &Distribution,
    repository: &RepositoryId,
    relative: &str,
    now: DateTime<Utc>,
    renderer: &Renderer,
) -> Result<Response, ResolveError> {
    let history = store.checkpoints(repository)?;
    let base = &distribution.base_path;

    if relative.is_empty() {
        let checkpoints: Vec<CheckpointTimestamp> = history
            .iter()
            .map(|p| CheckpointTimestamp::from_datetime(p.created_at))
            .collect();
        let entries: Vec<String> = checkpoints.iter().map(|ts| format!("{ts}/")).collect();
        let body = renderer.render(base, &entries);
        return Ok(Response::Listing {
            path: base.clone(),
            checkpoints,
            body,
        });
    }

    if relative.contains('/') {
        return Err(not_found_path(distribution, relative));
    }

    let resolved = resolve(&history, relative, now)?;
    let path = format!("{base}{relative}/");
    let canonical_path = format!("{base}{}/", resolved.timestamp());
    if let ResolvedCheckpoint::Canonical { canonical, .. } = &resolved {
        debug!(requested = relative, %canonical, "serving canonical checkpoint");
    }

    let publication = match resolved {
        ResolvedCheckpoint::Exact(publication) => publication,
        ResolvedCheckpoint::Canonical { publication, .. } => publication,
    };
    let body = render_index(store, &publication, &canonical_path, renderer)?;
    Ok(Response::Index {
        path,
        canonical_path,
        publication,
        body,
    })
}

/// Newest publication of one version, by creation.
fn newest_publication(
    store: &dyn RepositoryStore,
    repository: &RepositoryId,
    number: VersionNumber,
) -> Result<Publication, ResolveError> {
    store
        .publications(repository)?
        .into_iter()
        .rev()
        .find(|p| p.version == number)
        .ok_or_else(|| ResolveError::NotFound(format!("no publication of version {number}")))
}

/// Index page of a publication: metadata directory plus content names.
fn render_index(
    store: &dyn RepositoryStore,
    publication: &Publication,
    path: &str,
    renderer: &Renderer,
) -> Result<String, ResolveError> {
    let version = store.version(&publication.repository, publication.version)?;
    let mut names = version
        .content
        .iter()
        .map(|id| store.content(id).map(|unit| unit.name))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();

    let mut entries = Vec::with_capacity(names.len() + 2);
    entries.push("config.repo".to_string());
    entries.push("repodata/".to_string());
    entries.extend(names);
    Ok(renderer.render(path, &entries))
}

fn not_found_path(distribution: &Distribution, relative: &str) -> ResolveError {
    ResolveError::NotFound(format!("{}{relative}", distribution.base_path))
}
