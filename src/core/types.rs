//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`RepositoryId`], [`RemoteId`], [`PublicationId`], [`ContentId`] - Entity identities
//! - [`VersionNumber`] - Per-repository version sequence number
//! - [`ContentKind`] - Validated content type tag (e.g. `package`, `advisory`)
//! - [`ResourceId`] / [`LockMode`] - Lockable resource names
//! - [`Href`] - Opaque external references and their parsing
//! - [`CheckpointTimestamp`] - Second-precision UTC instant in `YYYYMMDDTHHMMSSZ` form
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use repodepot::core::types::{ContentKind, Href, RepositoryId, VersionNumber};
//!
//! let repo = RepositoryId::new();
//! let href = Href::version(&repo, VersionNumber::new(3));
//! assert_eq!(href.as_version(), Some((repo, VersionNumber::new(3))));
//!
//! assert!(ContentKind::new("package").is_ok());
//! assert!(ContentKind::new("Not Valid").is_err());
//! ```

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid content kind: {0}")]
    InvalidContentKind(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid checkpoint timestamp: {0}")]
    InvalidTimestamp(String),
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new unique identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from its string form.
            pub fn parse(s: &str) -> Result<Self, TypeError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| TypeError::InvalidId(s.to_string()))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of a repository.
    RepositoryId
);
uuid_id!(
    /// Identity of an upstream remote.
    RemoteId
);
uuid_id!(
    /// Identity of a publication.
    PublicationId
);
uuid_id!(
    /// Identity of a content unit.
    ContentId
);

/// A repository version number.
///
/// Numbers start at 0 (the empty version created with the repository) and
/// grow by exactly one per committed version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// The first version of every repository.
    pub const ZERO: VersionNumber = VersionNumber(0);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// The number that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated content kind tag.
///
/// Kinds are lowercase ASCII words, optionally joined by `_` or `-`
/// (`package`, `srpm`, `treeinfo`, `package_group`).
///
/// # Example
///
/// ```
/// use repodepot::core::types::ContentKind;
///
/// let kind = ContentKind::new("srpm").unwrap();
/// assert_eq!(kind.as_str(), "srpm");
///
/// assert!(ContentKind::new("").is_err());
/// assert!(ContentKind::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKind(String);

impl ContentKind {
    /// Create a new validated content kind.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidContentKind` if the tag is empty or contains
    /// anything other than lowercase ASCII letters, digits, `_` and `-`.
    pub fn new(kind: impl Into<String>) -> Result<Self, TypeError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(TypeError::InvalidContentKind(
                "content kind cannot be empty".into(),
            ));
        }
        if !kind
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(TypeError::InvalidContentKind(format!(
                "'{kind}' must be lowercase ascii letters, digits, '_' or '-'"
            )));
        }
        Ok(Self(kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentKind {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentKind> for String {
    fn from(kind: ContentKind) -> Self {
        kind.0
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resource that background tasks reserve before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ResourceId {
    Repository(RepositoryId),
    Remote(RemoteId),
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Repository(id) => write!(f, "repository:{id}"),
            ResourceId::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

impl From<RepositoryId> for ResourceId {
    fn from(id: RepositoryId) -> Self {
        ResourceId::Repository(id)
    }
}

impl From<RemoteId> for ResourceId {
    fn from(id: RemoteId) -> Self {
        ResourceId::Remote(id)
    }
}

/// How a task holds a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Read-oriented; any number of shared holders may coexist.
    Shared,
    /// Single holder; excludes every other holder regardless of mode.
    Exclusive,
}

impl LockMode {
    /// Whether a holder in `self` mode may coexist with one in `other` mode.
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// An opaque external reference to an entity.
///
/// Hrefs are what API callers pass around; the planner resolves them to
/// internal identities through the store. The layout is:
///
/// - `/repositories/{repo}/`
/// - `/repositories/{repo}/versions/{n}/`
/// - `/content/{id}/`
/// - `/publications/{id}/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Href(String);

impl Href {
    pub fn new(href: impl Into<String>) -> Self {
        Self(href.into())
    }

    pub fn repository(id: &RepositoryId) -> Self {
        Self(format!("/repositories/{id}/"))
    }

    pub fn version(id: &RepositoryId, number: VersionNumber) -> Self {
        Self(format!("/repositories/{id}/versions/{number}/"))
    }

    pub fn content(id: &ContentId) -> Self {
        Self(format!("/content/{id}/"))
    }

    pub fn publication(id: &PublicationId) -> Self {
        Self(format!("/publications/{id}/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Parse as a repository href.
    pub fn as_repository(&self) -> Option<RepositoryId> {
        match self.segments().as_slice() {
            ["repositories", id] => RepositoryId::parse(id).ok(),
            _ => None,
        }
    }

    /// Parse as a repository version href.
    pub fn as_version(&self) -> Option<(RepositoryId, VersionNumber)> {
        match self.segments().as_slice() {
            ["repositories", id, "versions", n] => {
                let repo = RepositoryId::parse(id).ok()?;
                let number = n.parse::<u64>().ok()?;
                Some((repo, VersionNumber::new(number)))
            }
            _ => None,
        }
    }

    /// Parse as a content unit href.
    pub fn as_content(&self) -> Option<ContentId> {
        match self.segments().as_slice() {
            ["content", id] => ContentId::parse(id).ok(),
            _ => None,
        }
    }

    /// Parse as a publication href.
    pub fn as_publication(&self) -> Option<PublicationId> {
        match self.segments().as_slice() {
            ["publications", id] => PublicationId::parse(id).ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Href {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Href {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Format used for checkpoint URLs and listings.
pub const CHECKPOINT_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A second-precision UTC instant addressed as `YYYYMMDDTHHMMSSZ`.
///
/// Publications carry full-precision creation times; checkpoint URLs only
/// carry seconds, so every comparison on the checkpoint path happens on the
/// truncated value.
///
/// # Example
///
/// ```
/// use repodepot::core::types::CheckpointTimestamp;
///
/// let ts = CheckpointTimestamp::parse("20240501T120000Z").unwrap();
/// assert_eq!(ts.to_string(), "20240501T120000Z");
///
/// // Calendar-invalid and malformed values are rejected
/// assert!(CheckpointTimestamp::parse("20259928T092752Z").is_err());
/// assert!(CheckpointTimestamp::parse("invalid_ts").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointTimestamp(DateTime<Utc>);

impl CheckpointTimestamp {
    /// Truncate an instant to whole seconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(0))
    }

    /// Strictly parse `YYYYMMDDTHHMMSSZ`.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidTimestamp` for anything that is not exactly
    /// sixteen characters in that layout, or that names a nonexistent date.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 16
            && bytes[8] == b'T'
            && bytes[15] == b'Z'
            && bytes[..8].iter().all(u8::is_ascii_digit)
            && bytes[9..15].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(TypeError::InvalidTimestamp(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, CHECKPOINT_FORMAT)
            .map(|naive| Self(naive.and_utc()))
            .map_err(|_| TypeError::InvalidTimestamp(s.to_string()))
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl std::fmt::Display for CheckpointTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(CHECKPOINT_FORMAT))
    }
}
