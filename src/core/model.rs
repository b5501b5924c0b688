//! core::model
//!
//! Entity records for repositories, versions, publications and distributions.
//!
//! # Immutability
//!
//! [`RepositoryVersion`] and [`Publication`] are never mutated once the
//! store has accepted them. New state is always a new record appended to
//! the owning repository's history.
//!
//! # Example
//!
//! ```
//! use repodepot::core::model::{Repository, RepositoryConfig};
//!
//! let repo = Repository::new("fedora-updates", RepositoryConfig::default());
//! assert_eq!(repo.config.retain_package_versions, 0);
//! assert!(!repo.config.autopublish);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ContentId, ContentKind, PublicationId, RemoteId, RepositoryId, VersionNumber};

/// Checksum type recorded on publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        };
        write!(f, "{s}")
    }
}

/// Compression applied to published metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    Gz,
    Zstd,
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionType::Gz => write!(f, "gz"),
            CompressionType::Zstd => write!(f, "zstd"),
        }
    }
}

/// How a sync reconciles upstream content with the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Add upstream content to what the repository already has.
    Additive,
    /// Replace content with upstream and mirror upstream metadata exactly.
    MirrorComplete,
    /// Replace content with upstream but generate metadata locally.
    MirrorContentOnly,
}

impl SyncPolicy {
    /// Whether the resulting content set is exactly the upstream set.
    pub fn is_mirror(&self) -> bool {
        matches!(self, SyncPolicy::MirrorComplete | SyncPolicy::MirrorContentOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPolicy::Additive => "additive",
            SyncPolicy::MirrorComplete => "mirror_complete",
            SyncPolicy::MirrorContentOnly => "mirror_content_only",
        }
    }
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the last successful sync of a repository saw.
///
/// Consulted by optimized syncs to skip work when nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDetails {
    pub remote: RemoteId,
    /// Upstream revision marker reported at fetch time.
    pub revision: String,
    pub policy: SyncPolicy,
    pub skip_types: Vec<ContentKind>,
    /// Latest version number right after that sync.
    pub version: VersionNumber,
}

/// Mutable, repository-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Number of versions of each package to keep; 0 keeps all.
    pub retain_package_versions: u32,
    /// Number of repository versions to keep; pruning itself is external.
    pub retain_repo_versions: Option<u32>,
    /// Publish automatically whenever a task creates a new version.
    pub autopublish: bool,
    /// Default checksum type for publications.
    pub checksum_type: ChecksumType,
    /// Default `.repo` file settings for publications.
    pub repo_config: BTreeMap<String, String>,
    /// Default metadata compression for publications.
    pub compression_type: CompressionType,
}

/// A repository and its mutable configuration.
///
/// The version history lives in the store; the latest version is always the
/// last element of that history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub config: RepositoryConfig,
    /// Remote used by sync when the request does not name one.
    pub remote: Option<RemoteId>,
}

impl Repository {
    pub fn new(name: impl Into<String>, config: RepositoryConfig) -> Self {
        Self {
            id: RepositoryId::new(),
            name: name.into(),
            config,
            remote: None,
        }
    }

    /// Set the default remote.
    pub fn with_remote(mut self, remote: RemoteId) -> Self {
        self.remote = Some(remote);
        self
    }
}

/// Upstream source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub id: RemoteId,
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: RemoteId::new(),
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A unit of content referenced by repository versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: ContentId,
    pub kind: ContentKind,
    pub name: String,
    /// Units this one depends on; consulted by dependency solving on copy.
    #[serde(default)]
    pub requires: Vec<ContentId>,
}

impl ContentUnit {
    pub fn new(kind: ContentKind, name: impl Into<String>) -> Self {
        Self {
            id: ContentId::new(),
            kind,
            name: name.into(),
            requires: Vec::new(),
        }
    }

    pub fn requiring(mut self, deps: impl IntoIterator<Item = ContentId>) -> Self {
        self.requires.extend(deps);
        self
    }
}

/// An immutable, numbered snapshot of a repository's content set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    pub repository: RepositoryId,
    pub number: VersionNumber,
    pub content: BTreeSet<ContentId>,
    /// Version this one was derived from, when not simply the previous latest.
    pub base_version: Option<VersionNumber>,
    pub created_at: DateTime<Utc>,
}

/// An immutable artifact derived from one repository version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    pub repository: RepositoryId,
    pub version: VersionNumber,
    pub checkpoint: bool,
    pub created_at: DateTime<Utc>,
    pub checksum_type: ChecksumType,
    #[serde(default)]
    pub repo_config: BTreeMap<String, String>,
    pub compression_type: CompressionType,
}

/// What a distribution serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionTarget {
    /// A fixed publication.
    Publication { publication: PublicationId },
    /// The newest publication of a fixed repository version.
    Version {
        repository: RepositoryId,
        number: VersionNumber,
    },
    /// The newest publication of a repository.
    Latest { repository: RepositoryId },
    /// Time-addressed checkpoint publications of a repository.
    Checkpoints { repository: RepositoryId },
}

/// Maps a base URL path to published content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub name: String,
    /// Base path, always stored with a leading and trailing `/`.
    pub base_path: String,
    pub target: DistributionTarget,
}

impl Distribution {
    pub fn new(name: impl Into<String>, base_path: &str, target: DistributionTarget) -> Self {
        Self {
            name: name.into(),
            base_path: normalize_base_path(base_path),
            target,
        }
    }

    /// Whether this distribution serves checkpoints.
    pub fn is_checkpoint(&self) -> bool {
        matches!(self.target, DistributionTarget::Checkpoints { .. })
    }
}

/// Normalize a base path to `/segment/.../`.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_normalization() {
        assert_eq!(normalize_base_path("fedora/updates"), "/fedora/updates/");
        assert_eq!(normalize_base_path("/fedora/updates"), "/fedora/updates/");
        assert_eq!(normalize_base_path("/fedora/updates/"), "/fedora/updates/");
        assert_eq!(normalize_base_path(""), "/");
        assert_eq!(normalize_base_path("/"), "/");
    }

    #[test]
    fn repository_config_parses_with_defaults() {
        let config: RepositoryConfig =
            serde_json::from_str(r#"{"autopublish": true, "checksum_type": "sha512"}"#).unwrap();
        assert!(config.autopublish);
        assert_eq!(config.checksum_type, ChecksumType::Sha512);
        assert_eq!(config.compression_type, CompressionType::Gz);
        assert_eq!(config.retain_package_versions, 0);
    }

    #[test]
    fn repository_config_rejects_unknown_fields() {
        let result = serde_json::from_str::<RepositoryConfig>(r#"{"autopublsh": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn sync_policy_wire_names() {
        let policy: SyncPolicy = serde_json::from_str("\"mirror_content_only\"").unwrap();
        assert_eq!(policy, SyncPolicy::MirrorContentOnly);
        assert_eq!(SyncPolicy::MirrorComplete.to_string(), "mirror_complete");
        assert!(policy.is_mirror());
        assert!(!SyncPolicy::Additive.is_mirror());
    }

    #[test]
    fn distribution_checkpoint_detection() {
        let repo = RepositoryId::new();
        let checkpoints = Distribution::new(
            "cp",
            "cp",
            DistributionTarget::Checkpoints { repository: repo },
        );
        assert!(checkpoints.is_checkpoint());
        let latest = Distribution::new("l", "l", DistributionTarget::Latest { repository: repo });
        assert!(!latest.is_checkpoint());
    }
}
