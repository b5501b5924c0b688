//! core::store
//!
//! Version store and publication set.
//!
//! # Architecture
//!
//! Persistence is a collaborator behind the [`RepositoryStore`] trait.
//! [`MemoryStore`] is the in-process implementation: one arena of versions
//! and one arena of publications per repository, indexed by position and
//! only ever appended to.
//!
//! # Commit Semantics
//!
//! Tasks never write directly. They stage a [`Transaction`] and hand it to
//! [`RepositoryStore::commit`], which validates every staged record against
//! the current state and then applies all of them, or none.
//!
//! # Invariants
//!
//! - Version numbers are gapless and strictly increasing per repository
//! - A publication references an existing version no newer than the latest
//! - Checkpoint publications have strictly increasing checkpoint timestamps
//! - Records are never mutated or removed once committed
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use repodepot::core::model::{Repository, RepositoryConfig};
//! use repodepot::core::store::{MemoryStore, RepositoryStore, StagedVersion, Transaction};
//! use repodepot::core::types::VersionNumber;
//!
//! let store = MemoryStore::new();
//! let repo = store.add_repository(Repository::new("demo", RepositoryConfig::default()), Utc::now());
//!
//! let mut txn = Transaction::new();
//! txn.stage_version(StagedVersion {
//!     repository: repo,
//!     number: VersionNumber::new(1),
//!     content: Default::default(),
//!     base_version: None,
//! });
//! let created = store.commit(txn, Utc::now()).unwrap();
//! assert_eq!(created.versions, vec![(repo, VersionNumber::new(1))]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{
    ChecksumType, CompressionType, ContentUnit, Publication, Remote, Repository,
    RepositoryVersion, SyncDetails,
};
use super::types::{
    CheckpointTimestamp, ContentId, PublicationId, RemoteId, RepositoryId, VersionNumber,
};

/// Errors from store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (repository, remote, version, ...).
        kind: &'static str,
        /// The identity that was looked up.
        id: String,
    },

    /// A uniqueness constraint would be violated.
    #[error("uniqueness constraint '{constraint}' violated: {detail}")]
    Conflict {
        /// Name of the violated constraint.
        constraint: &'static str,
        /// What collided.
        detail: String,
    },

    /// A staged record is inconsistent with the stored state.
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl StoreError {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Read and commit access to repository state.
///
/// Reads always observe committed state only; a transaction in progress is
/// invisible until [`commit`](RepositoryStore::commit) returns.
pub trait RepositoryStore: Send + Sync + std::fmt::Debug {
    fn repository(&self, id: &RepositoryId) -> Result<Repository, StoreError>;

    fn remote(&self, id: &RemoteId) -> Result<Remote, StoreError>;

    fn content(&self, id: &ContentId) -> Result<ContentUnit, StoreError>;

    fn version(
        &self,
        repository: &RepositoryId,
        number: VersionNumber,
    ) -> Result<RepositoryVersion, StoreError>;

    fn latest_version(&self, repository: &RepositoryId) -> Result<RepositoryVersion, StoreError>;

    /// All versions of a repository, oldest first.
    fn versions(&self, repository: &RepositoryId) -> Result<Vec<RepositoryVersion>, StoreError>;

    fn publication(&self, id: &PublicationId) -> Result<Publication, StoreError>;

    /// All publications of a repository in creation order.
    fn publications(&self, repository: &RepositoryId) -> Result<Vec<Publication>, StoreError>;

    /// Checkpoint publications of a repository in creation order.
    fn checkpoints(&self, repository: &RepositoryId) -> Result<Vec<Publication>, StoreError> {
        Ok(self
            .publications(repository)?
            .into_iter()
            .filter(|p| p.checkpoint)
            .collect())
    }

    /// Details of the last successful sync, if any.
    fn sync_details(&self, repository: &RepositoryId) -> Result<Option<SyncDetails>, StoreError>;

    /// Atomically apply a transaction, stamping new records with `now`.
    fn commit(
        &self,
        txn: Transaction,
        now: DateTime<Utc>,
    ) -> Result<CreatedResources, StoreError>;
}

/// A version waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedVersion {
    pub repository: RepositoryId,
    /// Must equal the repository's latest number plus one at commit time.
    pub number: VersionNumber,
    pub content: BTreeSet<ContentId>,
    pub base_version: Option<VersionNumber>,
}

/// A publication waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPublication {
    pub id: PublicationId,
    pub repository: RepositoryId,
    pub version: VersionNumber,
    pub checkpoint: bool,
    pub checksum_type: ChecksumType,
    pub repo_config: BTreeMap<String, String>,
    pub compression_type: CompressionType,
}

/// Writes staged by one task, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    content: Vec<ContentUnit>,
    versions: Vec<StagedVersion>,
    publications: Vec<StagedPublication>,
    sync_details: Vec<(RepositoryId, SyncDetails)>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content units; units already known are left untouched.
    pub fn stage_content(&mut self, unit: ContentUnit) {
        self.content.push(unit);
    }

    pub fn record_sync(&mut self, repository: RepositoryId, details: SyncDetails) {
        self.sync_details.push((repository, details));
    }

    pub fn stage_version(&mut self, version: StagedVersion) {
        self.versions.push(version);
    }

    pub fn stage_publication(&mut self, publication: StagedPublication) {
        self.publications.push(publication);
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.versions.is_empty()
            && self.publications.is_empty()
            && self.sync_details.is_empty()
    }

    pub fn staged_versions(&self) -> &[StagedVersion] {
        &self.versions
    }

    pub fn staged_publications(&self) -> &[StagedPublication] {
        &self.publications
    }
}

/// Identities of records created by a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResources {
    pub versions: Vec<(RepositoryId, VersionNumber)>,
    pub publications: Vec<PublicationId>,
}

impl CreatedResources {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.publications.is_empty()
    }
}

/// Per-repository arenas.
#[derive(Debug, Clone)]
struct RepositoryEntry {
    repository: Repository,
    versions: Vec<RepositoryVersion>,
    publications: Vec<Publication>,
    last_sync: Option<SyncDetails>,
}

impl RepositoryEntry {
    fn latest_number(&self) -> VersionNumber {
        self.versions
            .last()
            .map(|v| v.number)
            .unwrap_or(VersionNumber::ZERO)
    }

    fn last_checkpoint(&self) -> Option<CheckpointTimestamp> {
        self.publications
            .iter()
            .rev()
            .find(|p| p.checkpoint)
            .map(|p| CheckpointTimestamp::from_datetime(p.created_at))
    }
}

#[derive(Debug, Default)]
struct Inner {
    repositories: HashMap<RepositoryId, RepositoryEntry>,
    remotes: HashMap<RemoteId, Remote>,
    content: HashMap<ContentId, ContentUnit>,
    /// Publication id -> (repository, arena index).
    publication_index: HashMap<PublicationId, (RepositoryId, usize)>,
}

impl Inner {
    fn entry(&self, id: &RepositoryId) -> Result<&RepositoryEntry, StoreError> {
        self.repositories
            .get(id)
            .ok_or_else(|| StoreError::not_found("repository", id))
    }

    /// Check a transaction against current state without applying it.
    fn validate(&self, txn: &Transaction, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut next_numbers: HashMap<RepositoryId, VersionNumber> = HashMap::new();
        let mut staged: BTreeSet<(RepositoryId, VersionNumber)> = BTreeSet::new();
        let staged_content: BTreeSet<ContentId> = txn.content.iter().map(|u| u.id).collect();

        for version in &txn.versions {
            let entry = self.entry(&version.repository)?;
            let expected = next_numbers
                .get(&version.repository)
                .copied()
                .unwrap_or_else(|| entry.latest_number().next());
            if version.number != expected {
                return Err(StoreError::Conflict {
                    constraint: "repository version number",
                    detail: format!(
                        "repository '{}' expected version {}, got {}",
                        entry.repository.name, expected, version.number
                    ),
                });
            }
            if let Some(base) = version.base_version {
                if base >= version.number {
                    return Err(StoreError::Invalid(format!(
                        "base version {base} is not older than version {}",
                        version.number
                    )));
                }
            }
            if let Some(missing) = version
                .content
                .iter()
                .find(|c| !self.content.contains_key(c) && !staged_content.contains(c))
            {
                return Err(StoreError::not_found("content", missing));
            }
            next_numbers.insert(version.repository, expected.next());
            staged.insert((version.repository, version.number));
        }

        let stamp = CheckpointTimestamp::from_datetime(now);
        let mut seen_ids = BTreeSet::new();
        let mut staged_checkpoint: BTreeSet<RepositoryId> = BTreeSet::new();

        for publication in &txn.publications {
            let entry = self.entry(&publication.repository)?;
            if self.publication_index.contains_key(&publication.id)
                || !seen_ids.insert(publication.id)
            {
                return Err(StoreError::Conflict {
                    constraint: "publication id",
                    detail: publication.id.to_string(),
                });
            }
            let exists = publication.version <= entry.latest_number()
                || staged.contains(&(publication.repository, publication.version));
            if !exists {
                return Err(StoreError::not_found(
                    "repository version",
                    format!("{}/{}", entry.repository.name, publication.version),
                ));
            }
            if publication.checkpoint {
                let collides = staged_checkpoint.contains(&publication.repository)
                    || entry.last_checkpoint().is_some_and(|last| last >= stamp);
                if collides {
                    return Err(StoreError::Conflict {
                        constraint: "checkpoint timestamp",
                        detail: format!(
                            "repository '{}' already has a checkpoint at or after {stamp}",
                            entry.repository.name
                        ),
                    });
                }
                staged_checkpoint.insert(publication.repository);
            }
        }

        for (repository, _) in &txn.sync_details {
            self.entry(repository)?;
        }

        Ok(())
    }

    fn apply(&mut self, txn: Transaction, now: DateTime<Utc>) -> CreatedResources {
        let mut created = CreatedResources::default();

        for unit in txn.content {
            self.content.entry(unit.id).or_insert(unit);
        }

        for version in txn.versions {
            if let Some(entry) = self.repositories.get_mut(&version.repository) {
                created.versions.push((version.repository, version.number));
                entry.versions.push(RepositoryVersion {
                    repository: version.repository,
                    number: version.number,
                    content: version.content,
                    base_version: version.base_version,
                    created_at: now,
                });
            }
        }

        for publication in txn.publications {
            if let Some(entry) = self.repositories.get_mut(&publication.repository) {
                let index = entry.publications.len();
                entry.publications.push(Publication {
                    id: publication.id,
                    repository: publication.repository,
                    version: publication.version,
                    checkpoint: publication.checkpoint,
                    created_at: now,
                    checksum_type: publication.checksum_type,
                    repo_config: publication.repo_config,
                    compression_type: publication.compression_type,
                });
                self.publication_index
                    .insert(publication.id, (publication.repository, index));
                created.publications.push(publication.id);
            }
        }

        for (repository, details) in txn.sync_details {
            if let Some(entry) = self.repositories.get_mut(&repository) {
                entry.last_sync = Some(details);
            }
        }

        created
    }
}

/// In-memory [`RepositoryStore`].
///
/// Thread-safe via an internal `RwLock`; readers never wait on tasks, only
/// on the brief critical section of a commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a repository together with its empty version 0.
    pub fn add_repository(&self, repository: Repository, now: DateTime<Utc>) -> RepositoryId {
        let id = repository.id;
        let version_zero = RepositoryVersion {
            repository: id,
            number: VersionNumber::ZERO,
            content: BTreeSet::new(),
            base_version: None,
            created_at: now,
        };
        self.write().repositories.insert(
            id,
            RepositoryEntry {
                repository,
                versions: vec![version_zero],
                publications: Vec::new(),
                last_sync: None,
            },
        );
        id
    }

    /// Replace a repository's mutable configuration.
    pub fn update_repository(&self, repository: Repository) -> Result<(), StoreError> {
        let mut inner = self.write();
        let entry = inner
            .repositories
            .get_mut(&repository.id)
            .ok_or_else(|| StoreError::not_found("repository", repository.id))?;
        entry.repository = repository;
        Ok(())
    }

    pub fn add_remote(&self, remote: Remote) -> RemoteId {
        let id = remote.id;
        self.write().remotes.insert(id, remote);
        id
    }

    pub fn add_content(&self, unit: ContentUnit) -> ContentId {
        let id = unit.id;
        self.write().content.insert(id, unit);
        id
    }

    /// Export the full state for serialization.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.read();
        let mut repositories: Vec<RepositorySnapshot> = inner
            .repositories
            .values()
            .map(|e| RepositorySnapshot {
                repository: e.repository.clone(),
                versions: e.versions.clone(),
                publications: e.publications.clone(),
                last_sync: e.last_sync.clone(),
            })
            .collect();
        repositories.sort_by(|a, b| a.repository.name.cmp(&b.repository.name));
        let mut remotes: Vec<Remote> = inner.remotes.values().cloned().collect();
        remotes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut content: Vec<ContentUnit> = inner.content.values().cloned().collect();
        content.sort_by(|a, b| a.name.cmp(&b.name));
        StoreSnapshot {
            repositories,
            remotes,
            content,
        }
    }

    /// Build a store from a snapshot, checking the history invariants.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Invalid`] if a version history is not gapless from 0,
    ///   or publications are not in creation order
    /// - [`StoreError::NotFound`] if a publication references a missing version
    /// - [`StoreError::Conflict`] on duplicate ids or colliding checkpoints
    pub fn load(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut inner = Inner::default();
        for unit in snapshot.content {
            inner.content.insert(unit.id, unit);
        }
        for remote in snapshot.remotes {
            inner.remotes.insert(remote.id, remote);
        }
        for repo in snapshot.repositories {
            let id = repo.repository.id;
            let name = repo.repository.name.clone();
            for (expected, version) in repo.versions.iter().enumerate() {
                if version.number.get() != expected as u64 || version.repository != id {
                    return Err(StoreError::Invalid(format!(
                        "repository '{name}' versions must be numbered 0..n without gaps"
                    )));
                }
            }
            let latest = repo
                .versions
                .last()
                .map(|v| v.number)
                .ok_or_else(|| StoreError::Invalid(format!("repository '{name}' has no versions")))?;

            let mut last_checkpoint: Option<CheckpointTimestamp> = None;
            for pair in repo.publications.windows(2) {
                if pair[1].created_at < pair[0].created_at {
                    return Err(StoreError::Invalid(format!(
                        "repository '{name}' publications are not in creation order"
                    )));
                }
            }
            for (index, publication) in repo.publications.iter().enumerate() {
                if publication.version > latest || publication.repository != id {
                    return Err(StoreError::not_found(
                        "repository version",
                        format!("{name}/{}", publication.version),
                    ));
                }
                if publication.checkpoint {
                    let stamp = CheckpointTimestamp::from_datetime(publication.created_at);
                    if last_checkpoint.is_some_and(|last| last >= stamp) {
                        return Err(StoreError::Conflict {
                            constraint: "checkpoint timestamp",
                            detail: format!("repository '{name}' has two checkpoints at {stamp}"),
                        });
                    }
                    last_checkpoint = Some(stamp);
                }
                if inner
                    .publication_index
                    .insert(publication.id, (id, index))
                    .is_some()
                {
                    return Err(StoreError::Conflict {
                        constraint: "publication id",
                        detail: publication.id.to_string(),
                    });
                }
            }
            inner.repositories.insert(
                id,
                RepositoryEntry {
                    repository: repo.repository,
                    versions: repo.versions,
                    publications: repo.publications,
                    last_sync: repo.last_sync,
                },
            );
        }
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

impl RepositoryStore for MemoryStore {
    fn repository(&self, id: &RepositoryId) -> Result<Repository, StoreError> {
        Ok(self.read().entry(id)?.repository.clone())
    }

    fn remote(&self, id: &RemoteId) -> Result<Remote, StoreError> {
        self.read()
            .remotes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("remote", id))
    }

    fn content(&self, id: &ContentId) -> Result<ContentUnit, StoreError> {
        self.read()
            .content
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("content", id))
    }

    fn version(
        &self,
        repository: &RepositoryId,
        number: VersionNumber,
    ) -> Result<RepositoryVersion, StoreError> {
        let inner = self.read();
        let entry = inner.entry(repository)?;
        // Arena index equals the version number.
        usize::try_from(number.get())
            .ok()
            .and_then(|i| entry.versions.get(i))
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found(
                    "repository version",
                    format!("{}/{}", entry.repository.name, number),
                )
            })
    }

    fn latest_version(&self, repository: &RepositoryId) -> Result<RepositoryVersion, StoreError> {
        let inner = self.read();
        let entry = inner.entry(repository)?;
        entry
            .versions
            .last()
            .cloned()
            .ok_or_else(|| StoreError::not_found("repository version", &entry.repository.name))
    }

    fn versions(&self, repository: &RepositoryId) -> Result<Vec<RepositoryVersion>, StoreError> {
        Ok(self.read().entry(repository)?.versions.clone())
    }

    fn publication(&self, id: &PublicationId) -> Result<Publication, StoreError> {
        let inner = self.read();
        let (repo, index) = inner
            .publication_index
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::not_found("publication", id))?;
        inner
            .entry(&repo)?
            .publications
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::not_found("publication", id))
    }

    fn publications(&self, repository: &RepositoryId) -> Result<Vec<Publication>, StoreError> {
        Ok(self.read().entry(repository)?.publications.clone())
    }

    fn checkpoints(&self, repository: &RepositoryId) -> Result<Vec<Publication>, StoreError> {
        Ok(self
            .read()
            .entry(repository)?
            .publications
            .iter()
            .filter(|p| p.checkpoint)
            .cloned()
            .collect())
    }

    fn sync_details(&self, repository: &RepositoryId) -> Result<Option<SyncDetails>, StoreError> {
        Ok(self.read().entry(repository)?.last_sync.clone())
    }

    fn commit(
        &self,
        txn: Transaction,
        now: DateTime<Utc>,
    ) -> Result<CreatedResources, StoreError> {
        let mut inner = self.write();
        inner.validate(&txn, now)?;
        Ok(inner.apply(txn, now))
    }
}

/// Serializable form of one repository's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub repository: Repository,
    pub versions: Vec<RepositoryVersion>,
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub last_sync: Option<SyncDetails>,
}

/// Serializable form of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub repositories: Vec<RepositorySnapshot>,
    #[serde(default)]
    pub remotes: Vec<Remote>,
    #[serde(default)]
    pub content: Vec<ContentUnit>,
}
