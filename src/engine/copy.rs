//! engine::copy
//!
//! Copy planning and dependency solving.
//!
//! # Architecture
//!
//! A copy request names sources and destinations by [`Href`]. The
//! [`CopyPlanner`] resolves every href through the store, checks that
//! requested base versions exist, and produces a [`CopyPlan`]: the resolved
//! entries plus the repositories that must be locked shared (sources) and
//! exclusive (destinations).
//!
//! Execution groups planned entries by destination, so a request that
//! copies into one repository from several sources still creates exactly one
//! new version there.
//!
//! # Invariants
//!
//! - The planner performs no writes
//! - A repository that is both source and destination is locked exclusive only
//! - Destinations with conflicting base versions are rejected before queuing
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use repodepot::core::model::{Repository, RepositoryConfig};
//! use repodepot::core::store::MemoryStore;
//! use repodepot::core::types::{Href, VersionNumber};
//! use repodepot::engine::copy::{CopyEntry, CopyPlanner};
//!
//! let store = MemoryStore::new();
//! let src = store.add_repository(Repository::new("src", RepositoryConfig::default()), Utc::now());
//! let dst = store.add_repository(Repository::new("dst", RepositoryConfig::default()), Utc::now());
//!
//! let entry = CopyEntry::new(Href::version(&src, VersionNumber::ZERO), Href::repository(&dst));
//! let plan = CopyPlanner::new(&store).plan(&[entry]).unwrap();
//! assert_eq!(plan.shared, vec![src]);
//! assert_eq!(plan.exclusive, vec![dst]);
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::DispatchError;
use crate::core::store::{RepositoryStore, StoreError};
use crate::core::types::{ContentId, Href, LockMode, RepositoryId, ResourceId, VersionNumber};

/// One source-to-destination copy, as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyEntry {
    /// Href of the repository version to copy from.
    pub source_repo_version: Href,
    /// Href of the repository to copy into.
    pub dest_repo: Href,
    /// Version of the destination to build on; latest when absent.
    #[serde(default)]
    pub dest_base_version: Option<u64>,
    /// Content hrefs to copy; everything in the source when absent.
    #[serde(default)]
    pub content: Option<Vec<Href>>,
}

impl CopyEntry {
    pub fn new(source_repo_version: Href, dest_repo: Href) -> Self {
        Self {
            source_repo_version,
            dest_repo,
            dest_base_version: None,
            content: None,
        }
    }

    pub fn with_base_version(mut self, number: u64) -> Self {
        self.dest_base_version = Some(number);
        self
    }

    pub fn with_content(mut self, content: impl IntoIterator<Item = Href>) -> Self {
        self.content = Some(content.into_iter().collect());
        self
    }
}

/// A copy request: one or more entries executed as a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRequest {
    /// Also copy units the selected units require.
    #[serde(default)]
    pub dependency_solving: bool,
    pub config: Vec<CopyEntry>,
}

/// A copy entry with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub source: RepositoryId,
    pub source_version: VersionNumber,
    pub destination: RepositoryId,
    pub base_version: Option<VersionNumber>,
    pub content: Option<BTreeSet<ContentId>>,
}

impl PlannedCopy {
    /// Units of `source_content` this entry selects.
    pub fn select(&self, source_content: &BTreeSet<ContentId>) -> BTreeSet<ContentId> {
        match &self.content {
            Some(wanted) => wanted.intersection(source_content).copied().collect(),
            None => source_content.clone(),
        }
    }
}

/// Resolved copy entries and the reservations they need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub entries: Vec<PlannedCopy>,
    /// Source repositories that are not also destinations.
    pub shared: Vec<RepositoryId>,
    pub exclusive: Vec<RepositoryId>,
}

impl CopyPlan {
    pub fn resources(&self) -> Vec<(ResourceId, LockMode)> {
        self.shared
            .iter()
            .map(|r| ((*r).into(), LockMode::Shared))
            .chain(self.exclusive.iter().map(|r| ((*r).into(), LockMode::Exclusive)))
            .collect()
    }

    /// Entries grouped by destination, in destination order.
    pub fn by_destination(&self) -> BTreeMap<RepositoryId, Vec<&PlannedCopy>> {
        let mut groups: BTreeMap<RepositoryId, Vec<&PlannedCopy>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.destination).or_default().push(entry);
        }
        groups
    }
}

/// Resolves copy entries against the store.
pub struct CopyPlanner<'a> {
    store: &'a dyn RepositoryStore,
}

impl<'a> CopyPlanner<'a> {
    pub fn new(store: &'a dyn RepositoryStore) -> Self {
        Self { store }
    }

    /// Resolve and check every entry.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] naming the first href that does not
    ///   resolve
    /// - [`DispatchError::Validation`] for an empty request, a missing base
    ///   version, or one destination given two different base versions
    pub fn plan(&self, entries: &[CopyEntry]) -> Result<CopyPlan, DispatchError> {
        if entries.is_empty() {
            return Err(DispatchError::Validation(
                "a copy needs at least one entry".to_string(),
            ));
        }

        let mut planned = Vec::with_capacity(entries.len());
        let mut bases: BTreeMap<RepositoryId, VersionNumber> = BTreeMap::new();

        for entry in entries {
            let (source, source_version) = self.resolve_version(&entry.source_repo_version)?;
            let destination = self.resolve_repository(&entry.dest_repo)?;

            let base_version = match entry.dest_base_version {
                Some(n) => {
                    let number = VersionNumber::new(n);
                    self.check_base_version(&destination, number)?;
                    if let Some(previous) = bases.insert(destination, number) {
                        if previous != number {
                            return Err(DispatchError::Validation(format!(
                                "conflicting base versions {previous} and {number} for '{}'",
                                entry.dest_repo
                            )));
                        }
                    }
                    Some(number)
                }
                None => None,
            };

            let content = match &entry.content {
                Some(hrefs) => Some(self.resolve_content(hrefs)?),
                None => None,
            };

            planned.push(PlannedCopy {
                source,
                source_version,
                destination,
                base_version,
                content,
            });
        }

        // Entries naming a base version bind every entry of that destination.
        for entry in &mut planned {
            if let Some(base) = bases.get(&entry.destination) {
                entry.base_version = Some(*base);
            }
        }

        let exclusive: BTreeSet<RepositoryId> = planned.iter().map(|e| e.destination).collect();
        let shared: BTreeSet<RepositoryId> = planned
            .iter()
            .map(|e| e.source)
            .filter(|r| !exclusive.contains(r))
            .collect();

        Ok(CopyPlan {
            entries: planned,
            shared: shared.into_iter().collect(),
            exclusive: exclusive.into_iter().collect(),
        })
    }

    fn resolve_version(&self, href: &Href) -> Result<(RepositoryId, VersionNumber), DispatchError> {
        let (repo, number) = href.as_version().ok_or_else(|| not_found(href))?;
        self.store
            .version(&repo, number)
            .map_err(|_| not_found(href))?;
        Ok((repo, number))
    }

    fn resolve_repository(&self, href: &Href) -> Result<RepositoryId, DispatchError> {
        let repo = href.as_repository().ok_or_else(|| not_found(href))?;
        self.store.repository(&repo).map_err(|_| not_found(href))?;
        Ok(repo)
    }

    fn resolve_content(&self, hrefs: &[Href]) -> Result<BTreeSet<ContentId>, DispatchError> {
        hrefs
            .iter()
            .map(|href| {
                let id = href.as_content().ok_or_else(|| not_found(href))?;
                self.store.content(&id).map_err(|_| not_found(href))?;
                Ok(id)
            })
            .collect()
    }

    fn check_base_version(
        &self,
        repo: &RepositoryId,
        number: VersionNumber,
    ) -> Result<(), DispatchError> {
        match self.store.version(repo, number) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => {
                let name = self.store.repository(repo)?.name;
                Err(missing_version(number, &name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn not_found(href: &Href) -> DispatchError {
    DispatchError::NotFound(format!("could not resolve '{href}'"))
}

/// Validation error for a base version the repository does not have.
pub(crate) fn missing_version(number: VersionNumber, repository: &str) -> DispatchError {
    DispatchError::Validation(format!(
        "Version {number} does not exist for repository '{repository}'."
    ))
}

/// Expands a selection with the units it depends on.
pub trait DependencySolver: Send + Sync + std::fmt::Debug {
    /// Return `selected` plus every unit in `available` it transitively
    /// requires. Requirements outside `available` are ignored.
    fn solve(
        &self,
        store: &dyn RepositoryStore,
        selected: &BTreeSet<ContentId>,
        available: &BTreeSet<ContentId>,
    ) -> Result<BTreeSet<ContentId>, StoreError>;
}

/// Follows `requires` edges breadth-first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresClosure;

impl DependencySolver for RequiresClosure {
    fn solve(
        &self,
        store: &dyn RepositoryStore,
        selected: &BTreeSet<ContentId>,
        available: &BTreeSet<ContentId>,
    ) -> Result<BTreeSet<ContentId>, StoreError> {
        let mut closure = selected.clone();
        let mut queue: VecDeque<ContentId> = selected.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            for dep in store.content(&id)?.requires {
                if available.contains(&dep) && closure.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        Ok(closure)
    }
}
