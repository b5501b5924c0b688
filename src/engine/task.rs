//! engine::task
//!
//! Task requests, validated jobs, and task handles.
//!
//! # Lifecycle
//!
//! ```text
//! Waiting -> Running -> Completed | Failed | Canceled
//!    \-----------------------------------> Canceled
//! ```
//!
//! A [`TaskRequest`] is what callers submit. The dispatcher validates it into
//! a [`Job`], which carries everything the body needs with every default
//! already resolved. Callers observe progress through a [`TaskHandle`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::copy::{CopyPlan, CopyRequest};
use super::policy::SyncPolicy;
use super::publish::PublishSettings;
use crate::core::model::{ChecksumType, CompressionType};
use crate::core::store::CreatedResources;
use crate::core::types::{
    ContentId, ContentKind, LockMode, RemoteId, RepositoryId, ResourceId, VersionNumber,
};

/// Unique identifier for a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Sync a repository from a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub repository: RepositoryId,
    /// Defaults to the repository's configured remote.
    #[serde(default)]
    pub remote: Option<RemoteId>,
    /// Legacy switch; `true` means `mirror_complete` unless a policy is given.
    #[serde(default)]
    pub mirror: Option<bool>,
    #[serde(default)]
    pub sync_policy: Option<SyncPolicy>,
    /// Content kinds to leave out.
    #[serde(default)]
    pub skip_types: Vec<ContentKind>,
    /// Skip the sync when upstream has not changed since the last one.
    #[serde(default)]
    pub optimize: bool,
}

impl SyncRequest {
    pub fn new(repository: RepositoryId) -> Self {
        Self {
            repository,
            remote: None,
            mirror: None,
            sync_policy: None,
            skip_types: Vec::new(),
            optimize: false,
        }
    }
}

/// Publish a repository version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub repository_version: (RepositoryId, VersionNumber),
    #[serde(default)]
    pub checksum_type: Option<ChecksumType>,
    #[serde(default)]
    pub repo_config: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub compression_type: Option<CompressionType>,
    #[serde(default)]
    pub checkpoint: bool,
}

impl PublishRequest {
    pub fn new(repository: RepositoryId, version: VersionNumber) -> Self {
        Self {
            repository_version: (repository, version),
            checksum_type: None,
            repo_config: None,
            compression_type: None,
            checkpoint: false,
        }
    }

    /// Mark the publication as a checkpoint.
    pub fn checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }
}

/// Add and remove content on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub repository: RepositoryId,
    /// Start from this version instead of the latest.
    #[serde(default)]
    pub base_version: Option<VersionNumber>,
    #[serde(default)]
    pub add_content_units: Vec<ContentId>,
    #[serde(default)]
    pub remove_content_units: Vec<ContentId>,
}

impl ModifyRequest {
    pub fn new(repository: RepositoryId) -> Self {
        Self {
            repository,
            base_version: None,
            add_content_units: Vec::new(),
            remove_content_units: Vec::new(),
        }
    }
}

/// Everything a caller can ask the dispatcher to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRequest {
    Sync(SyncRequest),
    Publish(PublishRequest),
    Copy(CopyRequest),
    Modify(ModifyRequest),
}

// =============================================================================
// Jobs
// =============================================================================

/// Validated sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub repository: RepositoryId,
    pub remote: RemoteId,
    pub policy: SyncPolicy,
    pub skip_types: Vec<ContentKind>,
    pub optimize: bool,
}

/// Validated publish with settings already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishJob {
    pub repository: RepositoryId,
    pub version: VersionNumber,
    pub settings: PublishSettings,
    pub checkpoint: bool,
}

/// Validated copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub plan: CopyPlan,
    pub dependency_solving: bool,
}

/// Validated modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyJob {
    pub repository: RepositoryId,
    pub base_version: Option<VersionNumber>,
    pub add: BTreeSet<ContentId>,
    pub remove: BTreeSet<ContentId>,
}

/// A request after validation, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Sync(SyncJob),
    Publish(PublishJob),
    Copy(CopyJob),
    Modify(ModifyJob),
}

impl Job {
    pub fn kind(&self) -> TaskKind {
        match self {
            Job::Sync(_) => TaskKind::Sync,
            Job::Publish(_) => TaskKind::Publish,
            Job::Copy(_) => TaskKind::Copy,
            Job::Modify(_) => TaskKind::Modify,
        }
    }

    /// Resources the job must hold while it runs.
    pub fn resources(&self) -> Vec<(ResourceId, LockMode)> {
        match self {
            Job::Sync(job) => vec![
                (job.remote.into(), LockMode::Shared),
                (job.repository.into(), LockMode::Exclusive),
            ],
            Job::Publish(job) => vec![(job.repository.into(), LockMode::Shared)],
            Job::Copy(job) => job.plan.resources(),
            Job::Modify(job) => vec![(job.repository.into(), LockMode::Exclusive)],
        }
    }
}

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sync,
    Publish,
    Copy,
    Modify,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Sync => "sync",
            TaskKind::Publish => "publish",
            TaskKind::Copy => "copy",
            TaskKind::Modify => "modify",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Status and handles
// =============================================================================

/// Observable state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for its reservation.
    Waiting,
    /// Holding its reservation, body executing.
    Running,
    /// Committed; lists what was created.
    Completed { created: CreatedResources },
    /// Nothing committed.
    Failed { error: String },
    /// Canceled before commit; nothing committed.
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed { .. } | TaskStatus::Failed { .. } | TaskStatus::Canceled
        )
    }

    /// What the task created, if it completed.
    pub fn created(&self) -> Option<&CreatedResources> {
        match self {
            TaskStatus::Completed { created } => Some(created),
            _ => None,
        }
    }
}

/// Caller's view of a dispatched task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    status: watch::Receiver<TaskStatus>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        status: watch::Receiver<TaskStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            kind,
            status,
            cancel,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Wait until the task reaches a terminal status and return it.
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.status.clone();
        let result = rx.wait_for(TaskStatus::is_terminal).await.map(|s| s.clone());
        match result {
            Ok(status) => status,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Request cancellation.
    ///
    /// A waiting task leaves the queue; a running task discards its staged
    /// writes. A task that already committed is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Failed {
            error: "boom".into()
        }
        .is_terminal());
        assert!(TaskStatus::Completed {
            created: CreatedResources::default()
        }
        .is_terminal());
    }

    #[test]
    fn sync_resources_lock_remote_shared_and_repository_exclusive() {
        let job = Job::Sync(SyncJob {
            repository: RepositoryId::new(),
            remote: RemoteId::new(),
            policy: SyncPolicy::Additive,
            skip_types: Vec::new(),
            optimize: false,
        });
        let Job::Sync(sync) = &job else {
            unreachable!()
        };
        assert_eq!(
            job.resources(),
            vec![
                (ResourceId::Remote(sync.remote), LockMode::Shared),
                (ResourceId::Repository(sync.repository), LockMode::Exclusive),
            ]
        );
    }

    #[test]
    fn publish_locks_repository_shared_only() {
        let repo = RepositoryId::new();
        let job = Job::Publish(PublishJob {
            repository: repo,
            version: VersionNumber::ZERO,
            settings: PublishSettings::default(),
            checkpoint: true,
        });
        assert_eq!(
            job.resources(),
            vec![(ResourceId::Repository(repo), LockMode::Shared)]
        );
        assert_eq!(job.kind(), TaskKind::Publish);
    }

    #[test]
    fn requests_deserialize_with_defaults() {
        let repo = RepositoryId::new();
        let json = format!(r#"{{"type": "sync", "repository": "{repo}", "mirror": true}}"#);
        let request: TaskRequest = serde_json::from_str(&json).unwrap();
        let TaskRequest::Sync(sync) = request else {
            panic!("expected sync request");
        };
        assert_eq!(sync.mirror, Some(true));
        assert!(sync.skip_types.is_empty());
        assert!(!sync.optimize);
    }

    #[tokio::test]
    async fn handle_wait_returns_terminal_status() {
        let (tx, rx) = watch::channel(TaskStatus::Waiting);
        let handle = TaskHandle::new(TaskId::new(), TaskKind::Modify, rx, CancellationToken::new());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        tx.send_replace(TaskStatus::Running);
        tx.send_replace(TaskStatus::Canceled);

        assert_eq!(waiter.await.unwrap(), TaskStatus::Canceled);
        assert_eq!(handle.status(), TaskStatus::Canceled);
    }
}
