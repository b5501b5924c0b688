//! engine::exec
//!
//! Task bodies and the transactional commit.
//!
//! # Architecture
//!
//! The [`Executor`] is the only component that writes repository state.
//! Each job body reads committed state, stages its writes in a
//! [`Transaction`], and hands the transaction to the store in a single
//! commit stamped by the [`Clock`].
//!
//! # Executor Contract
//!
//! The executor MUST:
//! 1. Run only with the job's reservation held (the dispatcher guarantees it)
//! 2. Stage every write; never touch the store until commit
//! 3. Check the cancellation token before committing
//! 4. Commit once, or not at all
//!
//! # Invariants
//!
//! - At most one new version per repository per task
//! - Autopublish happens in the same commit as the version it publishes
//! - An unchanged content set creates no version
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use tokio_util::sync::CancellationToken;
//! use repodepot::core::clock::SystemClock;
//! use repodepot::core::model::{Repository, RepositoryConfig};
//! use repodepot::core::store::MemoryStore;
//! use repodepot::core::types::VersionNumber;
//! use repodepot::engine::exec::Executor;
//! use repodepot::engine::publish::PublishSettings;
//! use repodepot::engine::task::{Job, PublishJob};
//! use repodepot::engine::upstream::MemoryUpstream;
//!
//! # futures::executor::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let repo = store.add_repository(Repository::new("demo", RepositoryConfig::default()), Utc::now());
//! let executor = Executor::new(store.clone(), Arc::new(MemoryUpstream::new()), Arc::new(SystemClock));
//!
//! let job = Job::Publish(PublishJob {
//!     repository: repo,
//!     version: VersionNumber::ZERO,
//!     settings: PublishSettings::default(),
//!     checkpoint: false,
//! });
//! let created = executor.run(&job, &CancellationToken::new()).await.unwrap();
//! assert_eq!(created.publications.len(), 1);
//! # });
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::copy::{DependencySolver, RequiresClosure};
use super::publish::PublishSettings;
use super::task::{CopyJob, Job, ModifyJob, PublishJob, SyncJob};
use super::upstream::{Upstream, UpstreamError};
use crate::core::clock::Clock;
use crate::core::model::{Repository, RepositoryVersion, SyncDetails};
use crate::core::store::{
    CreatedResources, RepositoryStore, StagedVersion, StoreError, Transaction,
};
use crate::core::types::{ContentId, VersionNumber};

/// Errors from task bodies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// The store refused a read or the commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote could not be read.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The task was canceled before it committed.
    #[error("task canceled")]
    Canceled,
}

/// Runs job bodies against the store.
#[derive(Debug, Clone)]
pub struct Executor {
    store: Arc<dyn RepositoryStore>,
    upstream: Arc<dyn Upstream>,
    clock: Arc<dyn Clock>,
    solver: Arc<dyn DependencySolver>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        upstream: Arc<dyn Upstream>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            upstream,
            clock,
            solver: Arc::new(RequiresClosure),
        }
    }

    /// Replace the dependency solver used by copies.
    pub fn with_solver(mut self, solver: Arc<dyn DependencySolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn store(&self) -> &Arc<dyn RepositoryStore> {
        &self.store
    }

    /// Run a job body and commit what it staged.
    ///
    /// # Errors
    ///
    /// - [`ExecError::Canceled`] if `cancel` fired before commit
    /// - [`ExecError::Store`] for missing records or a refused commit
    /// - [`ExecError::Upstream`] if a sync could not read its remote
    pub async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<CreatedResources, ExecError> {
        let txn = match job {
            Job::Sync(job) => self.stage_sync(job, cancel).await?,
            Job::Publish(job) => self.stage_publish(job)?,
            Job::Copy(job) => self.stage_copy(job)?,
            Job::Modify(job) => self.stage_modify(job)?,
        };

        if cancel.is_cancelled() {
            debug!("discarding staged writes of canceled task");
            return Err(ExecError::Canceled);
        }
        if txn.is_empty() {
            return Ok(CreatedResources::default());
        }

        let created = self.store.commit(txn, self.clock.now())?;
        debug!(
            versions = created.versions.len(),
            publications = created.publications.len(),
            "transaction committed"
        );
        Ok(created)
    }

    async fn stage_sync(
        &self,
        job: &SyncJob,
        cancel: &CancellationToken,
    ) -> Result<Transaction, ExecError> {
        let repo = self.store.repository(&job.repository)?;
        let remote = self.store.remote(&job.remote)?;
        let latest = self.store.latest_version(&repo.id)?;

        if job.optimize {
            if let Some(last) = self.store.sync_details(&repo.id)? {
                let revision = cancellable(cancel, self.upstream.revision(&remote)).await??;
                let unchanged = last.remote == remote.id
                    && last.revision == revision
                    && last.policy == job.policy
                    && last.skip_types == job.skip_types
                    && last.version == latest.number;
                if unchanged {
                    info!(repository = %repo.name, %revision, "upstream unchanged, skipping sync");
                    return Ok(Transaction::new());
                }
            }
        }

        let listing = cancellable(cancel, self.upstream.fetch(&remote)).await??;
        debug!(
            repository = %repo.name,
            remote = %remote.name,
            units = listing.units.len(),
            "fetched upstream listing"
        );

        let mut txn = Transaction::new();
        let mut upstream = BTreeSet::new();
        for unit in listing.units {
            if job.skip_types.contains(&unit.kind) {
                continue;
            }
            upstream.insert(unit.id);
            txn.stage_content(unit);
        }

        let content = if job.policy.is_mirror() {
            upstream
        } else {
            latest.content.iter().copied().chain(upstream).collect()
        };

        let number = stage_new_version(&mut txn, &repo, &latest, content, None)
            .unwrap_or(latest.number);
        txn.record_sync(
            repo.id,
            SyncDetails {
                remote: remote.id,
                revision: listing.revision,
                policy: job.policy,
                skip_types: job.skip_types.clone(),
                version: number,
            },
        );
        Ok(txn)
    }

    fn stage_publish(&self, job: &PublishJob) -> Result<Transaction, ExecError> {
        // The version must still exist; the shared reservation keeps it stable.
        self.store.version(&job.repository, job.version)?;
        let mut txn = Transaction::new();
        job.settings
            .stage(&mut txn, job.repository, job.version, job.checkpoint);
        Ok(txn)
    }

    fn stage_copy(&self, job: &CopyJob) -> Result<Transaction, ExecError> {
        let mut txn = Transaction::new();

        for (destination, entries) in job.plan.by_destination() {
            let repo = self.store.repository(&destination)?;
            let latest = self.store.latest_version(&destination)?;
            let base_version = entries.iter().find_map(|e| e.base_version);
            let mut content = self.base_content(&repo, &latest, base_version)?;

            for entry in entries {
                let source = self.store.version(&entry.source, entry.source_version)?;
                let mut selected = entry.select(&source.content);
                if job.dependency_solving {
                    selected = self
                        .solver
                        .solve(self.store.as_ref(), &selected, &source.content)?;
                }
                content.extend(selected);
            }

            stage_new_version(&mut txn, &repo, &latest, content, base_version);
        }

        Ok(txn)
    }

    fn stage_modify(&self, job: &ModifyJob) -> Result<Transaction, ExecError> {
        let repo = self.store.repository(&job.repository)?;
        let latest = self.store.latest_version(&repo.id)?;
        let mut content = self.base_content(&repo, &latest, job.base_version)?;

        content.retain(|id| !job.remove.contains(id));
        content.extend(job.add.iter().copied());

        let mut txn = Transaction::new();
        stage_new_version(&mut txn, &repo, &latest, content, job.base_version);
        Ok(txn)
    }

    fn base_content(
        &self,
        repo: &Repository,
        latest: &RepositoryVersion,
        base_version: Option<VersionNumber>,
    ) -> Result<BTreeSet<ContentId>, ExecError> {
        match base_version {
            Some(number) if number != latest.number => {
                Ok(self.store.version(&repo.id, number)?.content)
            }
            _ => Ok(latest.content.clone()),
        }
    }
}

/// Stage the next version of `repo` if `content` differs from `latest`.
///
/// Also stages the autopublish publication when the repository asks for it.
fn stage_new_version(
    txn: &mut Transaction,
    repo: &Repository,
    latest: &RepositoryVersion,
    content: BTreeSet<ContentId>,
    base_version: Option<VersionNumber>,
) -> Option<VersionNumber> {
    if content == latest.content {
        debug!(repository = %repo.name, "content unchanged, no new version");
        return None;
    }

    let number = latest.number.next();
    txn.stage_version(StagedVersion {
        repository: repo.id,
        number,
        content,
        base_version,
    });

    if repo.config.autopublish {
        PublishSettings::repository_defaults(&repo.config).stage(txn, repo.id, number, false);
    }

    Some(number)
}

/// Race `fut` against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, ExecError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ExecError::Canceled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::model::{ContentUnit, Remote, RepositoryConfig, SyncPolicy};
    use crate::core::store::MemoryStore;
    use crate::core::types::{ContentKind, RemoteId, RepositoryId};
    use crate::engine::copy::{PlannedCopy, CopyPlan};
    use crate::engine::upstream::MemoryUpstream;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        upstream: MemoryUpstream,
        clock: ManualClock,
        executor: Executor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let upstream = MemoryUpstream::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let executor = Executor::new(
            store.clone(),
            Arc::new(upstream.clone()),
            Arc::new(clock.clone()),
        );
        Fixture {
            store,
            upstream,
            clock,
            executor,
        }
    }

    impl Fixture {
        fn repo(&self, name: &str, config: RepositoryConfig) -> RepositoryId {
            self.store
                .add_repository(Repository::new(name, config), self.clock.now())
        }

        fn remote(&self, url: &str) -> Remote {
            let remote = Remote::new("upstream", url);
            self.store.add_remote(remote.clone());
            remote
        }

        fn latest(&self, repo: &RepositoryId) -> RepositoryVersion {
            self.store.latest_version(repo).unwrap()
        }

        async fn run(&self, job: Job) -> Result<CreatedResources, ExecError> {
            self.executor.run(&job, &CancellationToken::new()).await
        }
    }

    fn unit(kind: &str, name: &str) -> ContentUnit {
        ContentUnit::new(ContentKind::new(kind).unwrap(), name)
    }

    fn sync_job(repo: RepositoryId, remote: RemoteId, policy: SyncPolicy) -> Job {
        Job::Sync(SyncJob {
            repository: repo,
            remote,
            policy,
            skip_types: Vec::new(),
            optimize: false,
        })
    }

    mod sync {
        use super::*;

        #[tokio::test]
        async fn additive_keeps_existing_content() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            let (a, b) = (unit("package", "a"), unit("package", "b"));

            fx.upstream.publish(&remote.url, vec![a.clone()]);
            fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();
            fx.upstream.publish(&remote.url, vec![b.clone()]);
            fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();

            let latest = fx.latest(&repo);
            assert_eq!(latest.number, VersionNumber::new(2));
            assert_eq!(latest.content, BTreeSet::from([a.id, b.id]));
        }

        #[tokio::test]
        async fn mirror_replaces_content() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            let (a, b) = (unit("package", "a"), unit("package", "b"));

            fx.upstream.publish(&remote.url, vec![a]);
            fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();
            fx.upstream.publish(&remote.url, vec![b.clone()]);
            fx.run(sync_job(repo, remote.id, SyncPolicy::MirrorContentOnly))
                .await
                .unwrap();

            assert_eq!(fx.latest(&repo).content, BTreeSet::from([b.id]));
        }

        #[tokio::test]
        async fn skip_types_leaves_kinds_out() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            let (pkg, srpm) = (unit("package", "a"), unit("srpm", "a-src"));
            fx.upstream.publish(&remote.url, vec![pkg.clone(), srpm.clone()]);

            let job = Job::Sync(SyncJob {
                repository: repo,
                remote: remote.id,
                policy: SyncPolicy::Additive,
                skip_types: vec![ContentKind::new("srpm").unwrap()],
                optimize: false,
            });
            fx.run(job).await.unwrap();

            assert_eq!(fx.latest(&repo).content, BTreeSet::from([pkg.id]));
            assert!(fx.store.content(&srpm.id).is_err());
        }

        #[tokio::test]
        async fn unchanged_upstream_creates_no_version() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            fx.upstream.publish(&remote.url, vec![unit("package", "a")]);

            let first = fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();
            let second = fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();

            assert_eq!(first.versions.len(), 1);
            assert!(second.is_empty());
            assert_eq!(fx.latest(&repo).number, VersionNumber::new(1));
        }

        #[tokio::test]
        async fn optimize_skips_fetch_when_revision_matches() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            fx.upstream.publish(&remote.url, vec![unit("package", "a")]);

            let optimized = Job::Sync(SyncJob {
                repository: repo,
                remote: remote.id,
                policy: SyncPolicy::Additive,
                skip_types: Vec::new(),
                optimize: true,
            });
            fx.run(optimized.clone()).await.unwrap();
            assert_eq!(fx.upstream.fetch_count(), 1);

            fx.run(optimized.clone()).await.unwrap();
            assert_eq!(fx.upstream.fetch_count(), 1);

            fx.upstream.publish(&remote.url, vec![unit("package", "b")]);
            let created = fx.run(optimized).await.unwrap();
            assert_eq!(fx.upstream.fetch_count(), 2);
            assert_eq!(created.versions, vec![(repo, VersionNumber::new(2))]);
        }

        #[tokio::test]
        async fn optimize_does_not_skip_after_policy_change() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            fx.upstream.publish(&remote.url, vec![unit("package", "a")]);
            fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();

            let job = Job::Sync(SyncJob {
                repository: repo,
                remote: remote.id,
                policy: SyncPolicy::MirrorContentOnly,
                skip_types: Vec::new(),
                optimize: true,
            });
            fx.run(job).await.unwrap();
            assert_eq!(fx.upstream.fetch_count(), 2);
        }

        #[tokio::test]
        async fn autopublish_publishes_new_version_with_defaults() {
            let fx = fixture();
            let config = RepositoryConfig {
                autopublish: true,
                checksum_type: crate::core::model::ChecksumType::Sha384,
                ..Default::default()
            };
            let repo = fx.repo("r", config);
            let remote = fx.remote("https://example.invalid/a/");
            fx.upstream.publish(&remote.url, vec![unit("package", "a")]);

            let created = fx.run(sync_job(repo, remote.id, SyncPolicy::Additive)).await.unwrap();

            assert_eq!(created.publications.len(), 1);
            let publication = fx.store.publication(&created.publications[0]).unwrap();
            assert_eq!(publication.version, VersionNumber::new(1));
            assert!(!publication.checkpoint);
            assert_eq!(
                publication.checksum_type,
                crate::core::model::ChecksumType::Sha384
            );
        }

        #[tokio::test]
        async fn upstream_failure_commits_nothing() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let remote = fx.remote("https://example.invalid/a/");
            fx.upstream
                .fail_with(Some(UpstreamError::Unavailable("down".into())));

            let err = fx
                .run(sync_job(repo, remote.id, SyncPolicy::Additive))
                .await
                .unwrap_err();
            assert!(matches!(err, ExecError::Upstream(_)));
            assert_eq!(fx.latest(&repo).number, VersionNumber::ZERO);
            assert!(fx.store.sync_details(&repo).unwrap().is_none());
        }
    }

    mod publish {
        use super::*;

        #[tokio::test]
        async fn checkpoint_flag_is_recorded() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let job = Job::Publish(PublishJob {
                repository: repo,
                version: VersionNumber::ZERO,
                settings: PublishSettings::default(),
                checkpoint: true,
            });
            let created = fx.run(job).await.unwrap();
            let publication = fx.store.publication(&created.publications[0]).unwrap();
            assert!(publication.checkpoint);
            assert_eq!(publication.created_at, fx.clock.now());
        }

        #[tokio::test]
        async fn second_checkpoint_in_same_second_fails() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let job = Job::Publish(PublishJob {
                repository: repo,
                version: VersionNumber::ZERO,
                settings: PublishSettings::default(),
                checkpoint: true,
            });
            fx.run(job.clone()).await.unwrap();
            let err = fx.run(job.clone()).await.unwrap_err();
            assert!(err.to_string().contains("checkpoint timestamp"));

            fx.clock.advance(Duration::seconds(1));
            assert!(fx.run(job).await.is_ok());
            assert_eq!(fx.store.checkpoints(&repo).unwrap().len(), 2);
        }
    }

    mod copy {
        use super::*;

        fn planned(source: RepositoryId, destination: RepositoryId) -> PlannedCopy {
            PlannedCopy {
                source,
                source_version: VersionNumber::new(1),
                destination,
                base_version: None,
                content: None,
            }
        }

        #[tokio::test]
        async fn copies_into_one_version_per_destination() {
            let fx = fixture();
            let a = fx.repo("a", RepositoryConfig::default());
            let b = fx.repo("b", RepositoryConfig::default());
            let dst = fx.repo("dst", RepositoryConfig::default());
            let ua = fx.store.add_content(unit("package", "ua"));
            let ub = fx.store.add_content(unit("package", "ub"));
            for (repo, id) in [(a, ua), (b, ub)] {
                let mut txn = Transaction::new();
                txn.stage_version(StagedVersion {
                    repository: repo,
                    number: VersionNumber::new(1),
                    content: BTreeSet::from([id]),
                    base_version: None,
                });
                fx.store.commit(txn, fx.clock.now()).unwrap();
            }

            let job = Job::Copy(CopyJob {
                plan: CopyPlan {
                    entries: vec![planned(a, dst), planned(b, dst)],
                    shared: vec![a, b],
                    exclusive: vec![dst],
                },
                dependency_solving: false,
            });
            let created = fx.run(job).await.unwrap();

            assert_eq!(created.versions, vec![(dst, VersionNumber::new(1))]);
            assert_eq!(fx.latest(&dst).content, BTreeSet::from([ua, ub]));
        }

        #[tokio::test]
        async fn dependency_solving_pulls_requirements() {
            let fx = fixture();
            let src = fx.repo("src", RepositoryConfig::default());
            let dst = fx.repo("dst", RepositoryConfig::default());
            let lib = unit("package", "lib");
            let app = unit("package", "app").requiring([lib.id]);
            let (lib_id, app_id) = (lib.id, app.id);
            fx.store.add_content(lib);
            fx.store.add_content(app);
            let mut txn = Transaction::new();
            txn.stage_version(StagedVersion {
                repository: src,
                number: VersionNumber::new(1),
                content: BTreeSet::from([lib_id, app_id]),
                base_version: None,
            });
            fx.store.commit(txn, fx.clock.now()).unwrap();

            let entry = PlannedCopy {
                content: Some(BTreeSet::from([app_id])),
                ..planned(src, dst)
            };
            let plan = CopyPlan {
                entries: vec![entry],
                shared: vec![src],
                exclusive: vec![dst],
            };

            let without = Job::Copy(CopyJob {
                plan: plan.clone(),
                dependency_solving: false,
            });
            fx.run(without).await.unwrap();
            assert_eq!(fx.latest(&dst).content, BTreeSet::from([app_id]));

            let with = Job::Copy(CopyJob {
                plan,
                dependency_solving: true,
            });
            fx.run(with).await.unwrap();
            assert_eq!(fx.latest(&dst).content, BTreeSet::from([app_id, lib_id]));
        }
    }

    mod modify {
        use super::*;

        #[tokio::test]
        async fn add_and_remove_from_base_version() {
            let fx = fixture();
            let repo = fx.repo("r", RepositoryConfig::default());
            let a = fx.store.add_content(unit("package", "a"));
            let b = fx.store.add_content(unit("package", "b"));

            let add = |ids: &[ContentId]| {
                Job::Modify(ModifyJob {
                    repository: repo,
                    base_version: None,
                    add: ids.iter().copied().collect(),
                    remove: BTreeSet::new(),
                })
            };
            fx.run(add(&[a])).await.unwrap();
            fx.run(add(&[b])).await.unwrap();

            let from_one = Job::Modify(ModifyJob {
                repository: repo,
                base_version: Some(VersionNumber::new(1)),
                add: BTreeSet::new(),
                remove: BTreeSet::from([a]),
            });
            let created = fx.run(from_one).await.unwrap();

            assert_eq!(created.versions, vec![(repo, VersionNumber::new(3))]);
            let latest = fx.latest(&repo);
            assert!(latest.content.is_empty());
            assert_eq!(latest.base_version, Some(VersionNumber::new(1)));
        }
    }

    #[tokio::test]
    async fn canceled_token_discards_staged_writes() {
        let fx = fixture();
        let repo = fx.repo("r", RepositoryConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let job = Job::Publish(PublishJob {
            repository: repo,
            version: VersionNumber::ZERO,
            settings: PublishSettings::default(),
            checkpoint: false,
        });
        let err = fx.executor.run(&job, &cancel).await.unwrap_err();

        assert_eq!(err, ExecError::Canceled);
        assert!(fx.store.publications(&repo).unwrap().is_empty());
    }
}
