//! engine::dispatch
//!
//! Task dispatcher: validation, reservation and the worker pool.
//!
//! # Architecture
//!
//! ```text
//! dispatch() --validate--> waiter task --reserve--> job channel --> worker
//!                                                                 |
//!                                          release + terminal <---+
//! ```
//!
//! [`Dispatcher::dispatch`] validates synchronously and returns a
//! [`TaskHandle`] at once. Each accepted task gets a lightweight waiter that
//! parks on [`LockManager::reserve`]; once the reservation is granted the
//! waiter forwards the job and the reservation to a fixed pool of workers
//! over an `async_channel`. Workers only ever see runnable jobs, so a task
//! stuck behind a lock never occupies a worker.
//!
//! # Invariants
//!
//! - `dispatch` never blocks and never suspends
//! - A job body runs only while its reservation is held
//! - The reservation is released before the terminal status is published
//! - A panicking body fails its task without taking the worker down

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::copy::{missing_version, CopyPlanner};
use super::exec::{ExecError, Executor};
use super::policy;
use super::publish::PublishSettings;
use super::task::{
    CopyJob, Job, ModifyJob, ModifyRequest, PublishJob, PublishRequest, SyncJob, SyncRequest,
    TaskHandle, TaskId, TaskRequest, TaskStatus,
};
use super::DispatchError;
use crate::core::config::{Config, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::core::ops::{LockManager, Reservation};
use crate::core::store::{RepositoryStore, StoreError};
use crate::core::types::{RepositoryId, VersionNumber};

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Number of worker tasks; at least one is always started.
    pub workers: usize,
    /// Capacity of the channel feeding the workers.
    pub queue_capacity: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers(),
            queue_capacity: config.queue_capacity(),
        }
    }
}

/// A granted job on its way to a worker.
struct QueuedTask {
    id: TaskId,
    job: Job,
    reservation: Reservation,
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
}

/// Accepts tasks and runs them on a worker pool.
pub struct Dispatcher {
    executor: Arc<Executor>,
    locks: LockManager,
    jobs: async_channel::Sender<QueuedTask>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskHandle>>>,
    workers: Vec<JoinHandle<()>>,
    runtime: Handle,
}

impl Dispatcher {
    /// Start the worker pool on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(executor: Executor, settings: DispatcherSettings) -> Self {
        Self::start_with_locks(executor, LockManager::new(), settings)
    }

    /// Start with a lock manager shared with other components.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_with_locks(
        executor: Executor,
        locks: LockManager,
        settings: DispatcherSettings,
    ) -> Self {
        let runtime = Handle::current();
        let executor = Arc::new(executor);
        let (jobs, rx) = async_channel::bounded(settings.queue_capacity.max(1));

        let workers = (0..settings.workers.max(1))
            .map(|n| runtime.spawn(work(n, rx.clone(), executor.clone())))
            .collect();
        info!(
            workers = settings.workers.max(1),
            queue_capacity = settings.queue_capacity.max(1),
            "dispatcher started"
        );

        Self {
            executor,
            locks,
            jobs,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            workers,
            runtime,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn RepositoryStore> {
        self.executor.store()
    }

    /// Validate a request and queue it.
    ///
    /// Returns as soon as the task is queued; use the handle to follow it.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for inconsistent requests
    /// - [`DispatchError::NotFound`] for references that do not resolve
    ///
    /// Nothing is queued, reserved or written when an error is returned.
    pub fn dispatch(&self, request: TaskRequest) -> Result<TaskHandle, DispatchError> {
        let job = self.prepare(request)?;
        let kind = job.kind();
        let resources = job.resources();

        let id = TaskId::new();
        let (status, status_rx) = watch::channel(TaskStatus::Waiting);
        let cancel = CancellationToken::new();
        let handle = TaskHandle::new(id, kind, status_rx, cancel.clone());
        self.registry().insert(id, handle.clone());
        info!(task = %id, %kind, resources = resources.len(), "task dispatched");

        let locks = self.locks.clone();
        let jobs = self.jobs.clone();
        self.runtime.spawn(async move {
            debug!(task = %id, "waiting for resources");
            let reservation = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(task = %id, "task canceled while waiting");
                    status.send_replace(TaskStatus::Canceled);
                    return;
                }
                reservation = locks.reserve(resources) => reservation,
            };

            let queued = QueuedTask {
                id,
                job,
                reservation,
                status,
                cancel,
            };
            if let Err(err) = jobs.send(queued).await {
                let queued = err.into_inner();
                warn!(task = %id, "dispatcher shut down before task could run");
                queued.status.send_replace(TaskStatus::Failed {
                    error: "dispatcher shut down".to_string(),
                });
            }
        });

        Ok(handle)
    }

    /// Current status of a task dispatched here.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.registry().get(id).map(TaskHandle::status)
    }

    /// Handle of a task dispatched here.
    pub fn handle(&self, id: &TaskId) -> Option<TaskHandle> {
        self.registry().get(id).cloned()
    }

    /// Stop accepting work, let queued jobs drain, and wait for the workers.
    ///
    /// Tasks still waiting for their reservation fail.
    pub async fn shutdown(self) {
        self.jobs.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
        info!("dispatcher stopped");
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn prepare(&self, request: TaskRequest) -> Result<Job, DispatchError> {
        match request {
            TaskRequest::Sync(req) => self.prepare_sync(req).map(Job::Sync),
            TaskRequest::Publish(req) => self.prepare_publish(req).map(Job::Publish),
            TaskRequest::Copy(req) => {
                let plan = CopyPlanner::new(self.store().as_ref()).plan(&req.config)?;
                Ok(Job::Copy(CopyJob {
                    plan,
                    dependency_solving: req.dependency_solving,
                }))
            }
            TaskRequest::Modify(req) => self.prepare_modify(req).map(Job::Modify),
        }
    }

    fn prepare_sync(&self, req: SyncRequest) -> Result<SyncJob, DispatchError> {
        let store = self.store();
        let repo = store.repository(&req.repository)?;
        let remote = req.remote.or(repo.remote).ok_or_else(|| {
            DispatchError::Validation(
                "A remote must be specified, either on the repository or in the sync request."
                    .to_string(),
            )
        })?;
        store.remote(&remote)?;

        let policy = policy::resolve(req.sync_policy, req.mirror);
        policy::validate(policy, &repo.config, &req.skip_types)?;

        Ok(SyncJob {
            repository: repo.id,
            remote,
            policy,
            skip_types: req.skip_types,
            optimize: req.optimize,
        })
    }

    fn prepare_publish(&self, req: PublishRequest) -> Result<PublishJob, DispatchError> {
        let (repository, version) = req.repository_version;
        let repo = self.store().repository(&repository)?;
        self.check_version(&repository, &repo.name, version)?;

        Ok(PublishJob {
            repository,
            version,
            settings: PublishSettings::resolve(&req, &repo.config),
            checkpoint: req.checkpoint,
        })
    }

    fn prepare_modify(&self, req: ModifyRequest) -> Result<ModifyJob, DispatchError> {
        let store = self.store();
        let repo = store.repository(&req.repository)?;
        if let Some(base) = req.base_version {
            self.check_version(&repo.id, &repo.name, base)?;
        }
        for id in req.add_content_units.iter().chain(&req.remove_content_units) {
            store.content(id)?;
        }

        Ok(ModifyJob {
            repository: repo.id,
            base_version: req.base_version,
            add: req.add_content_units.into_iter().collect(),
            remove: req.remove_content_units.into_iter().collect(),
        })
    }

    fn check_version(
        &self,
        repository: &RepositoryId,
        name: &str,
        number: VersionNumber,
    ) -> Result<(), DispatchError> {
        match self.store().version(repository, number) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(missing_version(number, name)),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("tasks", &self.registry().len())
            .finish()
    }
}

/// Worker loop: run granted jobs until the channel closes and drains.
async fn work(worker: usize, rx: async_channel::Receiver<QueuedTask>, executor: Arc<Executor>) {
    while let Ok(queued) = rx.recv().await {
        let QueuedTask {
            id,
            job,
            reservation,
            status,
            cancel,
        } = queued;

        if cancel.is_cancelled() {
            drop(reservation);
            info!(task = %id, "task canceled before start");
            status.send_replace(TaskStatus::Canceled);
            continue;
        }

        status.send_replace(TaskStatus::Running);
        info!(task = %id, worker, kind = %job.kind(), "task running");

        let body = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { executor.run(&job, &cancel).await })
        };
        let outcome = body.await;
        drop(reservation);

        let terminal = match outcome {
            Ok(Ok(created)) => {
                info!(
                    task = %id,
                    versions = created.versions.len(),
                    publications = created.publications.len(),
                    "task completed"
                );
                TaskStatus::Completed { created }
            }
            Ok(Err(ExecError::Canceled)) => {
                info!(task = %id, "task canceled");
                TaskStatus::Canceled
            }
            Ok(Err(e)) => {
                warn!(task = %id, error = %e, "task failed");
                TaskStatus::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                warn!(task = %id, error = %e, "task body panicked");
                TaskStatus::Failed {
                    error: format!("task body panicked: {e}"),
                }
            }
        };
        status.send_replace(terminal);
    }
    debug!(worker, "worker stopped");
}
