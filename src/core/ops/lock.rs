//! core::ops::lock
//!
//! Shared/exclusive resource reservations for background tasks.
//!
//! # Architecture
//!
//! Every task declares its full resource set up front. The [`LockManager`]
//! grants the whole set at once or not at all, so a task never holds part of
//! its set while waiting for the rest and no deadlock can form.
//!
//! Waiting requests sit in one arrival-ordered queue. Each grant pass walks
//! the queue front to back; a request is granted when every resource it
//! names is compatible with the current holders *and* with every earlier
//! request that is still waiting. An earlier waiter therefore can never be
//! overtaken on a resource it conflicts on, which gives per-resource FIFO
//! order and keeps a stream of shared holders from starving an exclusive one.
//!
//! # Invariants
//!
//! - An exclusive holder is the only holder of its resource
//! - Shared holders only coexist with other shared holders
//! - Reservations are released when the [`Reservation`] guard is dropped
//! - A request cancelled while queued leaves no trace in the table
//! - The manager never fails; it only grants or waits
//!
//! # Example
//!
//! ```
//! use repodepot::core::ops::lock::LockManager;
//! use repodepot::core::types::{LockMode, RemoteId, RepositoryId, ResourceId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let locks = LockManager::new();
//! let repo = ResourceId::from(RepositoryId::new());
//! let remote = ResourceId::from(RemoteId::new());
//!
//! let reservation = locks
//!     .reserve([(remote, LockMode::Shared), (repo, LockMode::Exclusive)])
//!     .await;
//! assert!(locks.try_reserve([(repo, LockMode::Shared)]).is_none());
//!
//! drop(reservation);
//! assert!(locks.try_reserve([(repo, LockMode::Shared)]).is_some());
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::core::types::{LockMode, ResourceId};

/// Current holders of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Holding {
    shared: usize,
    exclusive: bool,
}

impl Holding {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }

    fn is_free(&self) -> bool {
        !self.exclusive && self.shared == 0
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    resources: Vec<(ResourceId, LockMode)>,
    notify: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LockTable {
    holdings: HashMap<ResourceId, Holding>,
    waiters: VecDeque<Waiter>,
    granted: HashMap<u64, Vec<(ResourceId, LockMode)>>,
    next_id: u64,
}

impl LockTable {
    fn holding(&self, resource: &ResourceId) -> Holding {
        self.holdings.get(resource).copied().unwrap_or_default()
    }

    fn hold(&mut self, id: u64, resources: Vec<(ResourceId, LockMode)>) {
        for (resource, mode) in &resources {
            let holding = self.holdings.entry(*resource).or_default();
            match mode {
                LockMode::Shared => holding.shared += 1,
                LockMode::Exclusive => holding.exclusive = true,
            }
        }
        self.granted.insert(id, resources);
    }

    fn unhold(&mut self, id: u64) -> bool {
        let Some(resources) = self.granted.remove(&id) else {
            return false;
        };
        for (resource, mode) in resources {
            if let Some(holding) = self.holdings.get_mut(&resource) {
                match mode {
                    LockMode::Shared => holding.shared = holding.shared.saturating_sub(1),
                    LockMode::Exclusive => holding.exclusive = false,
                }
                if holding.is_free() {
                    self.holdings.remove(&resource);
                }
            }
        }
        true
    }

    /// Whether `resources` could be granted behind every current waiter.
    fn grantable_at_tail(&self, resources: &[(ResourceId, LockMode)]) -> bool {
        resources.iter().all(|(resource, mode)| {
            self.holding(resource).admits(*mode)
                && self.waiters.iter().all(|w| {
                    w.resources
                        .iter()
                        .all(|(r, m)| r != resource || mode.compatible_with(*m))
                })
        })
    }

    /// Grant every waiter that is compatible with holders and earlier waiters.
    fn grant_pass(&mut self) {
        // Strongest mode claimed by a still-waiting earlier request, per resource.
        let mut claimed: HashMap<ResourceId, LockMode> = HashMap::new();
        let mut index = 0;

        while index < self.waiters.len() {
            let waiter = &self.waiters[index];
            let grantable = waiter.resources.iter().all(|(resource, mode)| {
                self.holding(resource).admits(*mode)
                    && claimed
                        .get(resource)
                        .map_or(true, |earlier| mode.compatible_with(*earlier))
            });

            if grantable {
                let Some(waiter) = self.waiters.remove(index) else {
                    break;
                };
                trace!(request = waiter.id, "granting reservation");
                self.hold(waiter.id, waiter.resources);
                // A dropped receiver means the request was cancelled mid-grant;
                // its pending guard releases the grant.
                let _ = waiter.notify.send(());
            } else {
                for (resource, mode) in &waiter.resources {
                    claimed
                        .entry(*resource)
                        .and_modify(|m| {
                            if *mode == LockMode::Exclusive {
                                *m = LockMode::Exclusive;
                            }
                        })
                        .or_insert(*mode);
                }
                index += 1;
            }
        }
    }
}

/// State of one resource, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceState {
    /// Number of shared holders.
    pub shared_holders: usize,
    /// Whether an exclusive holder exists.
    pub exclusive_held: bool,
    /// Number of queued requests naming this resource.
    pub waiting: usize,
}

/// Grants shared and exclusive reservations on named resources.
///
/// Cheap to clone; clones share one lock table.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    table: Arc<Mutex<LockTable>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a set of resources, waiting until all can be granted together.
    ///
    /// Duplicate resources are merged, with exclusive taking precedence.
    /// Dropping the returned future before it completes withdraws the request.
    pub async fn reserve(
        &self,
        requests: impl IntoIterator<Item = (ResourceId, LockMode)>,
    ) -> Reservation {
        let resources = normalize(requests);
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut table = self.table();
            let id = table.next_id;
            table.next_id += 1;
            table.waiters.push_back(Waiter {
                id,
                resources: resources.clone(),
                notify: tx,
            });
            table.grant_pass();
            id
        };

        let mut pending = PendingRequest {
            manager: self.clone(),
            id,
            armed: true,
        };

        // The sender stays in the table until the grant pass fires it.
        let _ = rx.await;
        pending.armed = false;

        debug!(request = id, resources = resources.len(), "reservation granted");
        Reservation {
            manager: self.clone(),
            id,
            resources,
            released: false,
        }
    }

    /// Reserve without waiting.
    ///
    /// Returns `None` if the set cannot be granted right now, including when
    /// an earlier queued request has a conflicting claim.
    pub fn try_reserve(
        &self,
        requests: impl IntoIterator<Item = (ResourceId, LockMode)>,
    ) -> Option<Reservation> {
        let resources = normalize(requests);
        let mut table = self.table();
        if !table.grantable_at_tail(&resources) {
            return None;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.hold(id, resources.clone());
        Some(Reservation {
            manager: self.clone(),
            id,
            resources,
            released: false,
        })
    }

    fn release(&self, id: u64) {
        let mut table = self.table();
        if table.unhold(id) {
            debug!(request = id, "reservation released");
            table.grant_pass();
        }
    }

    fn withdraw(&self, id: u64) {
        let mut table = self.table();
        if let Some(pos) = table.waiters.iter().position(|w| w.id == id) {
            table.waiters.remove(pos);
            debug!(request = id, "queued reservation withdrawn");
            // Later waiters may have been blocked only by this one.
            table.grant_pass();
        } else if table.unhold(id) {
            debug!(request = id, "reservation granted after withdrawal released");
            table.grant_pass();
        }
    }

    /// Per-resource holders and queue depth.
    pub fn snapshot(&self) -> BTreeMap<ResourceId, ResourceState> {
        let table = self.table();
        let mut states: BTreeMap<ResourceId, ResourceState> = BTreeMap::new();
        for (resource, holding) in &table.holdings {
            let state = states.entry(*resource).or_default();
            state.shared_holders = holding.shared;
            state.exclusive_held = holding.exclusive;
        }
        for waiter in &table.waiters {
            for (resource, _) in &waiter.resources {
                states.entry(*resource).or_default().waiting += 1;
            }
        }
        states
    }

    /// Number of requests still queued.
    pub fn waiting(&self) -> usize {
        self.table().waiters.len()
    }
}

/// Sort and merge a request list; exclusive wins over shared.
fn normalize(requests: impl IntoIterator<Item = (ResourceId, LockMode)>) -> Vec<(ResourceId, LockMode)> {
    let mut merged: BTreeMap<ResourceId, LockMode> = BTreeMap::new();
    for (resource, mode) in requests {
        merged
            .entry(resource)
            .and_modify(|m| {
                if mode == LockMode::Exclusive {
                    *m = LockMode::Exclusive;
                }
            })
            .or_insert(mode);
    }
    merged.into_iter().collect()
}

/// Withdraws a queued request if the waiting future is dropped.
struct PendingRequest {
    manager: LockManager,
    id: u64,
    armed: bool,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.armed {
            self.manager.withdraw(self.id);
        }
    }
}

/// A granted set of reservations.
///
/// The reservations are released when this guard is dropped (RAII pattern),
/// so a task that fails or panics never leaks its locks.
#[derive(Debug)]
pub struct Reservation {
    manager: LockManager,
    id: u64,
    resources: Vec<(ResourceId, LockMode)>,
    released: bool,
}

impl Reservation {
    /// The granted resources and modes.
    pub fn resources(&self) -> &[(ResourceId, LockMode)] {
        &self.resources
    }

    /// Release explicitly.
    pub fn release(mut self) {
        self.released = true;
        self.manager.release(self.id);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(self.id);
        }
    }
}
