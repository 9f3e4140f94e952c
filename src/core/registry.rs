//! Job registry: the current mapping of job UUID to job state.
//!
//! The mapping is replaced wholesale on every job list refresh. The new
//! table is built without holding the lock and swapped in at the end;
//! readers that need several consistent lookups hold the same lock through
//! [`JobRegistry::with_jobs`].
//!
//! A job that survives a refresh keeps its [`JobHandle`]: the snapshot
//! behind it is overwritten in place, so consumers may key caches off the
//! handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use super::models::JobSnapshot;
use super::{lock, read, write};

/// Shared, identity-preserving reference to one job's snapshot.
#[derive(Debug, Clone)]
pub struct JobHandle(Arc<RwLock<JobSnapshot>>);

impl JobHandle {
    fn new(snapshot: JobSnapshot) -> Self {
        Self(Arc::new(RwLock::new(snapshot)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, JobSnapshot> {
        read(&self.0)
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> JobSnapshot {
        self.read().clone()
    }

    pub fn uuid(&self) -> String {
        self.read().uuid.clone()
    }

    /// Both handles refer to the same job object.
    pub fn same(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn store(&self, snapshot: JobSnapshot) {
        *write(&self.0) = snapshot;
    }
}

/// Jobs in the order the server listed them.
#[derive(Debug, Default)]
pub struct JobTable {
    order: Vec<JobHandle>,
    by_uuid: HashMap<String, JobHandle>,
}

impl JobTable {
    pub fn get(&self, uuid: &str) -> Option<&JobHandle> {
        self.by_uuid.get(uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobHandle> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Counts reported by [`JobRegistry::replace`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    table: Mutex<JobTable>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a consistent view of all jobs.
    pub fn with_jobs<R>(&self, f: impl FnOnce(&JobTable) -> R) -> R {
        f(&lock(&self.table))
    }

    pub fn get(&self, uuid: &str) -> Option<JobHandle> {
        self.with_jobs(|jobs| jobs.get(uuid).cloned())
    }

    /// Linear search by display name.
    pub fn find_by_name(&self, name: &str) -> Option<JobHandle> {
        self.with_jobs(|jobs| jobs.iter().find(|job| job.read().name == name).cloned())
    }

    /// All handles in server order.
    pub fn handles(&self) -> Vec<JobHandle> {
        self.with_jobs(|jobs| jobs.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.with_jobs(JobTable::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with_jobs(JobTable::is_empty)
    }

    /// Replace the whole mapping with a fresh job list.
    ///
    /// Known jobs are updated in place; a UUID listed twice keeps its first
    /// occurrence.
    pub fn replace(&self, snapshots: Vec<JobSnapshot>) -> ReplaceSummary {
        let current: HashMap<String, JobHandle> = self.with_jobs(|jobs| jobs.by_uuid.clone());
        let mut summary = ReplaceSummary::default();
        let mut next = JobTable::default();

        for snapshot in snapshots {
            if next.by_uuid.contains_key(&snapshot.uuid) {
                continue;
            }
            let uuid = snapshot.uuid.clone();
            let handle = match current.get(&uuid) {
                Some(handle) => {
                    handle.store(snapshot);
                    summary.updated += 1;
                    handle.clone()
                }
                None => {
                    summary.added += 1;
                    JobHandle::new(snapshot)
                }
            };
            next.order.push(handle.clone());
            next.by_uuid.insert(uuid, handle);
        }

        let kept: HashSet<&String> = next.by_uuid.keys().collect();
        summary.removed = current.keys().filter(|uuid| !kept.contains(uuid)).count();

        let previous = std::mem::replace(&mut *lock(&self.table), next);
        drop(previous);
        summary
    }

    /// Overwrite a single known job in place. Unknown jobs are ignored until
    /// the next full replace lists them.
    pub fn update(&self, snapshot: JobSnapshot) -> bool {
        match self.get(&snapshot.uuid) {
            Some(handle) => {
                handle.store(snapshot);
                true
            }
            None => false,
        }
    }
}
