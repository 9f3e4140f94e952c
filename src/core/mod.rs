pub mod dispatcher;
pub mod engine;
pub mod models;
pub mod observers;
pub mod poller;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod values;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use dispatcher::{CommandDispatcher, DispatchError, Dispatched, PauseModes};
pub use engine::SyncEngine;
pub use models::{
    ArchiveType, JobDetail, JobSnapshot, JobState, PresentationHint, ScheduleEntry,
    ServerRunState, SlaveState,
};
pub use observers::{Notification, ObserverRegistry, SubscriptionId};
pub use poller::{PollError, PollEvent, Poller, PollerConfig, RefreshOutcome};
pub use reconciler::{Reconciler, Row, RowDiff, SortKey};
pub use registry::{JobHandle, JobRegistry};
pub use state::SyncState;
pub use values::ValueMap;

// A panicking observer must not take the dashboard down with it, so
// poisoned locks are recovered rather than propagated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
