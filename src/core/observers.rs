//! Observer registry for selected-job updates.
//!
//! Consumers register a callback and receive a [`Notification`] each time
//! the selected job's detail is refreshed. Notification iterates over a copy
//! of the listener list taken when the pass starts, so callbacks may
//! subscribe or unsubscribe (including themselves) while being notified;
//! such changes take effect from the next pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::lock;
use super::models::{JobDetail, JobSnapshot};

/// Payload delivered to observers.
#[derive(Debug, Clone)]
pub enum Notification {
    JobStateChanged {
        job: JobSnapshot,
        detail: Option<JobDetail>,
    },
}

/// Token returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
pub struct ObserverRegistry {
    listeners: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener registered when the pass starts, in
    /// registration order.
    pub fn notify(&self, notification: &Notification) {
        let listeners: Vec<Callback> = lock(&self.listeners)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in listeners {
            callback(notification);
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
