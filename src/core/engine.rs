//! Consumer facing facade over the synchronization core.
//!
//! The engine owns the foreground half: it drains [`PollEvent`]s produced
//! by the background poller, reconciles the rendered rows against the
//! registry and notifies observers. Render-bound state (`rows`) is only
//! ever touched here, on the caller's task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::dispatcher::CommandDispatcher;
use super::models::{JobDetail, JobSnapshot, ScheduleEntry, ServerRunState};
use super::observers::{Notification, ObserverRegistry, SubscriptionId};
use super::poller::{PollError, PollEvent, Poller, PollerConfig};
use super::reconciler::{Reconciler, Row, RowDiff, SortKey};
use super::registry::JobHandle;
use super::state::SyncState;
use crate::channel::CommandChannel;

pub struct SyncEngine {
    poller: Poller,
    dispatcher: CommandDispatcher,
    events: mpsc::UnboundedReceiver<PollEvent>,
    reconciler: Reconciler,
    observers: ObserverRegistry,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), PollError>>>,
    fatal: Option<String>,
}

impl SyncEngine {
    pub fn new(channel: Arc<dyn CommandChannel>, config: PollerConfig, sort: SortKey) -> Self {
        let (poller, events) = Poller::new(channel.clone(), Arc::new(SyncState::new()), config);
        let dispatcher = CommandDispatcher::new(channel, poller.clone());
        Self {
            poller,
            dispatcher,
            events,
            reconciler: Reconciler::new(sort),
            observers: ObserverRegistry::new(),
            cancel: CancellationToken::new(),
            task: None,
            fatal: None,
        }
    }

    /// Start background polling.
    pub fn start(&mut self) -> Result<(), PollError> {
        let task = self.poller.start(self.cancel.clone())?;
        self.task = Some(task);
        Ok(())
    }

    /// Stop background polling and wait for the loop to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => debug!("Polling task finished"),
                Ok(Err(e)) => debug!(error = %e, "Polling task had already failed"),
                Err(e) => error!(error = %e, "Polling task panicked"),
            }
        }
    }

    /// Refresh everything now and apply the results.
    pub async fn refresh(&mut self) -> Result<(), PollError> {
        let result = self.poller.force_refresh().await;
        self.pump();
        result
    }

    /// Wait for the next poll event. `None` once the poller is gone.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    /// Apply every pending poll event. Returns whether anything was applied.
    pub fn pump(&mut self) -> bool {
        let mut applied = false;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied = true;
        }
        applied
    }

    /// Apply one poll event; returns the row changes it caused.
    pub fn apply(&mut self, event: PollEvent) -> Option<RowDiff> {
        match event {
            PollEvent::JobsRefreshed => Some(self.reconcile()),
            PollEvent::JobInfoRefreshed { uuid } => {
                let diff = self.reconcile();
                if self.poller.state().selected().as_deref() == Some(uuid.as_str()) {
                    if let Some(handle) = self.poller.state().registry().get(&uuid) {
                        self.observers.notify(&Notification::JobStateChanged {
                            job: handle.snapshot(),
                            detail: self.poller.state().detail(),
                        });
                    }
                }
                Some(diff)
            }
            PollEvent::RunStateChanged(_) | PollEvent::SchedulesRefreshed { .. } => None,
            PollEvent::Fatal(message) => {
                error!(error = %message, "Status synchronization stopped");
                self.fatal = Some(message);
                None
            }
        }
    }

    fn reconcile(&mut self) -> RowDiff {
        let handles = self.poller.state().registry().handles();
        let diff = self.reconciler.reconcile(&handles);
        if !diff.is_empty() {
            debug!(
                inserted = diff.inserted.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "Job rows reconciled"
            );
        }
        diff
    }

    /// Jobs in display order.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.reconciler
            .rows()
            .iter()
            .map(|row| row.snapshot.clone())
            .collect()
    }

    pub fn rows(&self) -> &[Row] {
        self.reconciler.rows()
    }

    pub fn sort_key(&self) -> SortKey {
        self.reconciler.sort_key()
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        info!(sort = %sort, "Sorting jobs");
        self.reconciler.set_sort(sort);
    }

    pub fn job(&self, uuid: &str) -> Option<JobHandle> {
        self.poller.state().registry().get(uuid)
    }

    pub fn job_by_name(&self, name: &str) -> Option<JobSnapshot> {
        self.poller
            .state()
            .registry()
            .find_by_name(name)
            .map(|handle| handle.snapshot())
    }

    /// Change the selected job. A new selection fetches its schedules and
    /// detail before returning.
    pub async fn select_job(&mut self, uuid: Option<String>) -> bool {
        if !self.poller.state().select(uuid.clone()) {
            return false;
        }
        debug!(job_uuid = ?uuid, "Selection changed");
        if uuid.is_some() {
            self.poller.refresh_schedules().await;
            self.poller.refresh_job_info().await;
        }
        self.pump();
        true
    }

    pub fn selected(&self) -> Option<String> {
        self.poller.state().selected()
    }

    /// Schedules of the selected job; empty when nothing is selected.
    pub fn schedule_entries(&self) -> Vec<ScheduleEntry> {
        self.poller.state().schedules()
    }

    pub fn selected_detail(&self) -> Option<JobDetail> {
        self.poller.state().detail()
    }

    pub fn subscribe_job_state_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn current_server_run_state(&self) -> ServerRunState {
        self.poller.state().run_state()
    }

    /// State text for a job row, taking the server run state into account.
    pub fn display_state(&self, job: &JobSnapshot) -> &'static str {
        job.display_state(self.current_server_run_state())
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Set once polling has terminated for good.
    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
