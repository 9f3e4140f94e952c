//! Periodic status synchronization.
//!
//! The poller runs on its own tokio task. Every tick it refreshes, in this
//! order: the full job list (every Nth tick only), the server run state,
//! and the selected job's status and detail. Results are written to the
//! shared [`SyncState`] and announced as [`PollEvent`]s; the foreground
//! applies them to its render state (see [`SyncEngine::pump`]).
//!
//! Each kind of refresh has an in-flight flag. A request for a refresh that
//! is already running is dropped, not queued: every refresh fetches a full
//! snapshot, so the running one already covers it.
//!
//! Failure policy: job list, job detail and schedule refreshes absorb all
//! errors and try again next tick. Run-state refresh tolerates a configured
//! number of consecutive failures; the next one is fatal, whether it comes
//! from a tick or a forced refresh. A fatal poller emits
//! [`PollEvent::Fatal`] once, ends the loop and refuses further refreshes.
//!
//! [`SyncEngine::pump`]: super::engine::SyncEngine::pump

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::{JobDetail, JobSnapshot, ScheduleEntry, ServerRunState};
use super::state::SyncState;
use crate::channel::{ChannelError, Command, CommandChannel, DEBUG_LEVEL_POLL};
use crate::logging::LogThrottle;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Refresh the full job list on every Nth tick.
    pub job_list_every: u32,
    /// Consecutive run-state failures tolerated before giving up.
    pub run_state_failure_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            job_list_every: 10,
            run_state_failure_threshold: 5,
        }
    }
}

/// Announcement of fresh data in [`SyncState`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    JobsRefreshed,
    RunStateChanged(ServerRunState),
    JobInfoRefreshed { uuid: String },
    SchedulesRefreshed { uuid: String },
    /// The loop has terminated.
    Fatal(String),
}

/// Result of a single refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Another refresh of the same kind was in flight.
    Coalesced,
    /// Nothing to refresh (no job selected).
    Skipped,
    /// The server call failed and the error was absorbed.
    Failed,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("lost server run state after {failures} consecutive failures: {source}")]
    RunStateLost {
        failures: u32,
        #[source]
        source: ChannelError,
    },
    #[error("poller already started")]
    AlreadyStarted,
    #[error("polling stopped after a fatal error")]
    Terminated,
}

/// Clears an in-flight flag when the refresh ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    channel: Arc<dyn CommandChannel>,
    state: Arc<SyncState>,
    config: PollerConfig,
    events: mpsc::UnboundedSender<PollEvent>,
    job_list_busy: AtomicBool,
    run_state_busy: AtomicBool,
    job_info_busy: AtomicBool,
    schedules_busy: AtomicBool,
    run_state_failures: AtomicU32,
    started: AtomicBool,
    terminated: AtomicBool,
    failure_log: LogThrottle,
}

/// Cloneable handle to the poller; all clones share in-flight flags.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

impl Poller {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        state: Arc<SyncState>,
        config: PollerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let failure_log = LogThrottle::new(Duration::from_secs(30));
        let inner = Inner {
            channel,
            state,
            config,
            events,
            job_list_busy: AtomicBool::new(false),
            run_state_busy: AtomicBool::new(false),
            job_info_busy: AtomicBool::new(false),
            schedules_busy: AtomicBool::new(false),
            run_state_failures: AtomicU32::new(0),
            started: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            failure_log,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.inner.state
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Whether a fatal error has stopped polling for good.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Spawn the polling loop. Calling this twice is a programming error
    /// and returns [`PollError::AlreadyStarted`].
    pub fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<(), PollError>>, PollError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PollError::AlreadyStarted);
        }
        let poller = self.clone();
        Ok(tokio::spawn(async move { poller.run(cancel).await }))
    }

    async fn run(self, cancel: CancellationToken) -> Result<(), PollError> {
        let config = &self.inner.config;
        info!(
            interval_ms = config.interval.as_millis() as u64,
            job_list_every = config.job_list_every,
            "Poller started"
        );

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let every = u64::from(config.job_list_every.max(1));
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Poller stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.tick(tick % every == 0).await {
                Ok(()) => {}
                Err(PollError::Terminated) => {
                    info!("Poller stopped after a fatal error");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            tick = tick.wrapping_add(1);
        }
    }

    /// One poll cycle.
    pub async fn tick(&self, include_job_list: bool) -> Result<(), PollError> {
        if self.is_terminated() {
            return Err(PollError::Terminated);
        }
        if include_job_list {
            self.refresh_job_list().await;
        }
        self.refresh_run_state().await?;
        self.refresh_job_info().await;
        Ok(())
    }

    /// Out-of-cycle refresh of everything, used after a command changed
    /// server state.
    pub async fn force_refresh(&self) -> Result<(), PollError> {
        self.tick(true).await
    }

    pub async fn refresh_job_list(&self) -> RefreshOutcome {
        let Some(_busy) = InFlight::acquire(&self.inner.job_list_busy) else {
            debug!("Job list refresh already in flight");
            return RefreshOutcome::Coalesced;
        };

        let mut jobs = Vec::new();
        let result = self
            .inner
            .channel
            .execute_rows(&Command::new("JOB_LIST"), DEBUG_LEVEL_POLL, &mut |values| {
                match JobSnapshot::from_values(&values) {
                    Ok(job) => jobs.push(job),
                    Err(e) => debug!(error = %e, "Skipping malformed job row"),
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.inner.failure_log.reset();
                let summary = self.inner.state.registry().replace(jobs);
                debug!(
                    added = summary.added,
                    updated = summary.updated,
                    removed = summary.removed,
                    "Job list refreshed"
                );
                self.emit(PollEvent::JobsRefreshed);
                RefreshOutcome::Updated
            }
            Err(e) => {
                self.absorb("job list", &e);
                RefreshOutcome::Failed
            }
        }
    }

    pub async fn refresh_run_state(&self) -> Result<RefreshOutcome, PollError> {
        if self.is_terminated() {
            return Err(PollError::Terminated);
        }
        let Some(_busy) = InFlight::acquire(&self.inner.run_state_busy) else {
            return Ok(RefreshOutcome::Coalesced);
        };

        let result = self
            .inner
            .channel
            .execute(&Command::new("STATUS"), DEBUG_LEVEL_POLL)
            .await
            .and_then(|values| ServerRunState::from_values(&values));

        match result {
            Ok(run_state) => {
                self.inner.run_state_failures.store(0, Ordering::Release);
                if self.inner.state.set_run_state(run_state) {
                    debug!(state = %run_state.label(), "Server run state changed");
                    self.emit(PollEvent::RunStateChanged(run_state));
                }
                Ok(RefreshOutcome::Updated)
            }
            Err(e) => {
                let failures = self.inner.run_state_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let threshold = self.inner.config.run_state_failure_threshold;
                if failures > threshold {
                    return Err(self.terminate(PollError::RunStateLost {
                        failures,
                        source: e,
                    }));
                }
                warn!(failures, threshold, error = %e, "Server run state refresh failed");
                Ok(RefreshOutcome::Failed)
            }
        }
    }

    /// Refresh the selected job's row and its live detail.
    pub async fn refresh_job_info(&self) -> RefreshOutcome {
        let Some(uuid) = self.inner.state.selected() else {
            return RefreshOutcome::Skipped;
        };
        let Some(_busy) = InFlight::acquire(&self.inner.job_info_busy) else {
            return RefreshOutcome::Coalesced;
        };

        let status = Command::new("JOB_STATUS").arg("jobUUID", &uuid);
        match self
            .inner
            .channel
            .execute(&status, DEBUG_LEVEL_POLL)
            .await
            .and_then(|values| JobSnapshot::from_values(&values))
        {
            Ok(job) if job.uuid == uuid => {
                self.inner.state.registry().update(job);
            }
            Ok(job) => debug!(expected = %uuid, got = %job.uuid, "Ignoring status of other job"),
            Err(e) => {
                self.absorb("job status", &e);
                return RefreshOutcome::Failed;
            }
        }

        let info = Command::new("JOB_INFO").arg("jobUUID", &uuid);
        match self.inner.channel.execute(&info, DEBUG_LEVEL_POLL).await {
            Ok(values) => {
                let detail = JobDetail::from_values(&uuid, &values);
                if self.inner.state.set_detail(detail) {
                    self.emit(PollEvent::JobInfoRefreshed { uuid });
                    RefreshOutcome::Updated
                } else {
                    debug!(job_uuid = %uuid, "Selection changed, dropping job detail");
                    RefreshOutcome::Skipped
                }
            }
            Err(e) => {
                self.absorb("job detail", &e);
                RefreshOutcome::Failed
            }
        }
    }

    /// Fetch the schedule list of the selected job.
    pub async fn refresh_schedules(&self) -> RefreshOutcome {
        let Some(uuid) = self.inner.state.selected() else {
            return RefreshOutcome::Skipped;
        };
        let Some(_busy) = InFlight::acquire(&self.inner.schedules_busy) else {
            return RefreshOutcome::Coalesced;
        };

        let mut schedules = Vec::new();
        let command = Command::new("SCHEDULE_LIST").arg("jobUUID", &uuid);
        let result = self
            .inner
            .channel
            .execute_rows(&command, DEBUG_LEVEL_POLL, &mut |values| {
                match ScheduleEntry::from_values(&values) {
                    Ok(schedule) => schedules.push(schedule),
                    Err(e) => debug!(error = %e, "Skipping malformed schedule row"),
                }
            })
            .await;

        match result {
            Ok(()) if self.inner.state.set_schedules(&uuid, schedules) => {
                self.emit(PollEvent::SchedulesRefreshed { uuid });
                RefreshOutcome::Updated
            }
            Ok(()) => RefreshOutcome::Skipped,
            Err(e) => {
                self.absorb("schedule list", &e);
                RefreshOutcome::Failed
            }
        }
    }

    /// Stop polling for good. Only the first fatal error is announced.
    fn terminate(&self, e: PollError) -> PollError {
        if !self.inner.terminated.swap(true, Ordering::AcqRel) {
            error!(error = %e, "Polling terminated");
            self.emit(PollEvent::Fatal(e.to_string()));
        }
        e
    }

    fn emit(&self, event: PollEvent) {
        // Nobody listening is fine for one-shot callers.
        let _ = self.inner.events.send(event);
    }

    fn absorb(&self, what: &str, error: &ChannelError) {
        if self.inner.failure_log.should_log() {
            warn!(what, error = %error, "Polling failed, retrying next tick");
        } else {
            debug!(what, error = %error, "Polling failed, retrying next tick");
        }
    }
}
