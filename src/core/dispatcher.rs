//! Job actions issued on behalf of the user.
//!
//! Every action targets the selected job (or the server, for pause and
//! suspend/continue), is sent exactly once and reports a structured error
//! carrying the action and job name. A successful action forces a refresh
//! before returning, so the caller sees its effect right away.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{ArchiveType, JobSnapshot, JobState, ServerRunState};
use super::poller::Poller;
use crate::channel::{ChannelError, Command, CommandChannel, DEBUG_LEVEL_COMMAND};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no job selected")]
    NoJobSelected,
    #[error("job '{job}' needs a crypt password")]
    PasswordRequired { job: String },
    #[error("invalid {name} '{}'", .value.escape_debug())]
    InvalidArgument { name: &'static str, value: String },
    #[error("cannot {action} job '{job}': {source}")]
    Command {
        action: &'static str,
        job: String,
        #[source]
        source: ChannelError,
    },
    #[error("cannot {action} server: {source}")]
    Server {
        action: &'static str,
        #[source]
        source: ChannelError,
    },
}

/// What an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Sent,
    /// Nothing to send (empty pause mask).
    Skipped,
}

/// Activities suspended by a pause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseModes {
    pub create: bool,
    pub storage: bool,
    pub restore: bool,
    pub index_update: bool,
    pub index_maintenance: bool,
}

impl PauseModes {
    pub fn all() -> Self {
        Self {
            create: true,
            storage: true,
            restore: true,
            index_update: true,
            index_maintenance: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_mask().is_empty()
    }

    /// Comma separated mode names in canonical order.
    pub fn to_mask(&self) -> String {
        [
            (self.create, "CREATE"),
            (self.storage, "STORAGE"),
            (self.restore, "RESTORE"),
            (self.index_update, "INDEX_UPDATE"),
            (self.index_maintenance, "INDEX_MAINTENANCE"),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| name)
        .collect::<Vec<_>>()
        .join(",")
    }
}

pub struct CommandDispatcher {
    channel: Arc<dyn CommandChannel>,
    poller: Poller,
}

impl CommandDispatcher {
    pub fn new(channel: Arc<dyn CommandChannel>, poller: Poller) -> Self {
        Self { channel, poller }
    }

    fn selected(&self) -> Result<JobSnapshot, DispatchError> {
        self.poller
            .state()
            .selected_job()
            .map(|handle| handle.snapshot())
            .ok_or(DispatchError::NoJobSelected)
    }

    /// Start the selected job.
    ///
    /// Jobs whose crypt password mode is `ask` are not started; the caller
    /// has to collect a password and use [`Self::start_with_password`].
    pub async fn start(
        &self,
        archive_type: ArchiveType,
        no_storage: bool,
        dry_run: bool,
    ) -> Result<Dispatched, DispatchError> {
        let job = self.selected()?;
        if job.needs_crypt_password() {
            return Err(DispatchError::PasswordRequired { job: job.name });
        }
        self.send_start(&job, archive_type, no_storage, dry_run)
            .await
    }

    /// Set the crypt password, then start the selected job. The job is not
    /// started if the password is rejected.
    pub async fn start_with_password(
        &self,
        archive_type: ArchiveType,
        no_storage: bool,
        dry_run: bool,
        password: &str,
    ) -> Result<Dispatched, DispatchError> {
        let job = self.selected()?;
        let encoded: String = password.bytes().map(|b| format!("{:02x}", b)).collect();
        let command = Command::new("CRYPT_PASSWORD")
            .arg("jobUUID", &job.uuid)
            .arg("encryptType", "NONE")
            .arg("encryptedPassword", encoded);
        self.execute("set crypt password for", &job, &command).await?;

        self.send_start(&job, archive_type, no_storage, dry_run)
            .await
    }

    async fn send_start(
        &self,
        job: &JobSnapshot,
        archive_type: ArchiveType,
        no_storage: bool,
        dry_run: bool,
    ) -> Result<Dispatched, DispatchError> {
        let command = Command::new("JOB_START")
            .arg("jobUUID", &job.uuid)
            .arg("archiveType", archive_type)
            .flag("noStorage", no_storage)
            .flag("dryRun", dry_run);
        self.execute("start", job, &command).await?;
        info!(job = %job.name, archive_type = %archive_type, dry_run, "Job started");
        self.refresh().await;
        Ok(Dispatched::Sent)
    }

    /// Aborting a running job should be confirmed by the user first.
    pub fn requires_confirmation(&self) -> bool {
        self.selected()
            .map(|job| job.state == JobState::Running)
            .unwrap_or(false)
    }

    pub async fn abort(&self) -> Result<Dispatched, DispatchError> {
        self.job_command("abort", "JOB_ABORT").await
    }

    pub async fn reset(&self) -> Result<Dispatched, DispatchError> {
        self.job_command("reset", "JOB_RESET").await
    }

    pub async fn load_volume(&self, number: u32) -> Result<Dispatched, DispatchError> {
        let job = self.selected()?;
        let command = Command::new("VOLUME_LOAD")
            .arg("jobUUID", &job.uuid)
            .arg("volumeNumber", number);
        self.execute("load volume for", &job, &command).await?;
        self.refresh().await;
        Ok(Dispatched::Sent)
    }

    pub async fn unload_volume(&self) -> Result<Dispatched, DispatchError> {
        self.job_command("unload volume for", "VOLUME_UNLOAD").await
    }

    pub async fn trigger_schedule(&self, schedule_uuid: &str) -> Result<Dispatched, DispatchError> {
        token("schedule UUID", schedule_uuid)?;
        let job = self.selected()?;
        let command = Command::new("SCHEDULE_TRIGGER")
            .arg("jobUUID", &job.uuid)
            .arg("scheduleUUID", schedule_uuid);
        self.execute("trigger schedule of", &job, &command).await?;
        self.refresh().await;
        Ok(Dispatched::Sent)
    }

    /// Pause the server for `seconds`. An empty mode set sends nothing.
    pub async fn pause(&self, seconds: u64, modes: PauseModes) -> Result<Dispatched, DispatchError> {
        if modes.is_empty() {
            debug!("Pause without modes, nothing to send");
            return Ok(Dispatched::Skipped);
        }
        let command = Command::new("PAUSE")
            .arg("time", seconds)
            .arg("modeMask", modes.to_mask());
        self.execute_server("pause", &command).await?;
        info!(seconds, modes = %modes.to_mask(), "Server paused");
        self.refresh().await;
        Ok(Dispatched::Sent)
    }

    /// Suspend a running server, continue a paused or suspended one.
    ///
    /// Decided on the last polled run state. A tick landing between the
    /// read and the command can make this act on a stale state; the next
    /// tick shows the actual state again.
    pub async fn suspend_or_continue(&self) -> Result<ServerRunState, DispatchError> {
        let current = self.poller.state().run_state();
        let (action, command, target) = match current {
            ServerRunState::Running => ("suspend", "SUSPEND", ServerRunState::Suspended),
            ServerRunState::Paused { .. } | ServerRunState::Suspended => {
                ("continue", "CONTINUE", ServerRunState::Running)
            }
        };
        self.execute_server(action, &Command::new(command)).await?;
        info!(state = %target.label(), "Server run state requested");
        self.refresh().await;
        Ok(target)
    }

    async fn job_command(
        &self,
        action: &'static str,
        name: &'static str,
    ) -> Result<Dispatched, DispatchError> {
        let job = self.selected()?;
        let command = Command::new(name).arg("jobUUID", &job.uuid);
        self.execute(action, &job, &command).await?;
        self.refresh().await;
        Ok(Dispatched::Sent)
    }

    async fn execute(
        &self,
        action: &'static str,
        job: &JobSnapshot,
        command: &Command,
    ) -> Result<(), DispatchError> {
        debug!(action, job = %job.name, command = %command.name(), "Dispatching");
        self.channel
            .execute(command, DEBUG_LEVEL_COMMAND)
            .await
            .map(|_| ())
            .map_err(|source| {
                warn!(action, job = %job.name, error = %source, "Command failed");
                DispatchError::Command {
                    action,
                    job: job.name.clone(),
                    source,
                }
            })
    }

    async fn execute_server(&self, action: &'static str, command: &Command) -> Result<(), DispatchError> {
        debug!(action, command = %command.name(), "Dispatching");
        self.channel
            .execute(command, DEBUG_LEVEL_COMMAND)
            .await
            .map(|_| ())
            .map_err(|source| {
                warn!(action, error = %source, "Command failed");
                DispatchError::Server { action, source }
            })
    }

    // A fatal error here still reaches the engine as `PollEvent::Fatal`.
    async fn refresh(&self) {
        if let Err(e) = self.poller.force_refresh().await {
            warn!(error = %e, "Refresh after command failed");
        }
    }
}

/// Arguments go on the request line bare, so user input must be a single
/// token.
fn token(name: &'static str, value: &str) -> Result<(), DispatchError> {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DispatchError::InvalidArgument {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}
