//! In-process server used by tests and `--simulation`.
//!
//! Holds a job table in memory and answers the same commands the real
//! server does. Responses are rendered as result lines and decoded through
//! the regular codec, so what callers see is exactly what the TCP channel
//! would hand them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use super::protocol::{ResultLine, quote};
use super::{ChannelError, Command, CommandChannel};
use crate::core::lock;
use crate::core::models::{
    ArchiveType, JobSnapshot, JobState, PresentationHint, ScheduleEntry, ServerRunState, SlaveState,
};
use crate::core::values::ValueMap;

const ENTRIES_PER_STEP: u64 = 25;
const ENTRY_SIZE: u64 = 64 * 1024;

struct SimJob {
    snapshot: JobSnapshot,
    done_count: u64,
    total_count: u64,
    volume_number: u32,
    requested_volume: u32,
    crypt_password: Option<String>,
    schedules: Vec<ScheduleEntry>,
    /// Fields reported by `JOB_INFO` in place of the computed ones.
    detail_overrides: Vec<(String, String)>,
}

impl SimJob {
    fn new(snapshot: JobSnapshot) -> Self {
        Self {
            snapshot,
            done_count: 0,
            total_count: 400,
            volume_number: 0,
            requested_volume: 0,
            crypt_password: None,
            schedules: Vec::new(),
            detail_overrides: Vec::new(),
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.snapshot.state,
            JobState::Running | JobState::NoStorage | JobState::DryRunning
        )
    }

    fn advance(&mut self) {
        if !self.is_active() {
            return;
        }
        self.done_count = (self.done_count + ENTRIES_PER_STEP).min(self.total_count);
        let remaining = self.total_count - self.done_count;
        self.snapshot.estimated_rest_seconds = remaining / ENTRIES_PER_STEP;
        if remaining == 0 {
            self.snapshot.state = JobState::Done;
            self.snapshot.last_executed_at = chrono::Utc::now().timestamp();
        }
    }

    fn start(&mut self, archive_type: ArchiveType, no_storage: bool, dry_run: bool) {
        self.snapshot.archive_type = archive_type;
        self.snapshot.state = if dry_run {
            JobState::DryRunning
        } else if no_storage {
            JobState::NoStorage
        } else {
            JobState::Running
        };
        self.done_count = 0;
        self.volume_number = 0;
        self.requested_volume = 0;
        self.snapshot.estimated_rest_seconds = self.total_count / ENTRIES_PER_STEP;
    }
}

#[derive(Default)]
struct Sim {
    jobs: Vec<SimJob>,
    run_state: ServerRunState,
    offline: bool,
    failures: HashMap<String, (u32, ChannelError)>,
    commands: Vec<String>,
}

/// Outcome of handling one command: result rows or an error line.
type Reply = Result<Vec<String>, (u32, String)>;

impl Sim {
    fn job_mut(&mut self, command: &Command) -> Result<&mut SimJob, (u32, String)> {
        let uuid = command.get("jobUUID").unwrap_or_default();
        self.jobs
            .iter_mut()
            .find(|job| job.snapshot.uuid == uuid)
            .ok_or_else(|| (10, uuid.to_string()))
    }

    fn take_failure(&mut self, name: &str) -> Option<ChannelError> {
        let (remaining, error) = self.failures.get_mut(name)?;
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            self.failures.remove(name);
        }
        Some(error)
    }

    fn handle(&mut self, command: &Command) -> Reply {
        match command.name() {
            "JOB_LIST" => Ok(self.jobs.iter().map(|job| job_row(&job.snapshot)).collect()),
            "STATUS" => {
                self.tick_run_state();
                if self.run_state == ServerRunState::Running {
                    self.jobs.iter_mut().for_each(SimJob::advance);
                }
                Ok(vec![run_state_row(self.run_state)])
            }
            "JOB_STATUS" => {
                let job = self.job_mut(command)?;
                Ok(vec![job_row(&job.snapshot)])
            }
            "JOB_INFO" => {
                let running = self.run_state == ServerRunState::Running;
                let job = self.job_mut(command)?;
                if running {
                    job.advance();
                }
                Ok(vec![detail_row(job)])
            }
            "SCHEDULE_LIST" => {
                let job = self.job_mut(command)?;
                Ok(job.schedules.iter().map(schedule_row).collect())
            }
            "SCHEDULE_TRIGGER" => {
                let schedule_uuid = command.get("scheduleUUID").unwrap_or_default().to_string();
                let job = self.job_mut(command)?;
                let archive_type = job
                    .schedules
                    .iter()
                    .find(|s| s.uuid == schedule_uuid)
                    .map(|s| s.archive_type)
                    .ok_or((13, schedule_uuid))?;
                if job.is_active() {
                    return Err((11, job.snapshot.name.clone()));
                }
                job.start(archive_type, false, false);
                Ok(Vec::new())
            }
            "JOB_START" => {
                let archive_type = command
                    .get("archiveType")
                    .unwrap_or("normal")
                    .parse::<ArchiveType>()
                    .map_err(|e| (3, e))?;
                let no_storage = command.get("noStorage") == Some("yes");
                let dry_run = command.get("dryRun") == Some("yes");
                let job = self.job_mut(command)?;
                if job.is_active() {
                    return Err((11, job.snapshot.name.clone()));
                }
                if job.snapshot.needs_crypt_password() && job.crypt_password.is_none() {
                    return Err((15, job.snapshot.name.clone()));
                }
                job.start(archive_type, no_storage, dry_run);
                Ok(Vec::new())
            }
            "JOB_ABORT" => {
                let job = self.job_mut(command)?;
                if !matches!(
                    job.snapshot.hint(),
                    PresentationHint::Active | PresentationHint::NeedsAttention
                ) {
                    return Err((12, job.snapshot.name.clone()));
                }
                job.snapshot.state = JobState::Aborted;
                job.snapshot.estimated_rest_seconds = 0;
                Ok(Vec::new())
            }
            "JOB_RESET" => {
                let job = self.job_mut(command)?;
                if job.is_active() {
                    return Err((11, job.snapshot.name.clone()));
                }
                job.snapshot.state = JobState::None;
                job.done_count = 0;
                job.crypt_password = None;
                Ok(Vec::new())
            }
            "PAUSE" => {
                let time = command
                    .get("time")
                    .and_then(|t| t.parse::<u64>().ok())
                    .ok_or((3, "time".to_string()))?;
                if command.get("modeMask").unwrap_or_default().is_empty() {
                    return Err((3, "modeMask".to_string()));
                }
                self.run_state = ServerRunState::Paused {
                    remaining_secs: time,
                };
                Ok(Vec::new())
            }
            "SUSPEND" => {
                self.run_state = ServerRunState::Suspended;
                Ok(Vec::new())
            }
            "CONTINUE" => {
                self.run_state = ServerRunState::Running;
                Ok(Vec::new())
            }
            "VOLUME_LOAD" => {
                let number = command
                    .get("volumeNumber")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or((3, "volumeNumber".to_string()))?;
                let job = self.job_mut(command)?;
                if job.snapshot.state != JobState::RequestVolume || number != job.requested_volume {
                    return Err((16, format!("volume {}", number)));
                }
                job.volume_number = number;
                job.snapshot.state = JobState::Running;
                Ok(Vec::new())
            }
            "VOLUME_UNLOAD" => {
                let job = self.job_mut(command)?;
                if job.is_active() {
                    job.requested_volume = job.volume_number + 1;
                    job.snapshot.state = JobState::RequestVolume;
                }
                Ok(Vec::new())
            }
            "CRYPT_PASSWORD" => {
                if command.get("encryptType") != Some("NONE") {
                    return Err((3, "encryptType".to_string()));
                }
                let password = command
                    .get("encryptedPassword")
                    .and_then(decode_hex)
                    .filter(|p| !p.is_empty())
                    .ok_or((14, String::new()))?;
                let job = self.job_mut(command)?;
                job.crypt_password = Some(password);
                if job.snapshot.state == JobState::RequestCryptPassword {
                    job.snapshot.state = JobState::Running;
                }
                Ok(Vec::new())
            }
            other => Err((2, other.to_string())),
        }
    }

    fn tick_run_state(&mut self) {
        if let ServerRunState::Paused { remaining_secs } = self.run_state {
            self.run_state = match remaining_secs.saturating_sub(1) {
                0 => ServerRunState::Running,
                remaining_secs => ServerRunState::Paused { remaining_secs },
            };
        }
    }
}

/// Render a value for result data, quoting only when needed.
fn value(v: &str) -> String {
    if v.is_empty() || v.contains([' ', '\'', '"', '\\', '=']) {
        quote(v)
    } else {
        v.to_string()
    }
}

fn row<'a>(fields: impl IntoIterator<Item = (&'a str, String)>) -> String {
    fields
        .into_iter()
        .map(|(key, v)| format!("{}={}", key, value(&v)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn yes_no(b: bool) -> String {
    let text = if b { "yes" } else { "no" };
    text.to_string()
}

fn job_row(job: &JobSnapshot) -> String {
    row([
        ("jobUUID", job.uuid.clone()),
        ("master", job.master_name.clone()),
        ("name", job.name.clone()),
        ("state", job.state.wire_name().to_string()),
        ("slaveHostName", job.slave_host.name.clone()),
        ("slaveHostPort", job.slave_host.port.to_string()),
        ("slaveState", job.slave_state.wire_name().to_string()),
        ("slaveTLS", yes_no(job.slave_secure)),
        ("archiveType", job.archive_type.as_str().to_string()),
        ("archivePartSize", job.archive_part_size.to_string()),
        ("deltaCompressAlgorithm", job.delta_compress_algorithm.clone()),
        ("byteCompressAlgorithm", job.byte_compress_algorithm.clone()),
        ("cryptAlgorithm", job.crypt_algorithm.clone()),
        ("cryptType", job.crypt_type.clone()),
        ("cryptPasswordMode", job.crypt_password_mode.clone()),
        ("lastExecutedDateTime", job.last_executed_at.to_string()),
        ("estimatedRestTime", job.estimated_rest_seconds.to_string()),
    ])
}

fn run_state_row(state: ServerRunState) -> String {
    match state {
        ServerRunState::Running => "state=running".to_string(),
        ServerRunState::Paused { remaining_secs } => {
            format!("state=pause time={}", remaining_secs)
        }
        ServerRunState::Suspended => "state=suspended".to_string(),
    }
}

fn detail_row(job: &SimJob) -> String {
    let done_size = job.done_count * ENTRY_SIZE;
    let total_size = job.total_count * ENTRY_SIZE;
    let active = job.is_active();
    let rate = |per_step: u64| if active { per_step.to_string() } else { "0".to_string() };
    let entry_name = if active {
        format!("/home/user/file-{:04}.dat", job.done_count)
    } else {
        String::new()
    };

    let mut fields: Vec<(String, String)> = [
        ("state", job.snapshot.state.wire_name().to_string()),
        ("message", String::new()),
        ("doneCount", job.done_count.to_string()),
        ("doneSize", done_size.to_string()),
        ("totalEntryCount", job.total_count.to_string()),
        ("totalEntrySize", total_size.to_string()),
        ("collectTotalSumDone", "yes".to_string()),
        ("skippedEntryCount", "0".to_string()),
        ("skippedEntrySize", "0".to_string()),
        ("errorEntryCount", "0".to_string()),
        ("errorEntrySize", "0".to_string()),
        ("entriesPerSecond", rate(ENTRIES_PER_STEP)),
        ("bytesPerSecond", rate(ENTRIES_PER_STEP * ENTRY_SIZE)),
        ("storageBytesPerSecond", rate(ENTRIES_PER_STEP * ENTRY_SIZE / 2)),
        ("archiveSize", (done_size / 2).to_string()),
        ("compressionRatio", (if done_size > 0 { "50.0" } else { "0" }).to_string()),
        ("estimatedRestTime", job.snapshot.estimated_rest_seconds.to_string()),
        ("entryName", entry_name),
        ("entryDoneSize", (ENTRY_SIZE / 2).to_string()),
        ("entryTotalSize", ENTRY_SIZE.to_string()),
        ("storageName", format!("/backup/{}.bar", job.snapshot.name)),
        ("storageDoneSize", (done_size / 2).to_string()),
        ("storageTotalSize", (total_size / 2).to_string()),
        ("volumeNumber", job.volume_number.to_string()),
        ("volumeProgress", "0".to_string()),
        ("requestedVolumeNumber", job.requested_volume.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (key, v) in &job.detail_overrides {
        match fields.iter_mut().find(|(k, _)| k == key) {
            Some(field) => field.1 = v.clone(),
            None => fields.push((key.clone(), v.clone())),
        }
    }
    row(fields.iter().map(|(k, v)| (k.as_str(), v.clone())))
}

fn schedule_row(schedule: &ScheduleEntry) -> String {
    row([
        ("scheduleUUID", schedule.uuid.clone()),
        ("date", schedule.date_text()),
        ("weekDays", schedule.week_days_text()),
        ("time", schedule.time_text()),
        ("archiveType", schedule.archive_type.as_str().to_string()),
    ])
}

fn decode_hex(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// In-memory stand-in for the backup server.
pub struct SimulatedServer {
    sim: Mutex<Sim>,
    next_id: AtomicU64,
    debug_level: u8,
}

impl Default for SimulatedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedServer {
    /// An empty server in the running state.
    pub fn new() -> Self {
        Self {
            sim: Mutex::new(Sim::default()),
            next_id: AtomicU64::new(1),
            debug_level: 0,
        }
    }

    /// A server seeded with a few demo jobs.
    pub fn demo() -> Self {
        let server = Self::new();

        let home = server.create_job("home", JobState::Waiting);
        server.update_job(&home, |job| {
            job.archive_part_size = 512 * 1024 * 1024;
            job.byte_compress_algorithm = "zstd6".to_string();
            job.crypt_algorithm = "AES256".to_string();
            job.crypt_type = "SYMMETRIC".to_string();
            job.crypt_password_mode = "ask".to_string();
            job.last_executed_at = chrono::Utc::now().timestamp() - 86_400;
        });
        server.add_schedule(
            &home,
            ScheduleEntry {
                uuid: Uuid::now_v7().to_string(),
                year: None,
                month: None,
                day: None,
                week_days: Some(0b001_1111),
                hour: Some(22),
                minute: Some(0),
                archive_type: ArchiveType::Incremental,
            },
        );
        server.add_schedule(
            &home,
            ScheduleEntry {
                uuid: Uuid::now_v7().to_string(),
                year: None,
                month: None,
                day: Some(1),
                week_days: None,
                hour: Some(3),
                minute: Some(30),
                archive_type: ArchiveType::Full,
            },
        );

        let projects = server.create_job("projects", JobState::Running);
        server.update_job(&projects, |job| {
            job.delta_compress_algorithm = "xdelta9".to_string();
            job.byte_compress_algorithm = "lzma9".to_string();
            job.archive_type = ArchiveType::Differential;
        });

        let mail = server.create_job("mail", JobState::Error);
        server.update_job(&mail, |job| {
            job.crypt_algorithm = "AES256".to_string();
            job.crypt_type = "ASYMMETRIC".to_string();
            job.slave_host.name = "mailhost".to_string();
            job.slave_host.port = 38523;
            job.slave_state = SlaveState::Online;
        });

        server.create_job("media", JobState::Done);
        server
    }

    pub fn with_debug_level(mut self, debug_level: u8) -> Self {
        self.debug_level = debug_level;
        self
    }

    /// Add a job with a generated UUID, returning the UUID.
    pub fn create_job(&self, name: &str, state: JobState) -> String {
        let uuid = Uuid::now_v7().to_string();
        self.add_job(&uuid, name, state);
        uuid
    }

    pub fn add_job(&self, uuid: &str, name: &str, state: JobState) {
        let snapshot = JobSnapshot {
            uuid: uuid.to_string(),
            name: name.to_string(),
            state,
            delta_compress_algorithm: "none".to_string(),
            byte_compress_algorithm: "none".to_string(),
            crypt_algorithm: "none".to_string(),
            crypt_type: "none".to_string(),
            crypt_password_mode: "default".to_string(),
            ..Default::default()
        };
        lock(&self.sim).jobs.push(SimJob::new(snapshot));
    }

    /// Modify a job in place. Returns false for unknown jobs.
    pub fn update_job(&self, uuid: &str, f: impl FnOnce(&mut JobSnapshot)) -> bool {
        let mut sim = lock(&self.sim);
        match sim.jobs.iter_mut().find(|job| job.snapshot.uuid == uuid) {
            Some(job) => {
                f(&mut job.snapshot);
                true
            }
            None => false,
        }
    }

    pub fn remove_job(&self, uuid: &str) -> bool {
        let mut sim = lock(&self.sim);
        let before = sim.jobs.len();
        sim.jobs.retain(|job| job.snapshot.uuid != uuid);
        sim.jobs.len() != before
    }

    pub fn job(&self, uuid: &str) -> Option<JobSnapshot> {
        lock(&self.sim)
            .jobs
            .iter()
            .find(|job| job.snapshot.uuid == uuid)
            .map(|job| job.snapshot.clone())
    }

    /// Report these `JOB_INFO` fields for the job instead of the computed
    /// ones.
    pub fn set_detail(&self, uuid: &str, fields: &[(&str, &str)]) {
        let mut sim = lock(&self.sim);
        if let Some(job) = sim.jobs.iter_mut().find(|job| job.snapshot.uuid == uuid) {
            job.detail_overrides = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
    }

    pub fn add_schedule(&self, uuid: &str, schedule: ScheduleEntry) {
        let mut sim = lock(&self.sim);
        if let Some(job) = sim.jobs.iter_mut().find(|job| job.snapshot.uuid == uuid) {
            job.schedules.push(schedule);
        }
    }

    /// Crypt password last set for the job.
    pub fn crypt_password(&self, uuid: &str) -> Option<String> {
        lock(&self.sim)
            .jobs
            .iter()
            .find(|job| job.snapshot.uuid == uuid)
            .and_then(|job| job.crypt_password.clone())
    }

    pub fn run_state(&self) -> ServerRunState {
        lock(&self.sim).run_state
    }

    pub fn set_run_state(&self, state: ServerRunState) {
        lock(&self.sim).run_state = state;
    }

    /// While offline every command fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.sim).offline = offline;
    }

    /// Fail the next `times` commands named `name` with `error`.
    pub fn fail_next(&self, name: &str, times: u32, error: ChannelError) {
        if times > 0 {
            lock(&self.sim)
                .failures
                .insert(name.to_string(), (times, error));
        }
    }

    /// Text of every command received, oldest first.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.sim).commands.clone()
    }

    /// Number of commands received with this name.
    pub fn count(&self, name: &str) -> usize {
        lock(&self.sim)
            .commands
            .iter()
            .filter(|c| c.split(' ').next() == Some(name))
            .count()
    }

    pub fn clear_commands(&self) {
        lock(&self.sim).commands.clear();
    }

    fn respond(&self, command: &Command) -> Result<Vec<String>, ChannelError> {
        let mut sim = lock(&self.sim);
        sim.commands.push(command.to_string());
        if sim.offline {
            return Err(ChannelError::Connection(
                "simulated server offline".to_string(),
            ));
        }
        if let Some(error) = sim.take_failure(command.name()) {
            return Err(error);
        }
        sim.handle(command).map_err(|(code, message)| {
            let data = format!("errno=0 message={}", quote(&message));
            ResultLine {
                id: 0,
                completed: true,
                code,
                data,
            }
            .into_error()
        })
    }
}

#[async_trait]
impl CommandChannel for SimulatedServer {
    async fn execute_rows(
        &self,
        command: &Command,
        debug_level: u8,
        on_row: &mut (dyn FnMut(ValueMap) + Send),
    ) -> Result<(), ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if debug_level <= self.debug_level {
            debug!(id, command = %command, "Simulated command");
        } else {
            trace!(id, command = %command, "Simulated command");
        }

        let rows = self.respond(command)?;
        for data in rows {
            let line = ResultLine {
                id,
                completed: false,
                code: 0,
                data,
            }
            .encode();
            let result = ResultLine::parse(&line)?;
            on_row(ValueMap::parse(&result.data)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_list_decodes_through_codec() {
        let server = SimulatedServer::new();
        server.add_job("abc", "my home", JobState::Waiting);

        let mut rows = Vec::new();
        server
            .execute_rows(&Command::new("JOB_LIST"), 0, &mut |values| rows.push(values))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let job = JobSnapshot::from_values(&rows[0]).unwrap();
        assert_eq!(job.uuid, "abc");
        assert_eq!(job.name, "my home");
        assert_eq!(job.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn test_unknown_job_is_server_error() {
        let server = SimulatedServer::new();
        let err = server
            .execute(&Command::new("JOB_ABORT").arg("jobUUID", "nope"), 0)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ChannelError::Server {
                code: 10,
                number: 0,
                data: "nope".to_string()
            }
        );
        assert_eq!(err.to_string(), "job not found: nope");
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let server = SimulatedServer::new();
        server.fail_next(
            "STATUS",
            2,
            ChannelError::Communication("garbled".to_string()),
        );

        for _ in 0..2 {
            assert!(server.execute(&Command::new("STATUS"), 0).await.is_err());
        }
        let values = server.execute(&Command::new("STATUS"), 0).await.unwrap();
        assert_eq!(values.get("state"), Some("running"));
        assert_eq!(server.count("STATUS"), 3);
    }

    #[tokio::test]
    async fn test_running_job_completes() {
        let server = SimulatedServer::new();
        server.add_job("j1", "home", JobState::Running);

        for _ in 0..16 {
            server
                .execute(&Command::new("JOB_INFO").arg("jobUUID", "j1"), 0)
                .await
                .unwrap();
        }

        let job = server.job("j1").unwrap();
        assert_eq!(job.state, JobState::Done);
        assert!(job.last_executed_at > 0);
    }

    #[tokio::test]
    async fn test_paused_server_counts_down() {
        let server = SimulatedServer::new();
        server.set_run_state(ServerRunState::Paused { remaining_secs: 2 });

        server.execute(&Command::new("STATUS"), 0).await.unwrap();
        assert_eq!(
            server.run_state(),
            ServerRunState::Paused { remaining_secs: 1 }
        );
        server.execute(&Command::new("STATUS"), 0).await.unwrap();
        assert_eq!(server.run_state(), ServerRunState::Running);
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("736563726574").as_deref(), Some("secret"));
        assert_eq!(decode_hex("7"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
