//! Job state model.
//!
//! Typed views of what the server reports about jobs, the selected job's
//! progress, schedules and the server-wide run state, plus the pure
//! formatting functions every consumer shares.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::values::ValueMap;
use crate::channel::ChannelError;

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase().replace([' ', '-'], "_")
}

/// Per-job run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    None,
    Waiting,
    Running,
    NoStorage,
    DryRunning,
    RequestFtpPassword,
    RequestSshPassword,
    RequestWebdavPassword,
    RequestCryptPassword,
    RequestVolume,
    Done,
    Error,
    Aborted,
    Disconnected,
}

impl JobState {
    pub const ALL: [JobState; 14] = [
        JobState::None,
        JobState::Waiting,
        JobState::Running,
        JobState::NoStorage,
        JobState::DryRunning,
        JobState::RequestFtpPassword,
        JobState::RequestSshPassword,
        JobState::RequestWebdavPassword,
        JobState::RequestCryptPassword,
        JobState::RequestVolume,
        JobState::Done,
        JobState::Error,
        JobState::Aborted,
        JobState::Disconnected,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            JobState::None => "-",
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::NoStorage => "no storage",
            JobState::DryRunning => "dry run",
            JobState::RequestFtpPassword => "request FTP password",
            JobState::RequestSshPassword => "request SSH password",
            JobState::RequestWebdavPassword => "request WebDAV password",
            JobState::RequestCryptPassword => "request crypt password",
            JobState::RequestVolume => "request volume",
            JobState::Done => "done",
            JobState::Error => "ERROR",
            JobState::Aborted => "aborted",
            JobState::Disconnected => "disconnected",
        }
    }

    /// Name as sent by the server.
    pub fn wire_name(&self) -> &'static str {
        match self {
            JobState::None => "NONE",
            JobState::Waiting => "WAITING",
            JobState::Running => "RUNNING",
            JobState::NoStorage => "NO_STORAGE",
            JobState::DryRunning => "DRY_RUNNING",
            JobState::RequestFtpPassword => "REQUEST_FTP_PASSWORD",
            JobState::RequestSshPassword => "REQUEST_SSH_PASSWORD",
            JobState::RequestWebdavPassword => "REQUEST_WEBDAV_PASSWORD",
            JobState::RequestCryptPassword => "REQUEST_CRYPT_PASSWORD",
            JobState::RequestVolume => "REQUEST_VOLUME",
            JobState::Done => "DONE",
            JobState::Error => "ERROR",
            JobState::Aborted => "ABORTED",
            JobState::Disconnected => "DISCONNECTED",
        }
    }

    /// Classification used for row emphasis.
    pub fn hint(&self) -> PresentationHint {
        match self {
            JobState::Running | JobState::NoStorage | JobState::DryRunning => {
                PresentationHint::Active
            }
            JobState::RequestFtpPassword
            | JobState::RequestSshPassword
            | JobState::RequestWebdavPassword
            | JobState::RequestCryptPassword
            | JobState::RequestVolume => PresentationHint::NeedsAttention,
            JobState::Error => PresentationHint::Error,
            JobState::Aborted => PresentationHint::Aborted,
            JobState::None | JobState::Waiting | JobState::Done | JobState::Disconnected => {
                PresentationHint::Neutral
            }
        }
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "NONE" | "" => Ok(JobState::None),
            "WAITING" => Ok(JobState::Waiting),
            "RUNNING" => Ok(JobState::Running),
            "NO_STORAGE" => Ok(JobState::NoStorage),
            "DRY_RUNNING" | "DRY_RUN" => Ok(JobState::DryRunning),
            "REQUEST_FTP_PASSWORD" => Ok(JobState::RequestFtpPassword),
            "REQUEST_SSH_PASSWORD" => Ok(JobState::RequestSshPassword),
            "REQUEST_WEBDAV_PASSWORD" => Ok(JobState::RequestWebdavPassword),
            "REQUEST_CRYPT_PASSWORD" => Ok(JobState::RequestCryptPassword),
            "REQUEST_VOLUME" => Ok(JobState::RequestVolume),
            "DONE" => Ok(JobState::Done),
            "ERROR" => Ok(JobState::Error),
            "ABORTED" => Ok(JobState::Aborted),
            "DISCONNECTED" => Ok(JobState::Disconnected),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Visual emphasis of a job row, independent of any rendering technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentationHint {
    Active,
    NeedsAttention,
    Error,
    Aborted,
    Neutral,
}

impl PresentationHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentationHint::Active => "active",
            PresentationHint::NeedsAttention => "needs-attention",
            PresentationHint::Error => "error",
            PresentationHint::Aborted => "aborted",
            PresentationHint::Neutral => "neutral",
        }
    }
}

/// Connection state of the slave a job is delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaveState {
    #[default]
    Offline,
    Online,
    WrongMode,
    WrongProtocolVersion,
    Paired,
}

impl SlaveState {
    pub fn label(&self) -> &'static str {
        match self {
            SlaveState::Offline => "offline",
            SlaveState::Online => "online",
            SlaveState::WrongMode => "wrong mode",
            SlaveState::WrongProtocolVersion => "wrong protocol version",
            SlaveState::Paired => "paired",
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            SlaveState::Offline => "OFFLINE",
            SlaveState::Online => "ONLINE",
            SlaveState::WrongMode => "WRONG_MODE",
            SlaveState::WrongProtocolVersion => "WRONG_PROTOCOL_VERSION",
            SlaveState::Paired => "PAIRED",
        }
    }
}

impl FromStr for SlaveState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "OFFLINE" => Ok(SlaveState::Offline),
            "ONLINE" => Ok(SlaveState::Online),
            "WRONG_MODE" => Ok(SlaveState::WrongMode),
            "WRONG_PROTOCOL_VERSION" => Ok(SlaveState::WrongProtocolVersion),
            "PAIRED" => Ok(SlaveState::Paired),
            _ => Err(()),
        }
    }
}

/// Backup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    #[default]
    Normal,
    Full,
    Incremental,
    Differential,
    Continuous,
}

impl ArchiveType {
    pub const ALL: [ArchiveType; 5] = [
        ArchiveType::Normal,
        ArchiveType::Full,
        ArchiveType::Incremental,
        ArchiveType::Differential,
        ArchiveType::Continuous,
    ];

    /// Name used on the wire and in the UI.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveType::Normal => "normal",
            ArchiveType::Full => "full",
            ArchiveType::Incremental => "incremental",
            ArchiveType::Differential => "differential",
            ArchiveType::Continuous => "continuous",
        }
    }
}

impl FromStr for ArchiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArchiveType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown archive type '{}'", s))
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlaveHost {
    pub name: String,
    pub port: u16,
}

/// State of one job as reported by the job list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub uuid: String,
    pub master_name: String,
    pub name: String,
    pub state: JobState,
    pub slave_host: SlaveHost,
    pub slave_state: SlaveState,
    pub slave_secure: bool,
    pub archive_type: ArchiveType,
    /// Bytes; 0 means unlimited.
    pub archive_part_size: u64,
    pub delta_compress_algorithm: String,
    pub byte_compress_algorithm: String,
    pub crypt_algorithm: String,
    pub crypt_type: String,
    pub crypt_password_mode: String,
    /// Epoch seconds; 0 means never.
    pub last_executed_at: i64,
    pub estimated_rest_seconds: u64,
}

const NONE: &str = "none";

impl JobSnapshot {
    /// Decode one `JOB_LIST` row.
    pub fn from_values(values: &ValueMap) -> Result<Self, ChannelError> {
        values.require(&["jobUUID"])?;

        Ok(Self {
            uuid: values.string("jobUUID", ""),
            master_name: values.string("master", ""),
            name: values.string("name", ""),
            state: values.enumeration("state", JobState::None),
            slave_host: SlaveHost {
                name: values.string("slaveHostName", ""),
                port: values.enumeration("slaveHostPort", 0),
            },
            slave_state: values.enumeration("slaveState", SlaveState::Offline),
            slave_secure: values.boolean("slaveTLS", false),
            archive_type: values.enumeration("archiveType", ArchiveType::Normal),
            archive_part_size: values.ulong("archivePartSize", 0),
            delta_compress_algorithm: values.string("deltaCompressAlgorithm", NONE),
            byte_compress_algorithm: values.string("byteCompressAlgorithm", NONE),
            crypt_algorithm: values.string("cryptAlgorithm", NONE),
            crypt_type: values.string("cryptType", NONE),
            crypt_password_mode: values.string("cryptPasswordMode", "default"),
            last_executed_at: values.long("lastExecutedDateTime", 0),
            estimated_rest_seconds: values.ulong("estimatedRestTime", 0),
        })
    }

    pub fn hint(&self) -> PresentationHint {
        self.state.hint()
    }

    pub fn part_size_text(&self) -> String {
        if self.archive_part_size == 0 {
            "unlimited".to_string()
        } else {
            format_bytes(self.archive_part_size)
        }
    }

    pub fn compression_text(&self) -> String {
        let enabled = |algorithm: &str| !algorithm.is_empty() && !algorithm.eq_ignore_ascii_case(NONE);

        match (
            enabled(&self.delta_compress_algorithm),
            enabled(&self.byte_compress_algorithm),
        ) {
            (true, true) => format!(
                "{}+{}",
                self.delta_compress_algorithm, self.byte_compress_algorithm
            ),
            (true, false) => self.delta_compress_algorithm.clone(),
            (false, true) => self.byte_compress_algorithm.clone(),
            (false, false) => "-".to_string(),
        }
    }

    /// Crypt algorithm, marked with `*` for asymmetric encryption.
    pub fn crypt_text(&self) -> String {
        if self.crypt_algorithm.is_empty() || self.crypt_algorithm.eq_ignore_ascii_case(NONE) {
            return "-".to_string();
        }
        if self.crypt_type.eq_ignore_ascii_case("ASYMMETRIC") {
            format!("{}*", self.crypt_algorithm)
        } else {
            self.crypt_algorithm.clone()
        }
    }

    pub fn last_executed_text(&self) -> String {
        if self.last_executed_at <= 0 {
            return "-".to_string();
        }
        match DateTime::from_timestamp(self.last_executed_at, 0) {
            Some(at) => at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => "-".to_string(),
        }
    }

    pub fn estimated_text(&self) -> String {
        if self.estimated_rest_seconds == 0 {
            "-".to_string()
        } else {
            format_duration(self.estimated_rest_seconds)
        }
    }

    /// `host:port` of the slave, empty for local jobs.
    pub fn slave_text(&self) -> String {
        if self.slave_host.name.is_empty() {
            String::new()
        } else {
            format!("{}:{}", self.slave_host.name, self.slave_host.port)
        }
    }

    /// The server asks for the crypt password each time the job starts.
    pub fn needs_crypt_password(&self) -> bool {
        self.crypt_password_mode.eq_ignore_ascii_case("ask")
    }

    /// State text as displayed, taking the server run state into account.
    pub fn display_state(&self, server: ServerRunState) -> &'static str {
        match server {
            ServerRunState::Suspended => "suspended",
            _ => self.state.label(),
        }
    }
}

/// Live progress of the selected job, replaced on every poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDetail {
    pub uuid: String,
    pub state: JobState,
    pub message: String,
    pub done_count: u64,
    pub done_size: u64,
    pub total_entry_count: u64,
    pub total_entry_size: u64,
    /// Totals are still being collected; entry/byte progress is provisional.
    pub collecting_totals: bool,
    pub skipped_entry_count: u64,
    pub skipped_entry_size: u64,
    pub error_entry_count: u64,
    pub error_entry_size: u64,
    pub entries_per_second: f64,
    pub bytes_per_second: f64,
    pub storage_bytes_per_second: f64,
    pub archive_size: u64,
    /// Percent saved by compression.
    pub compression_ratio: f64,
    pub estimated_rest_seconds: u64,
    pub entry_name: String,
    pub entry_done_size: u64,
    pub entry_total_size: u64,
    pub storage_name: String,
    pub storage_done_size: u64,
    pub storage_total_size: u64,
    pub volume_number: u32,
    /// Percent of the current volume written.
    pub volume_progress: f64,
    pub requested_volume_number: u32,
}

impl JobDetail {
    /// Decode a `JOB_INFO` result for the given job.
    pub fn from_values(uuid: &str, values: &ValueMap) -> Self {
        Self {
            uuid: uuid.to_string(),
            state: values.enumeration("state", JobState::None),
            message: values.string("message", ""),
            done_count: values.ulong("doneCount", 0),
            done_size: values.ulong("doneSize", 0),
            total_entry_count: values.ulong("totalEntryCount", 0),
            total_entry_size: values.ulong("totalEntrySize", 0),
            collecting_totals: !values.boolean("collectTotalSumDone", true),
            skipped_entry_count: values.ulong("skippedEntryCount", 0),
            skipped_entry_size: values.ulong("skippedEntrySize", 0),
            error_entry_count: values.ulong("errorEntryCount", 0),
            error_entry_size: values.ulong("errorEntrySize", 0),
            entries_per_second: values.double("entriesPerSecond", 0.0),
            bytes_per_second: values.double("bytesPerSecond", 0.0),
            storage_bytes_per_second: values.double("storageBytesPerSecond", 0.0),
            archive_size: values.ulong("archiveSize", 0),
            compression_ratio: values.double("compressionRatio", 0.0),
            estimated_rest_seconds: values.ulong("estimatedRestTime", 0),
            entry_name: values.string("entryName", ""),
            entry_done_size: values.ulong("entryDoneSize", 0),
            entry_total_size: values.ulong("entryTotalSize", 0),
            storage_name: values.string("storageName", ""),
            storage_done_size: values.ulong("storageDoneSize", 0),
            storage_total_size: values.ulong("storageTotalSize", 0),
            volume_number: values.enumeration("volumeNumber", 0),
            volume_progress: values.double("volumeProgress", 0.0),
            requested_volume_number: values.enumeration("requestedVolumeNumber", 0),
        }
    }

    /// Processed entries (done, skipped or failed) in percent of the total.
    pub fn entries_progress(&self) -> f64 {
        percent(
            self.done_count
                .saturating_add(self.skipped_entry_count)
                .saturating_add(self.error_entry_count),
            self.total_entry_count,
        )
    }

    pub fn bytes_progress(&self) -> f64 {
        percent(
            self.done_size
                .saturating_add(self.skipped_entry_size)
                .saturating_add(self.error_entry_size),
            self.total_entry_size,
        )
    }

    pub fn entry_progress(&self) -> f64 {
        percent(self.entry_done_size, self.entry_total_size)
    }

    pub fn storage_progress(&self) -> f64 {
        percent(self.storage_done_size, self.storage_total_size)
    }

    pub fn compression_text(&self) -> String {
        format!("{:.1}%", self.compression_ratio)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 * 100.0 / total as f64).min(100.0)
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// One schedule of the selected job. `None` parts mean "any".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub uuid: String,
    pub year: Option<u32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// Bit 0 is Monday; `None` means every day.
    pub week_days: Option<u8>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub archive_type: ArchiveType,
}

impl ScheduleEntry {
    /// Decode one `SCHEDULE_LIST` row.
    pub fn from_values(values: &ValueMap) -> Result<Self, ChannelError> {
        values.require(&["scheduleUUID"])?;

        let date = values.string("date", "*-*-*");
        let mut date_parts = date.split('-').map(parse_part);
        let time = values.string("time", "*:*");
        let mut time_parts = time.split(':').map(parse_part);

        Ok(Self {
            uuid: values.string("scheduleUUID", ""),
            year: date_parts.next().flatten(),
            month: date_parts.next().flatten(),
            day: date_parts.next().flatten(),
            week_days: parse_week_days(&values.string("weekDays", "*"))?,
            hour: time_parts.next().flatten(),
            minute: time_parts.next().flatten(),
            archive_type: values.enumeration("archiveType", ArchiveType::Normal),
        })
    }

    pub fn date_text(&self) -> String {
        format!(
            "{}-{}-{}",
            part_text(self.year, 4),
            part_text(self.month, 2),
            part_text(self.day, 2)
        )
    }

    pub fn week_days_text(&self) -> String {
        match self.week_days {
            None => "*".to_string(),
            Some(mask) => WEEKDAY_NAMES
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, name)| *name)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn time_text(&self) -> String {
        format!("{}:{}", part_text(self.hour, 2), part_text(self.minute, 2))
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.date_text(),
            self.week_days_text(),
            self.time_text(),
            self.archive_type
        )
    }
}

fn parse_part(s: &str) -> Option<u32> {
    s.trim().parse().ok()
}

fn part_text(part: Option<u32>, width: usize) -> String {
    match part {
        Some(value) => format!("{:0width$}", value, width = width),
        None => "*".to_string(),
    }
}

/// `*` or an empty list means any day; unknown day names make the row
/// malformed.
fn parse_week_days(s: &str) -> Result<Option<u8>, ChannelError> {
    let s = s.trim();
    if s.is_empty() || s == "*" {
        return Ok(None);
    }
    let mut mask = 0u8;
    for day in s.split(',') {
        let bit = WEEKDAY_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(day.trim()))
            .ok_or_else(|| {
                ChannelError::Communication(format!("unknown week day '{}'", day.trim()))
            })?;
        mask |= 1 << bit;
    }
    Ok(if mask == 0x7f { None } else { Some(mask) })
}

/// Server-wide run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerRunState {
    #[default]
    Running,
    Paused {
        remaining_secs: u64,
    },
    Suspended,
}

impl ServerRunState {
    /// Decode a `STATUS` result.
    pub fn from_values(values: &ValueMap) -> Result<Self, ChannelError> {
        values.require(&["state"])?;

        match values.string("state", "").to_ascii_lowercase().as_str() {
            "running" => Ok(ServerRunState::Running),
            "pause" | "paused" => Ok(ServerRunState::Paused {
                remaining_secs: values.ulong("time", 0),
            }),
            "suspended" => Ok(ServerRunState::Suspended),
            other => Err(ChannelError::Communication(format!(
                "unknown server state '{}'",
                other
            ))),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ServerRunState::Running => "running".to_string(),
            ServerRunState::Paused { remaining_secs } => {
                format!("paused ({})", format_duration(*remaining_secs))
            }
            ServerRunState::Suspended => "suspended".to_string(),
        }
    }

    /// Label for the control that toggles the run state.
    pub fn toggle_label(&self) -> &'static str {
        match self {
            ServerRunState::Running => "Suspend",
            ServerRunState::Paused { .. } | ServerRunState::Suspended => "Continue",
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `HH:MM:SS`; hours are not wrapped into days.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_values(extra: &str) -> ValueMap {
        ValueMap::parse(&format!("jobUUID=abc name='home' state=WAITING {}", extra)).unwrap()
    }

    #[test]
    fn every_state_has_exactly_one_hint() {
        let hints = [
            PresentationHint::Active,
            PresentationHint::NeedsAttention,
            PresentationHint::Error,
            PresentationHint::Aborted,
            PresentationHint::Neutral,
        ];
        for state in JobState::ALL {
            let hint = state.hint();
            assert_eq!(hints.iter().filter(|h| **h == hint).count(), 1);
        }
    }

    #[test]
    fn hint_classification() {
        assert_eq!(JobState::Running.hint(), PresentationHint::Active);
        assert_eq!(JobState::NoStorage.hint(), PresentationHint::Active);
        assert_eq!(JobState::DryRunning.hint(), PresentationHint::Active);
        assert_eq!(JobState::RequestVolume.hint(), PresentationHint::NeedsAttention);
        assert_eq!(
            JobState::RequestCryptPassword.hint(),
            PresentationHint::NeedsAttention
        );
        assert_eq!(JobState::Error.hint(), PresentationHint::Error);
        assert_eq!(JobState::Aborted.hint(), PresentationHint::Aborted);
        assert_eq!(JobState::Done.hint(), PresentationHint::Neutral);
        assert_eq!(JobState::Disconnected.hint(), PresentationHint::Neutral);
        assert_eq!(PresentationHint::NeedsAttention.as_str(), "needs-attention");
    }

    #[test]
    fn state_names_parse_leniently() {
        assert_eq!("running".parse::<JobState>(), Ok(JobState::Running));
        assert_eq!("no storage".parse::<JobState>(), Ok(JobState::NoStorage));
        assert_eq!("DRY_RUNNING".parse::<JobState>(), Ok(JobState::DryRunning));
        assert_eq!(
            "request-volume".parse::<JobState>(),
            Ok(JobState::RequestVolume)
        );
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn unknown_state_defaults_to_none() {
        let values = ValueMap::parse("jobUUID=x state=exploded").unwrap();
        let job = JobSnapshot::from_values(&values).unwrap();
        assert_eq!(job.state, JobState::None);
    }

    #[test]
    fn job_without_uuid_is_rejected() {
        let values = ValueMap::parse("name=x").unwrap();
        assert!(JobSnapshot::from_values(&values).is_err());
    }

    #[test]
    fn unlimited_part_size() {
        let job = JobSnapshot::from_values(&job_values("archivePartSize=0")).unwrap();
        assert_eq!(job.part_size_text(), "unlimited");

        let job = JobSnapshot::from_values(&job_values("archivePartSize=2097152")).unwrap();
        assert_eq!(job.part_size_text(), "2.0 MB");
    }

    #[test]
    fn compression_and_crypt_labels() {
        let job = JobSnapshot::from_values(&job_values(
            "deltaCompressAlgorithm=xdelta1 byteCompressAlgorithm=zip9 cryptAlgorithm=AES256 cryptType=ASYMMETRIC",
        ))
        .unwrap();
        assert_eq!(job.compression_text(), "xdelta1+zip9");
        assert_eq!(job.crypt_text(), "AES256*");

        let job = JobSnapshot::from_values(&job_values(
            "deltaCompressAlgorithm=none byteCompressAlgorithm=bzip9 cryptType=SYMMETRIC",
        ))
        .unwrap();
        assert_eq!(job.compression_text(), "bzip9");
        assert_eq!(job.crypt_text(), "-");

        let job = JobSnapshot::from_values(&job_values("")).unwrap();
        assert_eq!(job.compression_text(), "-");
    }

    #[test]
    fn never_executed_and_no_estimate() {
        let job = JobSnapshot::from_values(&job_values("")).unwrap();
        assert_eq!(job.last_executed_text(), "-");
        assert_eq!(job.estimated_text(), "-");

        let job = JobSnapshot::from_values(&job_values("estimatedRestTime=3725")).unwrap();
        assert_eq!(job.estimated_text(), "01:02:05");
    }

    #[test]
    fn slave_fields() {
        let job = JobSnapshot::from_values(&job_values(
            "slaveHostName=vault slaveHostPort=38523 slaveState=PAIRED slaveTLS=yes",
        ))
        .unwrap();
        assert_eq!(job.slave_text(), "vault:38523");
        assert_eq!(job.slave_state, SlaveState::Paired);
        assert!(job.slave_secure);
    }

    #[test]
    fn suspended_server_overrides_state_text() {
        let job = JobSnapshot::from_values(&job_values("")).unwrap();
        assert_eq!(job.display_state(ServerRunState::Running), "waiting");
        assert_eq!(job.display_state(ServerRunState::Suspended), "suspended");
    }

    #[test]
    fn aggregate_entries_progress() {
        let values = ValueMap::parse(
            "totalEntryCount=100 doneCount=40 skippedEntryCount=10 errorEntryCount=5",
        )
        .unwrap();
        let detail = JobDetail::from_values("abc", &values);

        assert_eq!(detail.entries_progress(), 55.0);
        assert_eq!(detail.bytes_progress(), 0.0);
        assert!(!detail.collecting_totals);
    }

    #[test]
    fn huge_counters_do_not_overflow() {
        let values = ValueMap::parse(&format!(
            "totalEntryCount=100 doneCount={} skippedEntryCount=1 errorEntryCount=1 \
             totalEntrySize=10 doneSize={} skippedEntrySize=5",
            u64::MAX,
            u64::MAX - 1
        ))
        .unwrap();
        let detail = JobDetail::from_values("abc", &values);

        assert_eq!(detail.entries_progress(), 100.0);
        assert_eq!(detail.bytes_progress(), 100.0);
    }

    #[test]
    fn detail_collecting_totals_flag() {
        let values = ValueMap::parse("collectTotalSumDone=no compressionRatio=42.26").unwrap();
        let detail = JobDetail::from_values("abc", &values);
        assert!(detail.collecting_totals);
        assert_eq!(detail.compression_text(), "42.3%");
    }

    #[test]
    fn schedule_parsing_with_wildcards() {
        let values = ValueMap::parse(
            "scheduleUUID=s1 date=*-06-01 weekDays=Mon,Fri time=23:* archiveType=full",
        )
        .unwrap();
        let schedule = ScheduleEntry::from_values(&values).unwrap();

        assert_eq!(schedule.year, None);
        assert_eq!(schedule.month, Some(6));
        assert_eq!(schedule.week_days, Some(0b0010001));
        assert_eq!(schedule.minute, None);
        assert_eq!(schedule.to_string(), "*-06-01 Mon,Fri 23:* full");
    }

    #[test]
    fn all_week_days_mean_any() {
        assert_eq!(parse_week_days("Mon,Tue,Wed,Thu,Fri,Sat,Sun").unwrap(), None);
        assert_eq!(parse_week_days("*").unwrap(), None);
        assert_eq!(parse_week_days("").unwrap(), None);
    }

    #[test]
    fn unknown_week_day_rejects_schedule() {
        assert!(parse_week_days("Mon,Funday").is_err());
        assert!(parse_week_days(",").is_err());

        let values = ValueMap::parse("scheduleUUID=s1 weekDays=Someday").unwrap();
        assert!(ScheduleEntry::from_values(&values).is_err());

        let values = ValueMap::parse("scheduleUUID=s1 weekDays=''").unwrap();
        assert_eq!(ScheduleEntry::from_values(&values).unwrap().week_days, None);
    }

    #[test]
    fn server_run_state_decoding() {
        let paused = ValueMap::parse("state=pause time=90").unwrap();
        assert_eq!(
            ServerRunState::from_values(&paused).unwrap(),
            ServerRunState::Paused { remaining_secs: 90 }
        );
        assert_eq!(ServerRunState::Running.toggle_label(), "Suspend");
        assert_eq!(ServerRunState::Suspended.toggle_label(), "Continue");

        let unknown = ValueMap::parse("state=melting").unwrap();
        assert!(ServerRunState::from_values(&unknown).is_err());
    }
}
