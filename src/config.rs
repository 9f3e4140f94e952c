use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::{PollerConfig, SortKey};
use crate::logging::LogConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/barctl/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `host:port` of the backup server
    pub server: String,
    pub poll_interval_ms: u64,
    /// Refresh the full job list every Nth poll
    pub job_list_every: u32,
    /// Consecutive run state failures tolerated before giving up
    pub run_state_failure_threshold: u32,
    /// Commands up to this debug level are logged at DEBUG
    pub debug_level: u8,
    pub sort: SortKey,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: "localhost:38523".to_string(),
            poll_interval_ms: 1000,
            job_list_every: 10,
            run_state_failure_threshold: 5,
            debug_level: 0,
            sort: SortKey::Name,
            simulation: false,
            verbose: false,
            json_logs: false,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `BARCTL_*` environment variables and
    /// command line overrides, later layers winning.
    ///
    /// A missing config file is not an error.
    pub fn load<T: Serialize>(
        path: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, figment::Error> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BARCTL_"));
        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }
        figment.extract()
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            job_list_every: self.job_list_every.max(1),
            run_state_failure_threshold: self.run_state_failure_threshold,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.json_logs,
            verbose: self.verbose,
            file: self.log_file.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
