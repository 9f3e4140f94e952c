//! Command channel to the backup server.
//!
//! The rest of the crate talks to the server exclusively through the
//! [`CommandChannel`] trait: send one command, receive zero or more decoded
//! result rows, or one of three failure kinds.
//!
//! ## Architecture
//!
//! - `protocol`: line framing for requests and result lines
//! - `client`: TCP implementation with a persistent connection
//! - `simulated`: in-process server used by tests and `--simulation`

pub mod client;
mod protocol;
pub mod simulated;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::values::ValueMap;

pub use client::TcpChannel;
pub use simulated::SimulatedServer;

/// Debug level used for commands issued every poll tick.
pub const DEBUG_LEVEL_POLL: u8 = 2;
/// Debug level used for user-initiated commands.
pub const DEBUG_LEVEL_COMMAND: u8 = 1;

/// Failure reported by a command channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// No connection to the server could be used.
    #[error("not connected to server: {0}")]
    Connection(String),
    /// The server answered with something the protocol does not allow.
    #[error("communication error: {0}")]
    Communication(String),
    /// The server rejected the command.
    #[error("{}", error_text(*code, *number, data))]
    Server { code: u32, number: i32, data: String },
}

impl ChannelError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ChannelError::Connection(_))
    }
}

/// Known server error codes.
const ERROR_TEXTS: &[(u32, &str)] = &[
    (1, "insufficient memory"),
    (2, "unknown command"),
    (3, "invalid argument"),
    (4, "authorization failed"),
    (5, "server busy"),
    (10, "job not found"),
    (11, "job already running"),
    (12, "job not running"),
    (13, "schedule not found"),
    (14, "invalid crypt password"),
    (15, "crypt password required"),
    (16, "volume not available"),
    (17, "storage not available"),
    (18, "operation aborted"),
];

/// Render a server error independent of any locale.
///
/// The text depends only on the error code; the server-supplied data and a
/// non-zero system error number are appended when present.
pub fn error_text(code: u32, number: i32, data: &str) -> String {
    let mut text = match ERROR_TEXTS.iter().find(|(c, _)| *c == code) {
        Some((_, text)) => (*text).to_string(),
        None => format!("server error {}", code),
    };
    if !data.is_empty() {
        text.push_str(": ");
        text.push_str(data);
    }
    if number != 0 {
        text.push_str(&format!(" (error {})", number));
    }
    text
}

/// A single command with its `key=value` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    key: &'static str,
    value: String,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Append an argument rendered verbatim.
    pub fn arg(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.args.push(Arg {
            key,
            value: value.to_string(),
        });
        self
    }

    /// Append a boolean argument rendered as `yes`/`no`.
    pub fn flag(self, key: &'static str, value: bool) -> Self {
        self.arg(key, if value { "yes" } else { "no" })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Value of an argument.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for arg in &self.args {
            write!(f, " {}={}", arg.key, arg.value)?;
        }
        Ok(())
    }
}

/// Synchronous request/response primitive to the server.
///
/// Calls on one channel are serialized; rows are delivered in the order the
/// server sent them.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Execute a multi-row command, invoking `on_row` once per result row.
    async fn execute_rows(
        &self,
        command: &Command,
        debug_level: u8,
        on_row: &mut (dyn FnMut(ValueMap) + Send),
    ) -> Result<(), ChannelError>;

    /// Execute a single-result command. Rows, if several, are merged.
    async fn execute(&self, command: &Command, debug_level: u8) -> Result<ValueMap, ChannelError> {
        let mut result = ValueMap::new();
        self.execute_rows(command, debug_level, &mut |row| result.extend(row))
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_renders_arguments_in_order() {
        let command = Command::new("JOB_START")
            .arg("jobUUID", "abc")
            .arg("archiveType", "full")
            .flag("noStorage", false)
            .flag("dryRun", true);

        assert_eq!(
            command.to_string(),
            "JOB_START jobUUID=abc archiveType=full noStorage=no dryRun=yes"
        );
        assert_eq!(command.get("jobUUID"), Some("abc"));
        assert_eq!(command.get("missing"), None);
    }

    #[test]
    fn test_command_without_arguments() {
        assert_eq!(Command::new("SUSPEND").to_string(), "SUSPEND");
    }

    #[test]
    fn test_error_text_known_code() {
        assert_eq!(error_text(10, 0, ""), "job not found");
        assert_eq!(error_text(11, 0, "nightly"), "job already running: nightly");
    }

    #[test]
    fn test_error_text_unknown_code_with_errno() {
        assert_eq!(error_text(999, 13, "denied"), "server error 999: denied (error 13)");
    }

    #[test]
    fn test_server_error_display_uses_resolver() {
        let err = ChannelError::Server {
            code: 12,
            number: 0,
            data: String::new(),
        };
        assert_eq!(err.to_string(), "job not running");
        assert!(!err.is_connection());
    }
}
