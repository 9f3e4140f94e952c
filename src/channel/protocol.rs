//! Line protocol spoken with the server.
//!
//! Requests are single lines of the form `<id> <COMMAND> key=value ...`.
//! Every result line echoes the request id:
//!
//! ```text
//! <id> <completed> <errorCode> <data>
//! ```
//!
//! Multi-row commands send `completed=0` lines, one per row, and finish with
//! a `completed=1` line. A non-zero error code terminates the command.

use super::{ChannelError, Command};
use crate::core::values::ValueMap;

/// Encode a request line, including the trailing newline.
pub fn encode_request(id: u64, command: &Command) -> String {
    format!("{} {}\n", id, command)
}

/// One parsed result line.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultLine {
    pub id: u64,
    pub completed: bool,
    pub code: u32,
    pub data: String,
}

impl ResultLine {
    /// Parse a result line (without trailing newline).
    pub fn parse(line: &str) -> Result<Self, ChannelError> {
        let malformed = || ChannelError::Communication(format!("malformed result line '{}'", line));

        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(4, ' ');
        let id = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)?;
        let completed = match parts.next() {
            Some("0") => false,
            Some("1") => true,
            _ => return Err(malformed()),
        };
        let code = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)?;
        let data = parts.next().unwrap_or("").trim().to_string();

        Ok(Self {
            id,
            completed,
            code,
            data,
        })
    }

    /// Encode as a line, including the trailing newline.
    pub fn encode(&self) -> String {
        if self.data.is_empty() {
            format!("{} {} {}\n", self.id, self.completed as u8, self.code)
        } else {
            format!(
                "{} {} {} {}\n",
                self.id, self.completed as u8, self.code, self.data
            )
        }
    }

    /// Convert an error line into a server error.
    ///
    /// Error data may carry `errno=<n>` and `message=<text>`; anything else
    /// is passed through as the error data verbatim.
    pub fn into_error(self) -> ChannelError {
        let (number, data) = match ValueMap::parse(&self.data) {
            Ok(values) if values.contains("message") || values.contains("errno") => {
                (values.int("errno", 0), values.string("message", ""))
            }
            _ => (0, self.data),
        };
        ChannelError::Server {
            code: self.code,
            number,
            data,
        }
    }
}

/// Quote a string value for the data part of a line.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}
