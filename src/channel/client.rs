//! TCP command channel.
//!
//! Keeps one connection to the server open and serializes commands over it.
//! A transport failure drops the connection; the next command reconnects.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::protocol::{ResultLine, encode_request};
use super::{ChannelError, Command, CommandChannel};
use crate::core::values::ValueMap;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Command channel over a plain TCP connection.
pub struct TcpChannel {
    addr: String,
    debug_level: u8,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl TcpChannel {
    /// Create a channel for the given `host:port`. No connection is made
    /// until the first command.
    pub fn new(addr: impl Into<String>, debug_level: u8) -> Self {
        Self {
            addr: addr.into(),
            debug_level,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<Connection, ChannelError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ChannelError::Connection(format!("{}: {}", self.addr, e)))?;
        debug!(addr = %self.addr, "Connected to server");

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn round_trip(
        conn: &mut Connection,
        id: u64,
        command: &Command,
        on_row: &mut (dyn FnMut(ValueMap) + Send),
    ) -> Result<(), ChannelError> {
        conn.writer
            .write_all(encode_request(id, command).as_bytes())
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = conn
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| ChannelError::Connection(e.to_string()))?;
            if bytes_read == 0 {
                return Err(ChannelError::Connection(
                    "connection closed by server".to_string(),
                ));
            }
            if line.trim().is_empty() {
                continue;
            }

            let result = ResultLine::parse(&line)?;
            if result.id != id {
                return Err(ChannelError::Communication(format!(
                    "unexpected result id {} (expected {})",
                    result.id, id
                )));
            }
            if result.code != 0 {
                return Err(result.into_error());
            }
            if !result.data.is_empty() {
                on_row(ValueMap::parse(&result.data)?);
            }
            if result.completed {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl CommandChannel for TcpChannel {
    async fn execute_rows(
        &self,
        command: &Command,
        debug_level: u8,
        on_row: &mut (dyn FnMut(ValueMap) + Send),
    ) -> Result<(), ChannelError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ChannelError::Connection("not connected".to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if debug_level <= self.debug_level {
            debug!(id, command = %command, "Sending command");
        } else {
            trace!(id, command = %command, "Sending command");
        }

        let result = Self::round_trip(conn, id, command, on_row).await;
        match &result {
            Err(ChannelError::Connection(reason)) => {
                warn!(addr = %self.addr, reason = %reason, "Connection lost");
                *guard = None;
            }
            // The stream may hold unread lines of this command; start over.
            Err(ChannelError::Communication(reason)) => {
                debug!(id, reason = %reason, "Protocol error, dropping connection");
                *guard = None;
            }
            _ => {}
        }
        result
    }
}
