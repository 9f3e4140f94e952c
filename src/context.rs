use std::sync::Arc;

use crate::channel::{CommandChannel, SimulatedServer, TcpChannel};
use crate::config::AppConfig;
use crate::core::SyncEngine;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub channel: Arc<dyn CommandChannel>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let channel: Arc<dyn CommandChannel> = if config.simulation {
            Arc::new(SimulatedServer::demo().with_debug_level(config.debug_level))
        } else {
            Arc::new(TcpChannel::new(config.server.clone(), config.debug_level))
        };
        Self::with_channel(config, channel)
    }

    pub fn with_channel(config: AppConfig, channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            config: Arc::new(config),
            channel,
        }
    }

    /// A synchronization engine over this context's channel. Polling is not
    /// started.
    pub fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.channel.clone(),
            self.config.poller_config(),
            self.config.sort,
        )
    }
}
