// Runtime configuration for the supervisor.
//
// Built by the config crate from `marquee.toml`; no file loading here.

use std::time::Duration;

use marquee_api::message::DEFAULT_APPLICATION_ID;
use marquee_api::{ConnectionConfig, TransportConfig};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Receiver application launched on every device.
    pub app_id: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APPLICATION_ID.to_owned(),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            app_id: self.app_id.clone(),
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}
