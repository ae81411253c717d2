// ── Session launcher ──
//
// The seam between the supervisor and the network. The supervisor only
// needs "run one session for this device until it ends"; tests swap in a
// scripted launcher.

use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use marquee_api::{ConnectionConfig, Connector, DeviceConnection, SessionOutcome};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::error::CoreError;

pub trait SessionLauncher: Send + Sync + 'static {
    /// Connect to `address` and run a session until it fails or `cancel`
    /// fires. Must resolve exactly once.
    fn launch(
        &self,
        name: String,
        settings: serde_json::Value,
        address: SocketAddr,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, SessionOutcome>;
}

/// Production launcher: TLS connect, then a Cast `DeviceConnection`.
pub struct CastLauncher {
    connector: Connector,
    config: ConnectionConfig,
}

impl CastLauncher {
    pub fn new(config: &SupervisorConfig) -> Result<Self, CoreError> {
        Ok(Self {
            connector: Connector::new(&config.transport())?,
            config: config.connection(),
        })
    }
}

impl SessionLauncher for CastLauncher {
    fn launch(
        &self,
        name: String,
        settings: serde_json::Value,
        address: SocketAddr,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, SessionOutcome> {
        let connector = self.connector.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let stream = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(device = %name, "cancelled while connecting");
                    return SessionOutcome::graceful(false);
                }
                result = connector.connect(address) => match result {
                    Ok(stream) => stream,
                    Err(e) => return SessionOutcome::failure(e, false),
                },
            };

            DeviceConnection::new(name, settings, config)
                .run(stream, cancel)
                .await
        })
    }
}
