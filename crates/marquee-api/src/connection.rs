// Per-device Cast session.
//
// A `DeviceConnection` owns one stream for its whole life: it sends the
// CONNECT + LAUNCH handshake, waits for the receiver to report our
// application's transport id, pushes the device settings to it once, and
// then keeps the channel alive with heartbeats until something fails or
// the owner cancels it. It never reconnects on its own; the caller decides
// what happens after `run` returns.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::CastCodec;
use crate::error::Error;
use crate::message::{
    BROADCAST_ID, CastMessage, ControlPayload, DEFAULT_APPLICATION_ID, DEFAULT_RECEIVER_ID,
    DevicePayload, NAMESPACE_CONNECTION, NAMESPACE_CUSTOM, NAMESPACE_HEARTBEAT,
    NAMESPACE_RECEIVER, ReceiverResponse,
};

type CastFramed<S> = Framed<S, CastCodec>;

// ── Configuration ───────────────────────────────────────────────────

/// Protocol settings shared by every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Receiver application to launch.
    pub app_id: String,
    pub heartbeat_interval: Duration,
    /// Close if no heartbeat-namespace message arrives for this long.
    pub heartbeat_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APPLICATION_ID.to_owned(),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    HandshakeSent,
    SessionEstablished,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The owner cancelled the session on purpose.
    GracefulReload,
    Failure(Error),
}

/// Reported exactly once, when a session ends.
#[derive(Debug)]
pub struct SessionOutcome {
    pub reason: CloseReason,
    /// Whether the session ever got as far as `SessionEstablished`.
    pub reached_session: bool,
}

impl SessionOutcome {
    pub fn graceful(reached_session: bool) -> Self {
        Self {
            reason: CloseReason::GracefulReload,
            reached_session,
        }
    }

    pub fn failure(error: Error, reached_session: bool) -> Self {
        Self {
            reason: CloseReason::Failure(error),
            reached_session,
        }
    }

    pub fn is_graceful(&self) -> bool {
        matches!(self.reason, CloseReason::GracefulReload)
    }
}

// ── Connection ──────────────────────────────────────────────────────

pub struct DeviceConnection {
    name: String,
    settings: serde_json::Value,
    config: ConnectionConfig,
    sender_id: String,
    /// Transport id of our running application, once known.
    session_id: Option<String>,
    request_id: u32,
    last_heartbeat: Instant,
    state: ConnectionState,
}

impl DeviceConnection {
    pub fn new(
        name: impl Into<String>,
        settings: serde_json::Value,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            config,
            sender_id: format!("sender-{}", rand::random::<i32>()),
            session_id: None,
            request_id: 0,
            last_heartbeat: Instant::now(),
            state: ConnectionState::Connecting,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(device = %self.name, from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    /// Drive the session over `stream` until it fails or `cancel` fires.
    ///
    /// The stream is shut down before returning, whatever the outcome.
    pub async fn run<S>(mut self, stream: S, cancel: CancellationToken) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, CastCodec);
        let result = self.drive(&mut framed, &cancel).await;

        self.transition(ConnectionState::Closed);
        if let Err(e) = SinkExt::<CastMessage>::close(&mut framed).await {
            trace!(device = %self.name, error = %e, "error while closing stream");
        }

        let reached_session = self.session_id.is_some();
        match result {
            Ok(()) => {
                info!(device = %self.name, "disconnect");
                SessionOutcome::graceful(reached_session)
            }
            Err(e) => {
                warn!(device = %self.name, error = %e, "session closed");
                SessionOutcome::failure(e, reached_session)
            }
        }
    }

    /// `Ok(())` only on cancellation; every other exit is an error.
    async fn drive<S>(
        &mut self,
        framed: &mut CastFramed<S>,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Seeded now so the first tick can't time out.
        self.last_heartbeat = Instant::now();
        self.send_handshake(framed).await?;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                _ = heartbeat.tick() => self.on_heartbeat_tick(framed).await?,
                frame = framed.next() => match frame {
                    Some(Ok(msg)) => self.handle_message(framed, msg).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::PeerClosed),
                },
            }
        }
    }

    async fn send_handshake<S>(&mut self, framed: &mut CastFramed<S>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send(framed, NAMESPACE_CONNECTION, DEFAULT_RECEIVER_ID, &ControlPayload::Connect)
            .await?;
        let launch = ControlPayload::Launch {
            app_id: self.config.app_id.clone(),
            request_id: self.next_request_id(),
        };
        self.send(framed, NAMESPACE_RECEIVER, DEFAULT_RECEIVER_ID, &launch)
            .await?;

        self.transition(ConnectionState::HandshakeSent);
        info!(device = %self.name, sender = %self.sender_id, "connect");
        Ok(())
    }

    async fn on_heartbeat_tick<S>(&mut self, framed: &mut CastFramed<S>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let elapsed = self.last_heartbeat.elapsed();
        if elapsed > self.config.heartbeat_timeout {
            warn!(device = %self.name, elapsed_secs = elapsed.as_secs(), "expire");
            return Err(Error::HeartbeatTimeout { elapsed });
        }
        self.send(framed, NAMESPACE_HEARTBEAT, DEFAULT_RECEIVER_ID, &ControlPayload::Ping)
            .await
    }

    // ── Inbound ─────────────────────────────────────────────────────

    async fn handle_message<S>(
        &mut self,
        framed: &mut CastFramed<S>,
        msg: CastMessage,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(e) = self.validate(&msg) {
            debug!(device = %self.name, error = %e, "dropping message");
            return Ok(());
        }

        match msg.namespace.as_str() {
            NAMESPACE_HEARTBEAT => {
                self.last_heartbeat = Instant::now();
                if let Ok(ControlPayload::Ping) =
                    serde_json::from_str::<ControlPayload>(msg.payload())
                {
                    let source = msg.source_id.clone();
                    self.send(framed, NAMESPACE_HEARTBEAT, &source, &ControlPayload::Pong)
                        .await?;
                }
                Ok(())
            }
            NAMESPACE_RECEIVER => self.handle_receiver_message(framed, &msg).await,
            NAMESPACE_CUSTOM => {
                info!(device = %self.name, payload = msg.payload(), "message");
                Ok(())
            }
            other => {
                trace!(device = %self.name, namespace = other, "ignoring message");
                Ok(())
            }
        }
    }

    fn validate(&self, msg: &CastMessage) -> Result<(), Error> {
        if !msg.is_string_v210() {
            return Err(Error::ProtocolViolation(
                "unexpected protocol version or payload type".into(),
            ));
        }
        let source = msg.source_id.as_str();
        if source != DEFAULT_RECEIVER_ID && self.session_id.as_deref() != Some(source) {
            return Err(Error::ProtocolViolation(format!("unexpected source {source:?}")));
        }
        let destination = msg.destination_id.as_str();
        if destination != self.sender_id && destination != BROADCAST_ID {
            return Err(Error::ProtocolViolation(format!(
                "unexpected destination {destination:?}"
            )));
        }
        Ok(())
    }

    async fn handle_receiver_message<S>(
        &mut self,
        framed: &mut CastFramed<S>,
        msg: &CastMessage,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response: ReceiverResponse = match serde_json::from_str(msg.payload()) {
            Ok(r) => r,
            Err(e) => {
                debug!(device = %self.name, error = %e, "unparseable receiver message");
                return Ok(());
            }
        };

        if let Some(reason) = response.reason {
            warn!(device = %self.name, payload = msg.payload(), "error");
            return Err(Error::Receiver { reason });
        }
        if !response.is_application_status() {
            return Ok(());
        }
        if response.is_idle_screen() {
            info!(device = %self.name, "down");
            return Err(Error::IdleScreen);
        }

        if self.session_id.is_none() {
            if let Some(transport_id) = response.transport_id(&self.config.app_id) {
                self.establish_session(framed, transport_id.to_owned()).await?;
            }
        }
        Ok(())
    }

    async fn establish_session<S>(
        &mut self,
        framed: &mut CastFramed<S>,
        transport_id: String,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.session_id = Some(transport_id.clone());
        self.transition(ConnectionState::SessionEstablished);
        info!(device = %self.name, transport = %transport_id, "up");

        self.send(framed, NAMESPACE_CONNECTION, &transport_id, &ControlPayload::Connect)
            .await?;
        let payload = DevicePayload {
            name: self.name.clone(),
            settings: self.settings.clone(),
            request_id: self.next_request_id(),
        };
        self.send(framed, NAMESPACE_CUSTOM, &transport_id, &payload)
            .await
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send one JSON payload. A payload that fails to serialize is logged
    /// and skipped; only transport failures propagate.
    async fn send<S, T>(
        &self,
        framed: &mut CastFramed<S>,
        namespace: &str,
        destination: &str,
        payload: &T,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        T: Serialize,
    {
        let msg = match CastMessage::json(namespace, &self.sender_id, destination, payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(device = %self.name, error = %Error::Encoding(e), "dropping outbound message");
                return Ok(());
            }
        };
        trace!(device = %self.name, namespace, destination, "send");
        framed.send(msg).await
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("name", &self.name)
            .field("sender_id", &self.sender_id)
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(source: &str, destination: &str) -> CastMessage {
        CastMessage {
            protocol_version: 0,
            source_id: source.into(),
            destination_id: destination.into(),
            namespace: NAMESPACE_HEARTBEAT.into(),
            payload_type: 0,
            payload_utf8: Some(r#"{"type":"PONG"}"#.into()),
            payload_binary: None,
        }
    }

    fn connection() -> DeviceConnection {
        DeviceConnection::new("Lobby", serde_json::json!({}), ConnectionConfig::default())
    }

    #[test]
    fn sender_id_shape() {
        let conn = connection();
        let suffix = conn.sender_id().strip_prefix("sender-");
        assert!(suffix.is_some_and(|s| s.parse::<i32>().is_ok()));
        assert_eq!(conn.state, ConnectionState::Connecting);
    }

    #[test]
    fn validation_accepts_receiver_and_broadcast() {
        let conn = connection();
        let sender = conn.sender_id().to_owned();
        assert!(conn.validate(&message(DEFAULT_RECEIVER_ID, &sender)).is_ok());
        assert!(conn.validate(&message(DEFAULT_RECEIVER_ID, BROADCAST_ID)).is_ok());
    }

    #[test]
    fn validation_rejects_strangers() {
        let mut conn = connection();
        let sender = conn.sender_id().to_owned();

        assert!(conn.validate(&message("web-5", &sender)).is_err());
        conn.session_id = Some("web-5".into());
        assert!(conn.validate(&message("web-5", &sender)).is_ok());

        assert!(conn.validate(&message(DEFAULT_RECEIVER_ID, "sender-other")).is_err());

        let mut binary = message(DEFAULT_RECEIVER_ID, &sender);
        binary.payload_type = 1;
        assert!(matches!(conn.validate(&binary), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn transitions_update_state() {
        let mut conn = connection();
        conn.transition(ConnectionState::HandshakeSent);
        assert_eq!(conn.state, ConnectionState::HandshakeSent);
        conn.transition(ConnectionState::Closed);
        assert_eq!(conn.state, ConnectionState::Closed);
    }

    #[test]
    fn request_ids_increase_from_zero() {
        let mut conn = connection();
        assert_eq!(conn.next_request_id(), 0);
        assert_eq!(conn.next_request_id(), 1);
        assert_eq!(conn.next_request_id(), 2);
    }
}
