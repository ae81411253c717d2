use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `marquee-api` crate.
///
/// Covers every failure mode of a single device session: framing,
/// message validation, receiver-reported failures, heartbeats, and the
/// TLS transport underneath. `marquee-core` only ever sees these as the
/// reason attached to a failed session.
#[derive(Debug, Error)]
pub enum Error {
    // ── Framing ─────────────────────────────────────────────────────
    /// A length prefix exceeded the maximum frame size. The stream cannot
    /// be resynchronized after this.
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The frame body was not a valid envelope.
    #[error("Malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),

    // ── Protocol ────────────────────────────────────────────────────
    /// Wrong protocol version, payload type, source, or destination.
    /// Offending messages are dropped; the session keeps running.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The receiver answered with an error reason (launch failed, etc.).
    #[error("Receiver reported an error: {reason}")]
    Receiver { reason: String },

    /// The receiver is back on its idle screen: the application exited.
    #[error("Receiver returned to the idle screen")]
    IdleScreen,

    /// Nothing was heard on the heartbeat namespace for too long.
    #[error("No heartbeat received for {}s", elapsed.as_secs())]
    HeartbeatTimeout { elapsed: Duration },

    // ── Transport ───────────────────────────────────────────────────
    /// Socket read/write/connect failure.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// TCP connect did not complete in time.
    #[error("Connect timed out after {}ms", timeout.as_millis())]
    ConnectTimeout { timeout: Duration },

    /// TCP was up but the TLS handshake did not finish in time.
    #[error("TLS handshake timed out after {}ms", timeout.as_millis())]
    HandshakeTimeout { timeout: Duration },

    /// The receiver closed the stream.
    #[error("Connection closed by peer")]
    PeerClosed,

    // ── Internal ────────────────────────────────────────────────────
    /// A JSON payload could not be serialized. Aborts the single send.
    #[error("Failed to encode payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this error must tear down the session.
    ///
    /// Everything except a protocol violation is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ProtocolViolation(_))
    }

    /// Returns `true` if the failure happened below the protocol layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Tls(_)
                | Self::ConnectTimeout { .. }
                | Self::HandshakeTimeout { .. }
                | Self::PeerClosed
        )
    }
}
