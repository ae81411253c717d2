// ── Core error types ──
//
// Errors surfaced by the supervisor to its callers. Per-device session
// failures never show up here: they are absorbed into the reconnect
// schedule. The `From<marquee_api::Error>` impl covers the few places
// where a protocol-layer error does escape (building the TLS connector).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport errors ─────────────────────────────────────────────
    #[error("Transport setup failed: {message}")]
    Transport { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    /// The supervisor's control loop has already stopped.
    #[error("Supervisor is shut down")]
    Shutdown,
}

// ── Conversion from protocol-layer errors ────────────────────────────

impl From<marquee_api::Error> for CoreError {
    fn from(err: marquee_api::Error) -> Self {
        match err {
            marquee_api::Error::Tls(message) => CoreError::Transport { message },
            marquee_api::Error::Transport(e) => CoreError::Transport {
                message: e.to_string(),
            },
            other => CoreError::Transport {
                message: other.to_string(),
            },
        }
    }
}
