//! Reconciliation layer between discovery, configuration and the per-device
//! Cast sessions in `marquee-api`.
//!
//! - **[`Supervisor`]**: the single control loop. Every input (configuration
//!   snapshots, discovery events, refresh requests, session closures and
//!   retry timers) is a message on one queue, so two events for the same
//!   device can never race. Guarantees at most one session per device.
//!
//! - **[`Registry`]**: the per-device settings, address and connection maps.
//!   Only the supervisor mutates it; readers get `watch` snapshots.
//!
//! - **[`BackoffPolicy`]**: reconnect delays, doubling per consecutive
//!   failure and reset by a session that got established.
//!
//! - **[`SessionLauncher`]**: how a session is actually run. [`CastLauncher`]
//!   is the TLS + Cast implementation.
//!
//! - **[`StatusFacade`]**: read-only device records and forced refresh, for
//!   the status page.

pub mod backoff;
pub mod config;
pub mod error;
pub mod launcher;
pub mod model;
pub mod status;
pub mod store;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::{BackoffPolicy, Closure, RetryState};
pub use config::SupervisorConfig;
pub use error::CoreError;
pub use launcher::{CastLauncher, SessionLauncher};
pub use model::{DeviceConfig, DeviceInfo, DiscoveryEvent};
pub use status::{DeviceStatus, DeviceStatusView, StatusFacade, format_duration};
pub use store::Registry;
pub use supervisor::Supervisor;
