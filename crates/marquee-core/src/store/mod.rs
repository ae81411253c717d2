// ── Device registry ──
//
// Owned by the supervisor's control loop; readers only ever see the
// published snapshots.

mod registry;

pub use registry::{ConnectionHandle, Registry};
