// marquee-api: Cast v2 wire protocol and the per-device session client

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod transport;

pub use codec::CastCodec;
pub use connection::{
    CloseReason, ConnectionConfig, ConnectionState, DeviceConnection, SessionOutcome,
};
pub use error::Error;
pub use message::CastMessage;
pub use transport::{Connector, TransportConfig};
