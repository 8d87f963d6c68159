//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connection lifecycle task with heartbeat and reconnection
//! - [`Heartbeat`]: periodic probe sender owned by the connection task
//! - [`ListenerRegistry`]: ordered application callbacks per event kind
//! - [`Transport`]: seam to the socket library, implemented by [`WsTransport`]
//!
//! Most applications use [`crate::Client`], which wires these together.

pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod listeners;
pub mod transport;

pub use config::{ConnectionConfig, HeartbeatConfig};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use heartbeat::Heartbeat;
pub use listeners::{EventKind, ListenerRegistry};
#[cfg(feature = "tungstenite")]
pub use transport::WsTransport;
pub use transport::{Connection, Handshake, Payload, Transport, TransportEvent};
