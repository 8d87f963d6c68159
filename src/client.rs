use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::watch;

use crate::Result;
use crate::ws::config::{ConnectionConfig, HeartbeatConfig};
use crate::ws::connection::{ConnectionManager, ConnectionState};
use crate::ws::listeners::ListenerRegistry;
use crate::ws::transport::{Handshake, Payload, Transport};

/// WebSocket client that keeps itself connected.
///
/// While the connection is open a probe message is sent every heartbeat interval, and
/// inbound messages equal to the probe are swallowed. When the connection drops without
/// [`Client::close`] having been called, a new one is opened with the same
/// [`ConnectionConfig`]; failed attempts are retried every
/// [`retry_delay`](ConnectionConfig::retry_delay) for as long as it takes.
///
/// Listeners survive reconnections. Register them right after construction, before the
/// first `.await`, to observe the first `open`.
///
/// Dropping the last handle closes the connection. Listeners are owned by the connection
/// task, so a listener that needs the client (to reply from `on_message`, say) should
/// capture a [`WeakClient`] from [`Client::downgrade`]: a captured `Client` clone keeps the
/// connection alive until [`Client::close`] is called.
///
/// # Examples
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use heartbeat_ws::Client;
/// use heartbeat_ws::ws::config::{ConnectionConfig, HeartbeatConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ConnectionConfig::builder()
///         .address("wss://echo.websocket.org")
///         .build();
///     let heartbeat = HeartbeatConfig::builder()
///         .message("ping")
///         .interval(Duration::from_secs(10))
///         .build();
///
///     let client = Client::new(config, heartbeat)?;
///     client.on_message(|payload| println!("{payload:?}"));
///     client.on_close(|| println!("closed"));
///
///     tokio::time::sleep(Duration::from_secs(30)).await;
///     client.close();
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    /// Connection manager for the WebSocket
    connection: ConnectionManager,
    /// Application callbacks, shared with the connection task
    listeners: Arc<ListenerRegistry>,
}

impl Client {
    /// Create a client over `tokio-tungstenite` and start connecting.
    #[cfg(feature = "tungstenite")]
    pub fn new(config: ConnectionConfig, heartbeat: HeartbeatConfig) -> Result<Self> {
        Self::with_transport(config, heartbeat, crate::ws::transport::WsTransport)
    }

    /// Create a client over a custom [`Transport`] and start connecting.
    ///
    /// Fails with [`Kind::Config`](crate::error::Kind::Config) for a blank address or a zero
    /// heartbeat interval, in which case nothing is opened.
    pub fn with_transport<T: Transport>(
        config: ConnectionConfig,
        heartbeat: HeartbeatConfig,
        transport: T,
    ) -> Result<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let connection =
            ConnectionManager::new(config, heartbeat, transport, Arc::clone(&listeners))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                connection,
                listeners,
            }),
        })
    }

    /// Create a handle that does not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run `listener` every time a connection opens, reconnections included.
    pub fn on_open<F>(&self, listener: F)
    where
        F: Fn(&Handshake) + Send + Sync + 'static,
    {
        self.inner.listeners.on_open(listener);
    }

    /// Run `listener` for every inbound message that is not the heartbeat probe.
    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.listeners.on_message(listener);
    }

    /// Run `listener` when the transport reports an error.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.on_error(listener);
    }

    /// Run `listener` once, when the client has been closed.
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.on_close(listener);
    }

    /// Best-effort send. Fails if the connection is not open right now.
    pub fn send<P: Into<Payload>>(&self, payload: P) -> Result<()> {
        self.inner.connection.send(payload.into())
    }

    /// Serialize `request` as JSON and send it as text.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        self.inner.connection.send_json(request)
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.inner.connection.close();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Check if the connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }
}

/// Non-owning [`Client`] handle, safe to capture in listeners.
#[derive(Clone, Debug)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// The client, unless every owning handle has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}
