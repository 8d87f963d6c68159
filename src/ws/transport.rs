//! Boundary between the connection manager and the socket library.
//!
//! A [`Transport`] opens a [`Connection`]: a sink for outgoing [`Payload`]s and a stream of
//! [`TransportEvent`]s. Closing the sink is the close operation, and a stream that ends is
//! treated as [`TransportEvent::Closed`].

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use super::config::ConnectionConfig;
use crate::Result;
use crate::error::Error;

/// A single data value carried by the connection.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Build a text payload.
    #[must_use]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::Text(text.into())
    }

    /// The textual content, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// What the peer answered when the connection opened.
#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Response headers, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
}

impl Handshake {
    #[must_use]
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

/// Raw notification raised by a transport connection.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is ready for traffic
    Opened(Handshake),
    /// A data value arrived
    Message(Payload),
    /// The connection reported a runtime error
    Error(Error),
    /// The connection is gone
    Closed,
}

pub type PayloadSink = Pin<Box<dyn Sink<Payload, Error = Error> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// One opened transport connection.
#[non_exhaustive]
pub struct Connection {
    pub sink: PayloadSink,
    pub events: EventStream,
}

impl Connection {
    #[must_use]
    pub fn new(sink: PayloadSink, events: EventStream) -> Self {
        Self { sink, events }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections for the connection manager.
///
/// Implementations should emit [`TransportEvent::Opened`] as the first event of every
/// connection they return, and map connection failures to
/// [`Kind::Connect`](crate::error::Kind::Connect).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, config: &ConnectionConfig) -> Result<Connection>;
}

#[cfg(feature = "tungstenite")]
pub use tungstenite::WsTransport;

#[cfg(feature = "tungstenite")]
mod tungstenite {
    use futures::future::ready;
    use futures::stream::once;
    use futures::{SinkExt as _, StreamExt as _};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
    use tokio_tungstenite::tungstenite::http;
    use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

    use super::{Connection, Handshake, Payload, Transport, TransportEvent};
    use crate::Result;
    use crate::error::{Error, Kind};
    use crate::ws::config::ConnectionConfig;
    use crate::ws::error::WsError;

    /// [`Transport`] backed by `tokio-tungstenite`.
    #[non_exhaustive]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct WsTransport;

    impl From<Payload> for Message {
        fn from(payload: Payload) -> Self {
            match payload {
                Payload::Text(text) => Message::Text(text.into()),
                Payload::Binary(bytes) => Message::Binary(bytes.into()),
            }
        }
    }

    fn connect_error<E: Into<WsError>>(e: E) -> Error {
        Error::with_source(Kind::Connect, e.into())
    }

    impl From<tokio_tungstenite::tungstenite::Error> for WsError {
        fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
            WsError::Connection(e)
        }
    }

    impl From<http::Error> for WsError {
        fn from(e: http::Error) -> Self {
            WsError::Handshake(e)
        }
    }

    fn into_event(
        message: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
    ) -> Option<TransportEvent> {
        match message {
            Ok(Message::Text(text)) => Some(TransportEvent::Message(Payload::Text(
                text.as_str().to_owned(),
            ))),
            Ok(Message::Binary(bytes)) => {
                Some(TransportEvent::Message(Payload::Binary(bytes.to_vec())))
            }
            Ok(Message::Close(_)) => Some(TransportEvent::Closed),
            // Ping/Pong are answered by tungstenite itself
            Ok(_) => None,
            Err(e) => Some(TransportEvent::Error(e.into())),
        }
    }

    #[async_trait::async_trait]
    impl Transport for WsTransport {
        async fn open(&self, config: &ConnectionConfig) -> Result<Connection> {
            let mut request = config.address().into_client_request().map_err(connect_error)?;

            for (name, value) in config.headers() {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| connect_error(http::Error::from(e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| connect_error(http::Error::from(e)))?;
                request.headers_mut().append(name, value);
            }

            if !config.protocols().is_empty() {
                let protocols = HeaderValue::from_str(&config.protocols().join(", "))
                    .map_err(|e| connect_error(http::Error::from(e)))?;
                request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocols);
            }

            let (ws_stream, response) = connect_async(request).await.map_err(connect_error)?;

            let handshake = Handshake::new(
                response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.as_str().to_owned(), value.to_owned()))
                    })
                    .collect(),
            );

            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(Error::from)
                .with(|payload: Payload| ready(Ok::<_, Error>(Message::from(payload))));

            let events = once(ready(TransportEvent::Opened(handshake)))
                .chain(read.filter_map(|message| ready(into_event(message))))
                .chain(once(ready(TransportEvent::Closed)));

            Ok(Connection::new(Box::pin(sink), Box::pin(events)))
        }
    }

}
