#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test file uses every helper, which is falsely flagged as unused"
)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as channel;
use futures::{Sink, SinkExt as _, StreamExt as _};
use heartbeat_ws::Client;
use heartbeat_ws::error::{Error, Kind};
use heartbeat_ws::ws::config::{ConnectionConfig, HeartbeatConfig};
use heartbeat_ws::ws::connection::ConnectionState;
use heartbeat_ws::ws::transport::{Connection, Handshake, Payload, Transport, TransportEvent};
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep, timeout};

pub const ADDRESS: &str = "wss://x";

/// Upper bound on any wait in virtual time.
pub const PATIENCE: Duration = Duration::from_secs(120);

/// A payload the client wrote to one of its connections.
#[derive(Debug)]
pub struct Sent {
    /// Index of the connection, in open order
    pub connection: usize,
    pub payload: Payload,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    fail_next: usize,
    ignore_close: bool,
    defer_handshake: bool,
    /// While set, connection attempts wait here until released
    gate: Option<Arc<Notify>>,
    opens: Vec<Instant>,
    peers: Vec<channel::UnboundedSender<TransportEvent>>,
}

/// In-memory transport. Each open either fails (as scripted) or yields a connection whose
/// first event is `Opened`, and which confirms a close from the client with `Closed`.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    sent_tx: mpsc::UnboundedSender<Sent>,
}

/// The server side of a [`MockTransport`].
pub struct MockPeer {
    state: Arc<Mutex<State>>,
    sent_rx: mpsc::UnboundedReceiver<Sent>,
}

#[must_use]
pub fn mock_transport() -> (MockTransport, MockPeer) {
    let state = Arc::new(Mutex::new(State::default()));
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();

    (
        MockTransport {
            state: Arc::clone(&state),
            sent_tx,
        },
        MockPeer { state, sent_rx },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _config: &ConnectionConfig) -> heartbeat_ws::Result<Connection> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.opens.push(Instant::now());
            state.gate.clone()
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        let (index, confirm_close, event_tx, event_rx) = {
            let mut state = self.state.lock().unwrap();

            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::with_source(
                    Kind::Connect,
                    io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
                ));
            }

            let (event_tx, event_rx) = channel::unbounded();
            if !state.defer_handshake {
                event_tx
                    .unbounded_send(TransportEvent::Opened(Handshake::default()))
                    .unwrap();
            }
            state.peers.push(event_tx.clone());

            (state.peers.len() - 1, !state.ignore_close, event_tx, event_rx)
        };

        let (sink_tx, mut sink_rx) = channel::unbounded::<Payload>();
        let sent_tx = self.sent_tx.clone();

        tokio::spawn(async move {
            while let Some(payload) = sink_rx.next().await {
                drop(sent_tx.send(Sent {
                    connection: index,
                    payload,
                    at: Instant::now(),
                }));
            }

            // The client closed its sink: answer like a server completing the close handshake
            if confirm_close {
                drop(event_tx.unbounded_send(TransportEvent::Closed));
            }
        });

        let sink = sink_tx.sink_map_err(|e| Error::with_source(Kind::Transport, e));

        Ok(Connection::new(Box::pin(sink), Box::pin(event_rx)))
    }
}

impl MockPeer {
    /// Number of connection attempts so far, failed ones included.
    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    /// When each connection attempt happened.
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// Never confirm a close requested by the client.
    pub fn ignore_close(&self) {
        self.state.lock().unwrap().ignore_close = true;
    }

    /// Leave new connections unopened until [`MockPeer::accept`] is called.
    pub fn defer_handshake(&self) {
        self.state.lock().unwrap().defer_handshake = true;
    }

    /// Complete the handshake of the most recent connection.
    pub fn accept(&self) {
        self.emit(TransportEvent::Opened(Handshake::default()));
    }

    /// Make connection attempts hang until [`MockPeer::release_opens`].
    pub fn hold_opens(&self) {
        self.state.lock().unwrap().gate = Some(Arc::new(Notify::new()));
    }

    /// Let held connection attempts proceed.
    pub fn release_opens(&self) {
        if let Some(gate) = self.state.lock().unwrap().gate.take() {
            gate.notify_waiters();
        }
    }

    /// Raise `event` on the most recent connection.
    pub fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        let peer = state.peers.last().unwrap();
        drop(peer.unbounded_send(event));
    }

    pub fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(Payload::text(text)));
    }

    /// Drop the most recent connection from the server side.
    pub fn drop_connection(&self) {
        self.emit(TransportEvent::Closed);
    }

    /// Wait for the next payload written by the client.
    pub async fn next_sent(&mut self) -> Sent {
        timeout(PATIENCE, self.sent_rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    /// Everything written by the client that has not been received yet.
    pub fn drain_sent(&mut self) -> Vec<Sent> {
        let mut sent = Vec::new();
        while let Ok(next) = self.sent_rx.try_recv() {
            sent.push(next);
        }
        sent
    }

    /// Wait until at least `count` connection attempts happened.
    pub async fn wait_for_opens(&self, count: usize) {
        timeout(PATIENCE, async {
            while self.opens() < count {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }
}

#[must_use]
pub fn connection_config() -> ConnectionConfig {
    ConnectionConfig::builder().address(ADDRESS).build()
}

#[must_use]
pub fn heartbeat(message: &str, interval_ms: u64) -> HeartbeatConfig {
    HeartbeatConfig::builder()
        .message(message)
        .interval(Duration::from_millis(interval_ms))
        .build()
}

/// Wait until the client's state satisfies `predicate`.
pub async fn wait_until<F>(client: &Client, predicate: F)
where
    F: Fn(ConnectionState) -> bool,
{
    let mut state = client.state_receiver();
    timeout(PATIENCE, state.wait_for(|state| predicate(*state)))
        .await
        .unwrap()
        .unwrap();
}

/// Let every task that is ready run, without moving the clock meaningfully.
pub async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

/// A counter that can be moved into listeners.
#[derive(Clone, Default)]
pub struct Counter(Arc<Mutex<usize>>);

impl Counter {
    pub fn hit(&self) {
        *self.0.lock().unwrap() += 1;
    }

    pub fn get(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

/// An ordered log that can be moved into listeners.
#[derive(Clone)]
pub struct Log<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Log<T> {
    fn default() -> Self {
        Self(Arc::default())
    }
}

impl<T: Clone> Log<T> {
    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn entries(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

/// Which half of a [`StalledTransport`] connection never completes.
#[derive(Clone, Copy, Debug)]
pub enum Stall {
    /// Writes are accepted but never flushed
    Write,
    /// Closing never finishes
    Close,
}

/// A transport whose connections open normally and then hang on the side picked by
/// [`Stall`], the way a socket does against a peer that stopped reading.
#[derive(Clone)]
pub struct StalledTransport {
    stall: Stall,
    opens: Arc<Mutex<usize>>,
    /// Keeps every event stream open
    peers: Arc<Mutex<Vec<channel::UnboundedSender<TransportEvent>>>>,
}

impl StalledTransport {
    #[must_use]
    pub fn new(stall: Stall) -> Self {
        Self {
            stall,
            opens: Arc::default(),
            peers: Arc::default(),
        }
    }

    pub fn opens(&self) -> usize {
        *self.opens.lock().unwrap()
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn open(&self, _config: &ConnectionConfig) -> heartbeat_ws::Result<Connection> {
        *self.opens.lock().unwrap() += 1;

        let (event_tx, event_rx) = channel::unbounded();
        event_tx
            .unbounded_send(TransportEvent::Opened(Handshake::default()))
            .unwrap();
        self.peers.lock().unwrap().push(event_tx);

        let sink = StalledSink { stall: self.stall };
        Ok(Connection::new(Box::pin(sink), Box::pin(event_rx)))
    }
}

struct StalledSink {
    stall: Stall,
}

impl Sink<Payload> for StalledSink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, _item: Payload) -> Result<(), Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        match self.stall {
            Stall::Write => Poll::Pending,
            Stall::Close => Poll::Ready(Ok(())),
        }
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Pending
    }
}
