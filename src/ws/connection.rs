#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;

use super::config::{ConnectionConfig, HeartbeatConfig};
use super::error::WsError;
use super::heartbeat::Heartbeat;
use super::listeners::ListenerRegistry;
use super::transport::{Connection, Payload, PayloadSink, Transport, TransportEvent};
use crate::Result;

/// How long an intentional close waits for the transport to confirm before finishing anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening a transport connection
    Connecting,
    /// Connected, heartbeat running
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Between connections, after an unexpected close or a failed attempt
    Reconnecting {
        /// Consecutive failed connection attempts so far. `0` right after an open connection
        /// dropped, since that reconnect happens immediately without a retry delay.
        attempt: u32,
    },
    /// Closed on request. Terminal.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if the connection reached its terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Handle to the task that owns the connection lifecycle.
///
/// The task opens transport connections, runs the heartbeat while one is open, filters
/// probe echoes out of the inbound stream, dispatches notifications to the
/// [`ListenerRegistry`] and reconnects whenever a connection ends without
/// [`ConnectionManager::close`] having been called. Connection failures are retried on a
/// fixed delay with no attempt limit.
///
/// Handles are cheap to clone. Dropping the last one closes the connection.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Watch channel receiver for checking the current state
    state_rx: watch::Receiver<ConnectionState>,
    /// Sender channel for outgoing messages
    sender_tx: mpsc::UnboundedSender<Payload>,
    /// Set once by `close`, never reset
    active_close: Arc<AtomicBool>,
    /// Wakes the connection task when `close` is called
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Validate the configuration and start the connection task on the current tokio runtime.
    ///
    /// Nothing is opened when validation fails.
    pub fn new<T: Transport>(
        config: ConnectionConfig,
        heartbeat: HeartbeatConfig,
        transport: T,
        listeners: Arc<ListenerRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        heartbeat.validate()?;
        let runtime = Handle::try_current()?;

        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let active_close = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let driver = Driver {
            config,
            transport,
            heartbeat: Heartbeat::new(heartbeat),
            listeners,
            sender_rx,
            state_tx: state_tx.clone(),
            active_close: Arc::clone(&active_close),
            shutdown: shutdown.clone(),
            handles_dropped: false,
        };

        runtime.spawn(driver.run());

        Ok(Self {
            state_tx,
            state_rx,
            sender_tx,
            active_close,
            shutdown,
        })
    }

    /// Send a payload over the current connection.
    ///
    /// Nothing is buffered: a payload sent while the connection is not open is rejected with
    /// [`WsError::NotConnected`].
    pub fn send(&self, payload: Payload) -> Result<()> {
        if self.is_active_close() {
            return Err(WsError::ConnectionClosed.into());
        }

        if !self.state().is_open() {
            return Err(WsError::NotConnected.into());
        }

        self.sender_tx
            .send(payload)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Serialize `request` as JSON and send it as a text payload.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(Payload::Text(json))
    }

    /// Close the connection for good. Reconnection stops and close listeners run once.
    pub fn close(&self) {
        if !self.active_close.swap(true, Ordering::SeqCst) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Close requested");
        }

        self.shutdown.cancel();
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_active_close(&self) -> bool {
        self.active_close.load(Ordering::SeqCst)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Useful for waiting until the connection is open or has been closed.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

/// Why a connection ended.
enum Disconnect {
    Active,
    Unexpected,
}

/// The connection task. Owns the transport connection and the heartbeat.
struct Driver<T: Transport> {
    config: ConnectionConfig,
    transport: T,
    heartbeat: Heartbeat,
    listeners: Arc<ListenerRegistry>,
    sender_rx: mpsc::UnboundedReceiver<Payload>,
    state_tx: watch::Sender<ConnectionState>,
    active_close: Arc<AtomicBool>,
    shutdown: CancellationToken,
    handles_dropped: bool,
}

impl<T: Transport> Driver<T> {
    /// Main connection loop with automatic reconnection.
    async fn run(mut self) {
        let mut retry = self.config.retry_schedule();
        let mut attempt = 0_u32;

        loop {
            // Checked before every attempt so a close during a pending retry never connects
            if self.is_active_close() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,
                result = self.transport.open(&self.config) => result,
            };

            match opened {
                Ok(connection) => {
                    attempt = 0;
                    retry.reset();

                    #[cfg(feature = "tracing")]
                    tracing::debug!(address = %self.config.redacted_address(), "Connected");

                    self.config.notify_success();
                    self.config.notify_complete();

                    match self.drive(connection).await {
                        Disconnect::Active => break,
                        Disconnect::Unexpected => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                address = %self.config.redacted_address(),
                                "Connection closed unexpectedly, reconnecting"
                            );

                            self.set_state(ConnectionState::Reconnecting { attempt });
                            self.discard_pending();
                        }
                    }
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        address = %self.config.redacted_address(),
                        attempt,
                        error = %e,
                        "Unable to connect"
                    );

                    self.config.notify_failure(&e);
                    self.config.notify_complete();
                    self.set_state(ConnectionState::Reconnecting { attempt });

                    let delay = retry
                        .next_backoff()
                        .unwrap_or_else(|| self.config.retry_delay());
                    if !self.wait(delay).await {
                        break;
                    }
                }
            }
        }

        self.heartbeat.stop();
        self.set_state(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.config.redacted_address(), "Connection closed");

        self.listeners.dispatch_close();
    }

    /// Pump one open connection until it ends.
    async fn drive(&mut self, connection: Connection) -> Disconnect {
        let Connection {
            mut sink,
            mut events,
        } = connection;

        // Per-connection probe channel: probes queued for a dead connection die with it
        let (probe_tx, mut probe_rx) = mpsc::unbounded_channel();
        let mut open = false;
        let mut closing: Option<tokio::time::Instant> = None;

        loop {
            let writable = open && closing.is_none();

            tokio::select! {
                biased;

                event = events.next() => match event {
                    Some(TransportEvent::Opened(handshake)) => {
                        if closing.is_some() {
                            #[cfg(feature = "tracing")]
                            tracing::trace!("Ignoring open, connection is closing");
                            continue;
                        }

                        open = true;
                        self.set_state(ConnectionState::Open { since: Instant::now() });
                        self.listeners.dispatch_open(&handshake);
                        self.heartbeat.start(probe_tx.clone());
                    }
                    Some(TransportEvent::Message(payload)) => {
                        if self.heartbeat.is_probe(&payload) {
                            #[cfg(feature = "tracing")]
                            tracing::trace!("Heartbeat received");
                        } else {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(len = payload.len(), "Received message");

                            self.listeners.dispatch_message(&payload);
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Transport error");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;

                        self.listeners.dispatch_error();
                    }
                    Some(TransportEvent::Closed) | None => {
                        self.heartbeat.stop();

                        return if self.is_active_close() {
                            Disconnect::Active
                        } else {
                            Disconnect::Unexpected
                        };
                    }
                },

                () = self.shutdown.cancelled(), if closing.is_none() => {
                    let deadline = tokio::time::Instant::now() + CLOSE_TIMEOUT;
                    closing = Some(deadline);
                    self.heartbeat.stop();

                    // The close frame itself may never flush against a stalled peer
                    match timeout_at(deadline, sink.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(error = %e, "Error while closing connection");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                        Err(_elapsed) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Transport did not close in time");

                            return Disconnect::Active;
                        }
                    }
                }

                () = sleep_until(closing.unwrap_or_else(tokio::time::Instant::now)), if closing.is_some() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Transport did not confirm close in time");

                    self.heartbeat.stop();
                    return Disconnect::Active;
                }

                Some(probe) = probe_rx.recv() => {
                    self.write(&mut sink, probe, writable).await;
                }

                payload = self.sender_rx.recv(), if !self.handles_dropped => match payload {
                    Some(payload) => self.write(&mut sink, payload, writable).await,
                    None => self.release(),
                },
            }
        }
    }

    /// Wait out a retry delay. Returns `false` if closed meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => return false,
                () = &mut deadline => return true,
                payload = self.sender_rx.recv(), if !self.handles_dropped => match payload {
                    Some(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Dropping payload, connection is not open");
                    }
                    None => self.release(),
                },
            }
        }
    }

    async fn write(&self, sink: &mut PayloadSink, payload: Payload, writable: bool) {
        if !writable {
            #[cfg(feature = "tracing")]
            tracing::trace!("Dropping payload, connection is not open");
            return;
        }

        // A write stuck on a stalled peer must not hold off a close
        let sent = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Abandoning payload, connection is closing");
                return;
            }
            sent = sink.send(payload) => sent,
        };

        if let Err(e) = sent {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Unable to send payload");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;

            self.listeners.dispatch_error();
        }
    }

    /// Payloads queued for a connection that died are lost, not carried to the next one.
    fn discard_pending(&mut self) {
        while let Ok(_payload) = self.sender_rx.try_recv() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Dropping payload queued for the lost connection");
        }
    }

    /// Every handle is gone, so nobody can close us explicitly anymore.
    fn release(&mut self) {
        self.handles_dropped = true;
        self.active_close.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    fn is_active_close(&self) -> bool {
        self.active_close.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}
