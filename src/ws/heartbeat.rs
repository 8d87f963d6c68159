use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::config::HeartbeatConfig;
use super::transport::Payload;

/// Sends the probe payload on a fixed interval while a connection is open.
///
/// At most one probe task is alive at a time: [`Heartbeat::start`] cancels the previous one
/// before spawning, and dropping the controller cancels whatever is running.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, task: None }
    }

    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Whether a probe task is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    /// Whether `payload` is the probe (or its echo) rather than application data.
    #[must_use]
    pub fn is_probe(&self, payload: &Payload) -> bool {
        payload.as_text() == Some(self.config.message())
    }

    /// Start probing through `sender`. The first probe goes out one full interval from now.
    ///
    /// Any previously started probe task is cancelled first.
    pub fn start(&mut self, sender: mpsc::UnboundedSender<Payload>) {
        self.stop();

        let token = CancellationToken::new();
        let period = self.config.interval();
        let message = self.config.message().to_owned();

        let token_clone = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token_clone.cancelled() => break,
                    _ = ticker.tick() => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%message, "Sending heartbeat");

                        if sender.send(Payload::Text(message.clone())).is_err() {
                            // Connection loop is gone
                            break;
                        }
                    }
                }
            }
        });

        self.task = Some((token, handle));
    }

    /// Stop probing. Does nothing when no probe task is running.
    pub fn stop(&mut self) {
        if let Some((token, _handle)) = self.task.take() {
            token.cancel();

            #[cfg(feature = "tracing")]
            tracing::debug!("Heartbeat stopped");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
