#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Probe payload sent when no message is configured.
pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "heartbeat";
/// Probe interval used when none is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);
/// Fixed delay between failed connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Application callback without arguments, invoked on connection success or completion.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn() + Send + Sync>);

impl Callback {
    pub(crate) fn call(&self) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.0)())).is_ok()
    }
}

impl<F: Fn() + Send + Sync + 'static> From<F> for Callback {
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Application callback invoked with the error of a failed connection attempt.
#[derive(Clone)]
pub struct FailureCallback(Arc<dyn Fn(&Error) + Send + Sync>);

impl FailureCallback {
    pub(crate) fn call(&self, error: &Error) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.0)(error))).is_ok()
    }
}

impl<F: Fn(&Error) + Send + Sync + 'static> From<F> for FailureCallback {
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for FailureCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureCallback")
    }
}

/// Where and how to connect.
///
/// Every reconnection reuses this configuration verbatim.
///
/// ```
/// use std::time::Duration;
///
/// use heartbeat_ws::ws::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .address("wss://example.com/socket?token=secret")
///     .protocols(vec!["json".to_owned()])
///     .retry_delay(Duration::from_secs(1))
///     .on_success(|| println!("connected"))
///     .build();
///
/// assert_eq!(config.redacted_address(), "wss://example.com/socket");
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct ConnectionConfig {
    /// The address to connect to, e.g. `wss://example.com/socket`. Must not be blank.
    #[builder(into)]
    address: String,
    /// Extra headers sent with the opening handshake
    #[builder(default)]
    headers: Vec<(String, String)>,
    /// Sub-protocols offered during the opening handshake
    #[builder(default)]
    protocols: Vec<String>,
    /// How long to wait after a failed connection attempt before trying again.
    /// The default is three (3) seconds.
    #[builder(default = DEFAULT_RETRY_DELAY)]
    retry_delay: Duration,
    /// Invoked after every successful connection attempt
    #[builder(into)]
    on_success: Option<Callback>,
    /// Invoked after every failed connection attempt, before the retry is scheduled
    #[builder(into)]
    on_failure: Option<FailureCallback>,
    /// Invoked after every connection attempt, successful or not
    #[builder(into)]
    on_complete: Option<Callback>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// The address without its query string, suitable for logs.
    #[must_use]
    pub fn redacted_address(&self) -> String {
        match Url::parse(&self.address) {
            Ok(mut url) => {
                url.set_query(None);
                url.set_fragment(None);
                url.to_string()
            }
            Err(_) => self
                .address
                .split_once('?')
                .map_or_else(|| self.address.clone(), |(head, _)| head.to_owned()),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::config("address must not be empty"));
        }

        Ok(())
    }

    /// Schedule of delays between failed connection attempts. Never exhausts.
    pub(crate) fn retry_schedule(&self) -> Constant {
        Constant::new(self.retry_delay)
    }

    pub(crate) fn notify_success(&self) {
        if let Some(callback) = &self.on_success
            && !callback.call()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("on_success callback panicked");
        }
    }

    pub(crate) fn notify_failure(&self, error: &Error) {
        if let Some(callback) = &self.on_failure
            && !callback.call(error)
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("on_failure callback panicked");
        }
    }

    pub(crate) fn notify_complete(&self) {
        if let Some(callback) = &self.on_complete
            && !callback.call()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("on_complete callback panicked");
        }
    }
}

/// Heartbeat probing behavior.
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct HeartbeatConfig {
    /// Text payload sent on every tick. Inbound text equal to it is swallowed.
    #[builder(into, default = DEFAULT_HEARTBEAT_MESSAGE.to_owned())]
    message: String,
    /// How often the probe is sent while the connection is open. The default is fifty (50)
    /// seconds.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HeartbeatConfig {
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("heartbeat interval must be greater than zero"));
        }

        Ok(())
    }
}
