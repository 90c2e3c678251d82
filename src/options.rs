use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::sink::{SendLog, SendLogConfig};

/// Default time the disconnect sequence waits for the receiver task to stop
/// before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Default capacity of the queue holding messages no subscription claimed.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

/// Default capacity of each subscription's channel.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 16;

/// Options for [`Connection::connect_with_options`](crate::Connection::connect_with_options).
///
/// Built with chained setters starting from `ConnectOptions::default()`.
///
/// ```
/// use std::time::Duration;
/// use stomp_link::ConnectOptions;
///
/// let opts = ConnectOptions::default()
///     .accept_version("1.2")
///     .host("/")
///     .handshake_timeout(Duration::from_secs(5));
/// assert_eq!(opts.handshake_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `accept-version` header for CONNECT; omitted when `None`
    pub accept_version: Option<String>,
    /// `host` header for CONNECT; omitted when `None`
    pub host: Option<String>,
    /// Extra CONNECT headers, sent after the built-in ones
    pub headers: Vec<(String, String)>,
    /// Upper bound on the wait for CONNECTED/ERROR. `None` waits until the
    /// broker answers or closes the connection.
    pub handshake_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub inbound_capacity: usize,
    pub subscription_capacity: usize,
    pub send_log: SendLogConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            accept_version: None,
            host: None,
            headers: Vec::new(),
            handshake_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            send_log: SendLogConfig::default(),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_version(mut self, version: impl Into<String>) -> Self {
        self.accept_version = Some(version.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Add a custom CONNECT header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    /// Record sent messages through a caller-supplied sink.
    pub fn send_log(mut self, sink: Arc<dyn SendLog>) -> Self {
        self.send_log = SendLogConfig::Custom(sink);
        self
    }

    /// Record sent messages by appending to `path`.
    pub fn send_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.send_log = SendLogConfig::File(path.into());
        self
    }
}
