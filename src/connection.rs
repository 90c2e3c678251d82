use futures::SinkExt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::codec::StompCodec;
use crate::frame::{Command, Frame, ServerError};
use crate::options::ConnectOptions;
use crate::receiver;
use crate::sink::{SendLog, SentMessage};
use crate::state::{HandshakeStatus, ProtocolState};
use crate::subscription::Subscription;

type FrameWriter = FramedWrite<OwnedWriteHalf, StompCodec>;

/// The login handshake did not end in CONNECTED.
#[derive(Error, Debug)]
#[error("login failed: {message}")]
pub struct LoginError {
    /// Text of the ERROR frame, or why the connection ended first
    pub message: String,
    /// The broker's ERROR frame, when one was received
    pub server_error: Option<ServerError>,
}

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The broker refused the login, or the connection ended during it
    #[error(transparent)]
    Login(#[from] LoginError),
    /// Neither CONNECTED nor ERROR arrived in time
    #[error("handshake timeout: no CONNECTED or ERROR within {0:?}")]
    HandshakeTimeout(Duration),
    /// The configured send-log file could not be opened
    #[error("cannot open send log {path:?}: {source}")]
    SendLog { path: PathBuf, source: io::Error },
    #[error("subscription id not found: {0}")]
    UnknownSubscription(String),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// The broker answered a receipted frame with ERROR
    #[error(transparent)]
    Server(ServerError),
    /// The connection was closed before the operation completed
    #[error("connection closed")]
    Closed,
}

struct Inner {
    login: String,
    state: Arc<ProtocolState>,
    /// `None` once the output has been closed.
    writer: Mutex<Option<FrameWriter>>,
    receiver: std::sync::Mutex<Option<JoinHandle<OwnedReadHalf>>>,
    /// Messages no subscription claimed.
    inbound_rx: Mutex<mpsc::Receiver<Frame>>,
    shutdown_tx: broadcast::Sender<()>,
    send_log: Arc<dyn SendLog>,
    closing: AtomicBool,
    /// Flips to `true` once the disconnect sequence has finished.
    closed: watch::Sender<bool>,
    shutdown_grace: Duration,
    subscription_capacity: usize,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone without `disconnect`: stop the receiver.
        let _ = self.shutdown_tx.send(());
    }
}

/// A logged-in STOMP session over one TCP connection.
///
/// `Connection` is a cheap handle; clones share the same session. A
/// background task reads frames for the lifetime of the session while any
/// number of tasks send through the handle concurrently.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect to `server:port` and log in with default options.
    ///
    /// See [`Connection::connect_with_options`].
    pub async fn connect(
        server: &str,
        port: u16,
        login: &str,
        passcode: &str,
    ) -> Result<Self, ConnError> {
        Self::connect_with_options(server, port, login, passcode, ConnectOptions::default()).await
    }

    /// Connect to `server:port`, send CONNECT and wait for the broker's answer.
    ///
    /// Parameters
    /// - `server`, `port`: broker address.
    /// - `login`, `passcode`: credentials for the CONNECT frame.
    /// - `options`: extra CONNECT headers, handshake timeout, send log and
    ///   channel sizes.
    ///
    /// Returns a live `Connection` once CONNECTED arrives. An ERROR frame (or
    /// the broker closing the socket) before that yields
    /// `ConnError::Login`; a socket that cannot be opened yields
    /// `ConnError::Io`. No retry is attempted. On failure every resource
    /// opened so far is released before returning.
    pub async fn connect_with_options(
        server: &str,
        port: u16,
        login: &str,
        passcode: &str,
        options: ConnectOptions,
    ) -> Result<Self, ConnError> {
        let send_log = options.send_log.build().map_err(|source| ConnError::SendLog {
            path: options.send_log.file_path().map(PathBuf::from).unwrap_or_default(),
            source,
        })?;

        let stream = TcpStream::connect((server, port)).await?;
        debug!(server, port, "socket open");
        let (read_half, write_half) = stream.into_split();

        let (state, inbound_rx) = ProtocolState::new(options.inbound_capacity);
        let state = Arc::new(state);
        let mut handshake = state.handshake_status();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let receiver = receiver::spawn(read_half, state.clone(), shutdown_rx);

        let conn = Connection {
            inner: Arc::new(Inner {
                login: login.to_string(),
                state,
                writer: Mutex::new(Some(FramedWrite::new(write_half, StompCodec::new()))),
                receiver: std::sync::Mutex::new(Some(receiver)),
                inbound_rx: Mutex::new(inbound_rx),
                shutdown_tx,
                send_log,
                closing: AtomicBool::new(false),
                closed: watch::channel(false).0,
                shutdown_grace: options.shutdown_grace,
                subscription_capacity: options.subscription_capacity,
            }),
        };

        let mut connect = Frame::new(Command::Connect);
        if let Some(version) = &options.accept_version {
            connect.set_header("accept-version", version);
        }
        if let Some(host) = &options.host {
            connect.set_header("host", host);
        }
        let connect = connect
            .header("login", login)
            .header("passcode", passcode)
            .with_headers(options.headers.iter().cloned());
        conn.transmit_frame(connect).await;

        match conn.await_handshake(&mut handshake, options.handshake_timeout).await {
            Ok(()) => {
                debug!(login, "logged in");
                Ok(conn)
            }
            Err(e) => {
                debug!(login, error = %e, "login failed");
                conn.disconnect(Vec::new()).await;
                Err(e)
            }
        }
    }

    async fn await_handshake(
        &self,
        status: &mut watch::Receiver<HandshakeStatus>,
        timeout: Option<Duration>,
    ) -> Result<(), ConnError> {
        let wait = async {
            status
                .wait_for(|s| *s != HandshakeStatus::Pending)
                .await
                .map(|_| ())
        };
        match timeout {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, wait).await;
            }
            None => {
                let _ = wait.await;
            }
        }

        // Read the status again even after a timeout so an error that raced
        // the deadline is still reported as such.
        let outcome = status.borrow().clone();
        match outcome {
            HandshakeStatus::Connected => Ok(()),
            HandshakeStatus::Failed(message) => Err(LoginError {
                message,
                server_error: self.inner.state.last_error(),
            }
            .into()),
            HandshakeStatus::Pending => Err(ConnError::HandshakeTimeout(timeout.unwrap_or_default())),
        }
    }

    /// Write one frame. Holding the writer lock for the whole frame keeps
    /// concurrent callers from interleaving bytes.
    async fn write_frame(&self, frame: Frame) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w.send(frame).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        }
    }

    fn report_transmit_failure(&self, command: Command, err: &io::Error) {
        warn!(%command, error = %err, "transmit failed");
        self.inner
            .state
            .dispatch(Frame::local_error(format!("{} failed: {}", command, err)));
    }

    /// Transmit a frame built from its parts. See [`Connection::transmit_frame`].
    pub async fn transmit(&self, command: Command, headers: Vec<(String, String)>, body: Option<Vec<u8>>) {
        let frame = Frame::new(command)
            .with_headers(headers)
            .set_body(body.unwrap_or_default());
        self.transmit_frame(frame).await
    }

    /// Transmit a frame, single attempt.
    ///
    /// Failures are never returned. Instead an ERROR frame describing the
    /// failure goes through the dispatch path, where it is observed exactly
    /// like a broker ERROR (`last_error`, `errors`).
    pub async fn transmit_frame(&self, frame: Frame) {
        let command = frame.command;
        if let Err(e) = self.write_frame(frame).await {
            self.report_transmit_failure(command, &e);
        }
    }

    fn record_sent(&self, destination: &str, body: &str) {
        self.inner.send_log.record(&SentMessage {
            login: self.inner.login.clone(),
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }

    /// Send `body` to `destination`.
    pub async fn send(&self, destination: &str, body: &str) {
        self.send_with_headers(destination, body, Vec::new()).await
    }

    /// Send `body` to `destination` with extra SEND headers.
    pub async fn send_with_headers(&self, destination: &str, body: &str, headers: Vec<(String, String)>) {
        self.record_sent(destination, body);
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .with_headers(headers)
            .set_body(body);
        self.transmit_frame(frame).await
    }

    /// Send a message and wait until the broker confirms it with a RECEIPT.
    ///
    /// Unlike [`Connection::send`] this reports failure to the caller: a
    /// failed write is returned as `ConnError::Io` (and still dispatched as
    /// an ERROR frame), an ERROR naming the receipt as `ConnError::Server`,
    /// a connection that ends first as `ConnError::Closed`, and a missing
    /// receipt as `ConnError::ReceiptTimeout`.
    pub async fn send_with_receipt(
        &self,
        destination: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<(), ConnError> {
        self.record_sent(destination, body);
        let (receipt_id, waiter) = self.inner.state.register_receipt();
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .receipt(&receipt_id)
            .set_body(body);
        if let Err(e) = self.write_frame(frame).await {
            self.inner.state.forget_receipt(&receipt_id);
            self.report_transmit_failure(Command::Send, &e);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(server_error))) => Err(ConnError::Server(server_error)),
            Ok(Err(_)) => Err(ConnError::Closed),
            Err(_) => {
                self.inner.state.forget_receipt(&receipt_id);
                Err(ConnError::ReceiptTimeout(receipt_id))
            }
        }
    }

    /// Subscribe to a destination.
    pub async fn subscribe(&self, destination: &str) -> Result<Subscription, ConnError> {
        self.subscribe_with_headers(destination, Vec::new()).await
    }

    /// Subscribe to a destination, forwarding extra headers (selectors,
    /// durable names, ...) in the SUBSCRIBE frame.
    ///
    /// MESSAGE frames carrying the returned subscription's id, or addressed
    /// to `destination` without a `subscription` header, are delivered to
    /// the returned handle.
    pub async fn subscribe_with_headers(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Subscription, ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let (id, rx) = self
            .inner
            .state
            .add_subscription(destination, self.inner.subscription_capacity);
        let frame = Frame::new(Command::Subscribe)
            .header("id", &id)
            .header("destination", destination)
            .with_headers(headers);
        self.transmit_frame(frame).await;
        Ok(Subscription::new(id, destination.to_string(), rx, self.clone()))
    }

    /// Unsubscribe a previously created subscription by its local id.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ConnError> {
        if !self.inner.state.remove_subscription(subscription_id) {
            return Err(ConnError::UnknownSubscription(subscription_id.to_string()));
        }
        self.transmit_frame(Frame::new(Command::Unsubscribe).header("id", subscription_id))
            .await;
        Ok(())
    }

    /// Next MESSAGE that no subscription claimed. Returns `None` once the
    /// connection is gone and the queue is drained.
    pub async fn next_message(&self) -> Option<Frame> {
        let mut rx = self.inner.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Observe every ERROR frame from this point on, broker-sent or local.
    pub fn errors(&self) -> broadcast::Receiver<ServerError> {
        self.inner.state.subscribe_errors()
    }

    /// The most recent ERROR frame, if any.
    pub fn last_error(&self) -> Option<ServerError> {
        self.inner.state.last_error()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// Whether the disconnect sequence has released the connection.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub fn login(&self) -> &str {
        &self.inner.login
    }

    /// End the session and release every I/O resource.
    ///
    /// Sends DISCONNECT with `headers` if the session is still connected,
    /// stops the receiver task, closes the input, the output and the
    /// socket, then marks the connection disconnected and ends every
    /// subscription and `next_message` stream. Each step runs even
    /// if an earlier one failed; failures are only traced. A later or
    /// concurrent call sends nothing and returns once the first one has
    /// finished.
    pub async fn disconnect(&self, headers: Vec<(String, String)>) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            let mut closed = inner.closed.subscribe();
            // The sender lives in `inner`, so this only ends once closed.
            let _ = closed.wait_for(|done| *done).await;
            return;
        }

        if inner.state.is_connected() {
            self.transmit_frame(Frame::new(Command::Disconnect).with_headers(headers))
                .await;
        }

        let _ = inner.shutdown_tx.send(());
        let receiver = inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let read_half = match receiver {
            Some(handle) => self.stop_receiver(handle).await,
            None => None,
        };

        let writer = inner.writer.lock().await.take();
        let write_half = match writer {
            Some(mut w) => {
                if let Err(e) = SinkExt::<Frame>::close(&mut w).await {
                    debug!(error = %e, "closing output failed");
                }
                Some(w.into_inner())
            }
            None => None,
        };

        match (read_half, write_half) {
            (Some(r), Some(w)) => match r.reunite(w) {
                Ok(stream) => drop(stream),
                Err(e) => debug!(error = %e, "socket halves did not match"),
            },
            // Whatever half survived is dropped here, closing it.
            _ => debug!("socket released without reuniting halves"),
        }

        inner.state.release();
        inner.closed.send_replace(true);
        debug!(login = %inner.login, "disconnected");
    }

    /// Wait for the receiver to stop, aborting it after the grace period.
    async fn stop_receiver(&self, mut handle: JoinHandle<OwnedReadHalf>) -> Option<OwnedReadHalf> {
        match tokio::time::timeout(self.inner.shutdown_grace, &mut handle).await {
            Ok(Ok(read_half)) => Some(read_half),
            Ok(Err(e)) => {
                debug!(error = %e, "receiver task ended abnormally");
                None
            }
            Err(_) => {
                warn!("receiver did not stop in time, aborting");
                handle.abort();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_error_display_carries_message() {
        let err: ConnError = LoginError {
            message: "bad credentials".to_string(),
            server_error: None,
        }
        .into();
        assert_eq!(err.to_string(), "login failed: bad credentials");
    }

    #[test]
    fn server_error_display_is_the_broker_error() {
        let frame = Frame::new(Command::Error).header("message", "queue full");
        let err = ConnError::Server(ServerError::from_frame(frame));
        assert_eq!(err.to_string(), "STOMP server error: queue full");
    }

    #[test]
    fn handshake_timeout_display() {
        let err = ConnError::HandshakeTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
