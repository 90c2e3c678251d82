//! Diagnostic trail of outbound messages.
//!
//! Every [`Connection::send`](crate::Connection::send) is recorded through a
//! [`SendLog`] chosen at connect time. The log is a side channel: it never
//! affects what goes on the wire, and a failing log write is only traced.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// One outbound message as seen by the send log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Login of the connection that sent the message
    pub login: String,
    pub destination: String,
    /// Body rendered as text (lossy for binary bodies)
    pub body: String,
}

impl fmt::Display for SentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message sent:\ndestination:{}\n\n{}\n",
            self.destination, self.body
        )
    }
}

/// Receives a record of every message sent on a connection.
pub trait SendLog: Send + Sync {
    fn record(&self, message: &SentMessage);
}

/// Emits each sent message as a `tracing` event on target
/// `stomp_link::sent`, keyed by login.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSendLog;

impl SendLog for TracingSendLog {
    fn record(&self, message: &SentMessage) {
        tracing::info!(
            target: "stomp_link::sent",
            login = %message.login,
            destination = %message.destination,
            body = %message.body,
            "message sent"
        );
    }
}

/// Appends each sent message to a file.
pub struct FileSendLog {
    path: PathBuf,
    file: Mutex<LineWriter<File>>,
}

impl FileSendLog {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(LineWriter::new(file)),
        })
    }

    /// The conventional per-login log file name, `<login>.log`.
    pub fn default_path(login: &str) -> PathBuf {
        PathBuf::from(format!("{}.log", login))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileSendLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSendLog").field("path", &self.path).finish()
    }
}

impl SendLog for FileSendLog {
    fn record(&self, message: &SentMessage) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = write!(file, "[{}] {}", message.login, message).and_then(|_| file.flush()) {
            tracing::warn!(path = %self.path.display(), error = %e, "send log write failed");
        }
    }
}

/// How a connection obtains its send log.
#[derive(Clone, Default)]
pub enum SendLogConfig {
    /// Record through `tracing` ([`TracingSendLog`])
    #[default]
    Tracing,
    /// Append to the given file ([`FileSendLog`]); failing to open it fails
    /// the connect call
    File(PathBuf),
    /// Use a caller-supplied sink
    Custom(Arc<dyn SendLog>),
}

impl SendLogConfig {
    pub(crate) fn build(&self) -> io::Result<Arc<dyn SendLog>> {
        Ok(match self {
            SendLogConfig::Tracing => Arc::new(TracingSendLog),
            SendLogConfig::File(path) => Arc::new(FileSendLog::open(path)?),
            SendLogConfig::Custom(sink) => Arc::clone(sink),
        })
    }

    pub(crate) fn file_path(&self) -> Option<&Path> {
        match self {
            SendLogConfig::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Debug for SendLogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendLogConfig::Tracing => f.write_str("Tracing"),
            SendLogConfig::File(path) => f.debug_tuple("File").field(path).finish(),
            SendLogConfig::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
