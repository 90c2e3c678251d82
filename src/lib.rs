//! Async STOMP client.
//!
//! [`Connection::connect`] opens a TCP connection, sends CONNECT and returns
//! only once the broker has answered with CONNECTED (or fails with a
//! [`LoginError`] when it answers with ERROR). A background task then
//! receives frames for the life of the session while the handle sends
//! from any number of tasks. [`Connection::disconnect`] tears it all down.
//!
//! ```no_run
//! use stomp_link::Connection;
//!
//! # async fn run() -> Result<(), stomp_link::ConnError> {
//! let conn = Connection::connect("localhost", 61613, "guest", "guest").await?;
//! let mut sub = conn.subscribe("/queue/in").await?;
//! conn.send("/queue/out", "hello").await;
//! if let Some(msg) = sub.recv().await {
//!     println!("{}", msg);
//! }
//! conn.disconnect(Vec::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod frame;
pub mod options;
pub mod parser;
mod receiver;
pub mod sink;
mod state;
pub mod subscription;

pub use codec::{StompCodec, StompItem};
pub use connection::{ConnError, Connection, LoginError};
pub use frame::{Command, Frame, ServerError};
pub use options::ConnectOptions;
pub use sink::{FileSendLog, SendLog, SendLogConfig, SentMessage, TracingSendLog};
pub use subscription::Subscription;
