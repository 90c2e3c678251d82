//! Background task that decodes inbound frames and feeds the dispatch path.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::frame::Frame;
use crate::state::ProtocolState;

/// Spawn the receiver loop over `reader`.
///
/// The loop runs until `shutdown` fires or the stream ends, dispatching
/// frames in wire order. Its task resolves to the reader so the owner can
/// close the transport explicitly.
pub(crate) fn spawn<R>(
    reader: R,
    state: Arc<ProtocolState>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run(FramedRead::new(reader, StompCodec::new()), state, shutdown))
}

/// Marks the stream closed however the loop ends, unwinding included, so a
/// pending handshake never outlives the receiver.
struct StreamClosedOnExit(Arc<ProtocolState>);

impl Drop for StreamClosedOnExit {
    fn drop(&mut self) {
        self.0.stream_closed();
    }
}

async fn run<R>(
    mut frames: FramedRead<R, StompCodec>,
    state: Arc<ProtocolState>,
    mut shutdown: broadcast::Receiver<()>,
) -> R
where
    R: AsyncRead + Unpin,
{
    let _closed = StreamClosedOnExit(state.clone());
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("receiver cancelled");
                break;
            }
            item = frames.next() => match item {
                Some(Ok(StompItem::Heartbeat)) => trace!("heart-beat"),
                Some(Ok(StompItem::Frame(frame))) => state.dispatch(frame),
                Some(Err(e)) => {
                    warn!(error = %e, "receive failed");
                    state.dispatch(Frame::local_error(format!("receive failed: {}", e)));
                    break;
                }
                None => {
                    debug!("stream closed by peer");
                    break;
                }
            }
        }
    }
    frames.into_inner()
}
