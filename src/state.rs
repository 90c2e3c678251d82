//! Shared protocol state and the dispatch path.
//!
//! Every frame, whether decoded by the receiver task or synthesized locally
//! after a failed write, goes through [`ProtocolState::dispatch`]. That keeps
//! a single place that flips `connected`, records errors, resolves the login
//! handshake and fans messages out to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::frame::{Command, Frame, ServerError};

/// Progress of the CONNECT/CONNECTED exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandshakeStatus {
    Pending,
    Connected,
    Failed(String),
}

/// Internal subscription entry stored for each destination.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: String,
    pub(crate) sender: mpsc::Sender<Frame>,
}

/// destination -> subscriptions listening on it
pub(crate) type Subscriptions = HashMap<String, Vec<SubscriptionEntry>>;

/// Answer to a receipted frame: the RECEIPT, or an ERROR naming it.
pub(crate) type ReceiptOutcome = Result<(), ServerError>;

/// receipt-id -> waiter notified when the RECEIPT (or ERROR) arrives
pub(crate) type PendingReceipts = HashMap<String, oneshot::Sender<ReceiptOutcome>>;

const ERROR_BROADCAST_CAPACITY: usize = 16;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ProtocolState {
    connected: AtomicBool,
    last_error: Mutex<Option<ServerError>>,
    handshake: watch::Sender<HandshakeStatus>,
    errors: broadcast::Sender<ServerError>,
    subscriptions: Mutex<Subscriptions>,
    sub_id_counter: AtomicU64,
    receipts: Mutex<PendingReceipts>,
    receipt_counter: AtomicU64,
    /// `None` once the session has been released.
    inbound_tx: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl ProtocolState {
    /// Create the state and the receiving end of the unrouted-message queue.
    pub(crate) fn new(inbound_capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (handshake, _) = watch::channel(HandshakeStatus::Pending);
        let (errors, _) = broadcast::channel(ERROR_BROADCAST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let state = Self {
            connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
            handshake,
            errors,
            subscriptions: Mutex::new(HashMap::new()),
            sub_id_counter: AtomicU64::new(1),
            receipts: Mutex::new(HashMap::new()),
            receipt_counter: AtomicU64::new(1),
            inbound_tx: Mutex::new(Some(inbound_tx)),
        };
        (state, inbound_rx)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// End of session: drop every channel sender so subscribers and
    /// `next_message` callers see the stream end.
    pub(crate) fn release(&self) {
        self.resolve_handshake(HandshakeStatus::Failed("connection released".to_string()));
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.subscriptions).clear();
        lock(&self.receipts).clear();
        lock(&self.inbound_tx).take();
    }

    pub(crate) fn last_error(&self) -> Option<ServerError> {
        lock(&self.last_error).clone()
    }

    pub(crate) fn subscribe_errors(&self) -> broadcast::Receiver<ServerError> {
        self.errors.subscribe()
    }

    pub(crate) fn handshake_status(&self) -> watch::Receiver<HandshakeStatus> {
        self.handshake.subscribe()
    }

    /// Resolve the handshake if it is still pending. Later outcomes are
    /// ignored so the status changes exactly once. Returns whether this
    /// call resolved it.
    fn resolve_handshake(&self, outcome: HandshakeStatus) -> bool {
        self.handshake.send_if_modified(|status| {
            if *status != HandshakeStatus::Pending {
                return false;
            }
            // Set before waking the handshake waiter so `connect` never
            // returns a session that reports itself disconnected.
            if outcome == HandshakeStatus::Connected {
                self.connected.store(true, Ordering::SeqCst);
            }
            *status = outcome;
            true
        })
    }

    /// Apply one frame to the connection state.
    pub(crate) fn dispatch(&self, frame: Frame) {
        trace!(command = %frame.command, "dispatching frame");
        match frame.command {
            Command::Connected => {
                // Disconnected is terminal: only the first answer to
                // CONNECT counts.
                if self.resolve_handshake(HandshakeStatus::Connected) {
                    debug!(
                        version = frame.get_header("version").unwrap_or("1.0"),
                        session = frame.get_header("session").unwrap_or(""),
                        "session established"
                    );
                } else {
                    warn!("CONNECTED after the handshake ended, ignored");
                }
            }
            Command::Error => self.record_error(frame),
            Command::Receipt => {
                if let Some(id) = frame.get_header("receipt-id") {
                    if let Some(waiter) = lock(&self.receipts).remove(id) {
                        let _ = waiter.send(Ok(()));
                    } else {
                        debug!(receipt_id = id, "receipt with no waiter");
                    }
                }
            }
            Command::Message => self.deliver(frame),
            other => debug!(command = %other, "ignoring unexpected inbound frame"),
        }
    }

    fn record_error(&self, frame: Frame) {
        let err = ServerError::from_frame(frame);
        warn!(message = %err.message, "error frame");
        self.connected.store(false, Ordering::SeqCst);
        *lock(&self.last_error) = Some(err.clone());
        if let Some(id) = &err.receipt_id {
            if let Some(waiter) = lock(&self.receipts).remove(id) {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        self.resolve_handshake(HandshakeStatus::Failed(err.message.clone()));
        let _ = self.errors.send(err);
    }

    /// Route a MESSAGE by its `subscription` header, falling back to its
    /// `destination`. Unrouted messages go to the inbound queue.
    fn deliver(&self, frame: Frame) {
        let mut delivered = false;
        {
            let mut map = lock(&self.subscriptions);
            let targets: Vec<&mut SubscriptionEntry> =
                match (frame.get_header("subscription"), frame.get_header("destination")) {
                    (Some(sub_id), _) => map
                        .values_mut()
                        .flat_map(|v| v.iter_mut())
                        .filter(|e| e.id == sub_id)
                        .collect(),
                    (None, Some(dest)) => map
                        .get_mut(dest)
                        .map(|v| v.iter_mut().collect())
                        .unwrap_or_default(),
                    (None, None) => Vec::new(),
                };
            for entry in targets {
                match entry.sender.try_send(frame.clone()) {
                    Ok(()) => delivered = true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        delivered = true;
                        warn!(subscription = %entry.id, "subscriber lagging, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            for entries in map.values_mut() {
                entries.retain(|e| !e.sender.is_closed());
            }
            map.retain(|_, entries| !entries.is_empty());
        }

        if !delivered {
            match lock(&self.inbound_tx).as_ref() {
                Some(tx) => {
                    if let Err(e) = tx.try_send(frame) {
                        warn!(error = %e, "unrouted message dropped");
                    }
                }
                None => debug!("session released, unrouted message dropped"),
            }
        }
    }

    /// The read side ended. A pending handshake fails rather than waiting
    /// forever for a CONNECTED that cannot arrive.
    pub(crate) fn stream_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.resolve_handshake(HandshakeStatus::Failed(
            "connection closed before CONNECTED".to_string(),
        ));
        // Outstanding receipts can no longer be answered.
        lock(&self.receipts).clear();
    }

    pub(crate) fn add_subscription(&self, destination: &str, capacity: usize) -> (String, mpsc::Receiver<Frame>) {
        let id = self.sub_id_counter.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        lock(&self.subscriptions)
            .entry(destination.to_string())
            .or_default()
            .push(SubscriptionEntry {
                id: id.clone(),
                sender: tx,
            });
        (id, rx)
    }

    /// Remove a subscription by id. Returns whether it existed.
    pub(crate) fn remove_subscription(&self, id: &str) -> bool {
        let mut map = lock(&self.subscriptions);
        let mut found = false;
        for entries in map.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            found |= entries.len() != before;
        }
        map.retain(|_, entries| !entries.is_empty());
        found
    }

    /// Allocate a receipt id and register a waiter for it.
    pub(crate) fn register_receipt(&self) -> (String, oneshot::Receiver<ReceiptOutcome>) {
        let id = format!("rcpt-{}", self.receipt_counter.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        lock(&self.receipts).insert(id.clone(), tx);
        (id, rx)
    }

    pub(crate) fn forget_receipt(&self, id: &str) {
        lock(&self.receipts).remove(id);
    }
}
