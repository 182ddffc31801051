//! Connection handles for registered nodes
//!
//! A [`NodeConnection`] is the coordinator's view of one TCP connection: an
//! outbound queue drained by a writer task and a single slot for the reply the
//! coordinator is currently waiting on. Only one request per node may be
//! outstanding; installing a new one drops the previous waiter.

use berkeley_types::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::NetworkError;

/// Process-unique identifier of a physical connection.
pub type ConnectionId = u64;

/// Echoed send times within this distance of the pending request match it.
const ECHO_TOLERANCE_SECS: f64 = 1e-6;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct PendingReply {
    t0: f64,
    reply_tx: oneshot::Sender<f64>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    peer: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<Option<PendingReply>>,
    closed: AtomicBool,
}

/// Cloneable handle to a node connection.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    inner: Arc<ConnectionInner>,
}

impl NodeConnection {
    /// Create a handle for `peer`. The receiver yields every message queued
    /// with [`NodeConnection::send`] and is meant for the connection's writer.
    pub fn new<S: Into<String>>(peer: S) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer: peer.into(),
                outbound,
                pending: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };
        (connection, outbound_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue a message for the writer task.
    pub fn send(&self, message: Message) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed);
        }
        self.inner
            .outbound
            .send(message)
            .map_err(|_| NetworkError::ConnectionClosed)
    }

    /// Install the waiter for the reply to a request sent at `t0`.
    ///
    /// The receiver resolves with the node's reported `t1`, or errors once the
    /// connection closes or a newer request replaces this one.
    pub fn expect_reply(&self, t0: f64) -> oneshot::Receiver<f64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.is_closed() {
            let previous = self.inner.pending.lock().replace(PendingReply { t0, reply_tx });
            if previous.is_some() {
                debug!("replacing outstanding request on connection {}", self.id());
            }
        }
        reply_rx
    }

    /// Remove the waiter for `t0` if it is still installed.
    pub fn cancel_reply(&self, t0: f64) {
        let mut pending = self.inner.pending.lock();
        if pending.as_ref().is_some_and(|p| p.t0.to_bits() == t0.to_bits()) {
            pending.take();
        }
    }

    /// Hand a `TIME_REPLY` to the waiting exchange.
    ///
    /// Returns `false` when nothing is waiting or when the reply echoes a send
    /// time other than the pending request's (a late reply to an earlier
    /// exchange). The slot resolves at most once.
    pub fn deliver_reply(&self, t1: f64, echoed_t0: Option<f64>) -> bool {
        let mut pending = self.inner.pending.lock();
        let Some(waiting) = pending.as_ref() else {
            return false;
        };
        if let Some(echo) = echoed_t0 {
            if (echo - waiting.t0).abs() > ECHO_TOLERANCE_SECS {
                return false;
            }
        }
        match pending.take() {
            Some(waiting) => waiting.reply_tx.send(t1).is_ok(),
            None => false,
        }
    }

    /// Mark the connection closed and release any waiting exchange.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.pending.lock().take();
    }
}
