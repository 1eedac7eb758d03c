//! Background delivery of line-protocol batches.
//!
//! Each [`NetworkSink`](super::NetworkSink) owns one [`DeliveryWorker`]: a
//! dedicated thread that pops completed batches from its own queue and sends
//! them through a [`Transport`]. Sampling never waits on the network.
//!
//! Per batch:
//! - success status: counted as sent
//! - any other status: logged, not retried
//! - transport error: connection reset, one retry, then the batch is dropped
//!
//! The backlog is capped at `max_pending` batches. When the endpoint falls
//! behind, the oldest waiting batch is dropped to make room. At shutdown the
//! backlog is sent, unless the endpoint has just proven unreachable, in
//! which case what is left is discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use super::SinkError;
use crate::queue::HandoffQueue;

/// Status code the remote returns for an accepted write.
pub const SUCCESS_STATUS: u16 = 204;

/// Longest response body excerpt included in a rejection warning.
const MAX_BODY_EXCERPT: usize = 256;

/// Default cap on batches waiting for the delivery thread.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// A group of newline-terminated lines sent in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub body: String,
    pub lines: usize,
}

/// Response to one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Error sending a batch.
#[derive(Debug)]
pub enum TransportError {
    /// Could not establish a connection.
    Connect(String),
    /// No complete response within the request timeout.
    Timeout,
    /// Connection failed mid-request.
    Io(std::io::Error),
    /// Peer sent something that is not a valid response.
    Protocol(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "connect failed: {}", e),
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Io(e) => write!(f, "I/O error: {}", e),
            TransportError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Something that can carry a request body to the remote end.
pub trait Transport: Send + 'static {
    fn send(&mut self, body: &[u8]) -> Result<Response, TransportError>;

    /// Drops any open connection; the next `send` reconnects.
    fn reset(&mut self);
}

/// Counters reported when a worker shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub batches_sent: u64,
    pub batches_rejected: u64,
    pub batches_dropped: u64,
    pub lines_sent: u64,
    pub retries: u64,
}

/// Handle to a running delivery thread.
pub struct DeliveryWorker {
    name: String,
    queue: Arc<HandoffQueue<Batch>>,
    max_pending: usize,
    /// Batches evicted from a full backlog.
    overflowed: Arc<AtomicU64>,
    handle: Option<JoinHandle<DeliveryStats>>,
}

impl DeliveryWorker {
    /// Spawns the delivery thread. At most `max_pending` batches (at least
    /// one) wait for it at any time.
    pub fn spawn<T: Transport>(
        name: impl Into<String>,
        transport: T,
        max_pending: usize,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let queue = Arc::new(HandoffQueue::new());
        let overflowed = Arc::new(AtomicU64::new(0));
        let handle = {
            let queue = Arc::clone(&queue);
            let overflowed = Arc::clone(&overflowed);
            let name = name.clone();
            thread::Builder::new()
                .name(format!("{}-delivery", name))
                .spawn(move || run(&name, &queue, &overflowed, transport))?
        };
        Ok(Self {
            name,
            queue,
            max_pending: max_pending.max(1),
            overflowed,
            handle: Some(handle),
        })
    }

    /// Enqueues a batch. Never blocks; drops the oldest waiting batch when
    /// the backlog is full.
    pub fn submit(&self, batch: Batch) -> Result<(), SinkError> {
        let evicted = self
            .queue
            .push_bounded(batch, self.max_pending)
            .map_err(|_| SinkError::Closed)?;
        if let Some(evicted) = evicted {
            let total = self.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 {
                warn!(
                    sink = %self.name,
                    max_pending = self.max_pending,
                    lines = evicted.lines,
                    "delivery backlog full, dropping oldest batches"
                );
            } else {
                debug!(sink = %self.name, total, "backlog overflow, batch dropped");
            }
        }
        Ok(())
    }

    /// Batches waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stops accepting batches, sends everything already queued, and joins
    /// the thread. Returns `None` if already shut down.
    pub fn shutdown(&mut self) -> Option<DeliveryStats> {
        self.queue.close();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!(sink = %self.name, "delivery thread panicked");
                None
            }
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T: Transport>(
    name: &str,
    queue: &HandoffQueue<Batch>,
    overflowed: &AtomicU64,
    mut transport: T,
) -> DeliveryStats {
    debug!(sink = name, "delivery worker started");
    let mut stats = DeliveryStats::default();

    while let Some(batch) = queue.pop() {
        let outcome = deliver(name, &mut transport, &batch, &mut stats);
        if outcome == Outcome::Dropped && queue.is_closed() {
            let mut discarded = 0u64;
            while queue.pop().is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                warn!(
                    sink = name,
                    batches = discarded,
                    "endpoint unreachable at shutdown, discarding backlog"
                );
                stats.batches_dropped += discarded;
            }
            break;
        }
    }
    transport.reset();
    stats.batches_dropped += overflowed.load(Ordering::Relaxed);

    info!(
        sink = name,
        sent = stats.batches_sent,
        lines = stats.lines_sent,
        rejected = stats.batches_rejected,
        dropped = stats.batches_dropped,
        retries = stats.retries,
        "delivery worker stopped"
    );
    stats
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Rejected,
    Dropped,
}

fn deliver<T: Transport>(
    name: &str,
    transport: &mut T,
    batch: &Batch,
    stats: &mut DeliveryStats,
) -> Outcome {
    let body = batch.body.as_bytes();

    let mut result = transport.send(body);
    if let Err(e) = &result {
        debug!(sink = name, error = %e, "send failed, reconnecting");
        transport.reset();
        stats.retries += 1;
        result = transport.send(body);
    }

    match result {
        Ok(response) if response.status == SUCCESS_STATUS => {
            trace!(sink = name, lines = batch.lines, "batch delivered");
            stats.batches_sent += 1;
            stats.lines_sent += batch.lines as u64;
            Outcome::Sent
        }
        Ok(response) => {
            let excerpt = &response.body[..response.body.len().min(MAX_BODY_EXCERPT)];
            warn!(
                sink = name,
                status = response.status,
                lines = batch.lines,
                "batch rejected: {}",
                String::from_utf8_lossy(excerpt).trim()
            );
            stats.batches_rejected += 1;
            Outcome::Rejected
        }
        Err(e) => {
            transport.reset();
            warn!(
                sink = name,
                lines = batch.lines,
                error = %e,
                "batch dropped after retry"
            );
            stats.batches_dropped += 1;
            Outcome::Dropped
        }
    }
}
