//! Generic sampling pipeline: one producer and one consumer thread per metric.
//!
//! ```text
//!  MetricSource ──sample()──► producer ──Frame──► HandoffQueue ──► consumer ──► Stage ──► Sink
//!                               ▲                                    ▲
//!                               └──────── LifecycleController ───────┘
//! ```
//!
//! The producer obeys the shared lifecycle between samples: it blocks while
//! paused and exits when stopped, closing the queue behind it. The consumer
//! drains the queue, forwards each tick through a [`Stage`] (raw passthrough
//! or rate conversion) and closes its sink on the way out.

pub mod rates;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::collector::MetricSource;
use crate::lifecycle::LifecycleController;
use crate::queue::HandoffQueue;
use crate::sample::{Counter, Sample};
use crate::sink::{Sink, SinkError};
use rates::{Observed, RateTracker};

/// Set once any pipeline has overrun its interval.
static OVERRUN_WARNED: AtomicBool = AtomicBool::new(false);

/// Unit passed from producer to consumer.
#[derive(Debug)]
pub enum Frame<S> {
    /// Binary file header, sent once before the first tick.
    Header(Vec<u8>),
    /// All snapshots read in one sampling tick.
    Tick(Vec<S>),
}

/// Counters reported by a consumer when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub ticks: u64,
    pub written: u64,
    pub baselines: u64,
    pub resets: u64,
    pub write_errors: u64,
}

/// Turns one tick of snapshots into sink writes.
pub trait Stage<S>: Send + 'static {
    fn forward<K: Sink>(
        &mut self,
        tick: Vec<S>,
        sink: &mut K,
        stats: &mut ConsumerStats,
    ) -> Result<(), SinkError>;
}

/// Writes every snapshot as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl<S: Sample> Stage<S> for Passthrough {
    fn forward<K: Sink>(
        &mut self,
        tick: Vec<S>,
        sink: &mut K,
        stats: &mut ConsumerStats,
    ) -> Result<(), SinkError> {
        for snapshot in &tick {
            sink.write(snapshot)?;
            stats.written += 1;
        }
        Ok(())
    }
}

impl<C: Counter> Stage<C> for RateTracker<C> {
    fn forward<K: Sink>(
        &mut self,
        tick: Vec<C>,
        sink: &mut K,
        stats: &mut ConsumerStats,
    ) -> Result<(), SinkError> {
        for observed in self.observe_tick(tick) {
            match observed {
                Observed::Baseline => stats.baselines += 1,
                Observed::Rate(rate) => {
                    sink.write(&rate)?;
                    stats.written += 1;
                }
                Observed::Reset(e) => {
                    debug!("baseline reset: {}", e);
                    stats.resets += 1;
                }
            }
        }
        Ok(())
    }
}

/// A metric source bound to the lifecycle and a sampling interval, ready to
/// be started against a sink.
pub struct SamplingPipeline<M: MetricSource> {
    source: M,
    lifecycle: Arc<LifecycleController>,
    interval: Duration,
}

impl<M: MetricSource> SamplingPipeline<M> {
    pub fn new(source: M, lifecycle: Arc<LifecycleController>, interval: Duration) -> Self {
        Self {
            source,
            lifecycle,
            interval,
        }
    }

    /// Starts the pipeline forwarding raw snapshots.
    pub fn spawn<K: Sink>(self, sink: K) -> io::Result<PipelineHandle> {
        self.spawn_with(Passthrough, sink)
    }

    /// Starts the pipeline forwarding per-entity rates.
    pub fn spawn_rates<K: Sink>(self, sink: K) -> io::Result<PipelineHandle>
    where
        M::Snapshot: Counter,
    {
        self.spawn_with(RateTracker::<M::Snapshot>::new(), sink)
    }

    pub fn spawn_with<F, K>(self, stage: F, sink: K) -> io::Result<PipelineHandle>
    where
        F: Stage<M::Snapshot>,
        K: Sink,
    {
        let name = self.source.name();
        let queue = Arc::new(HandoffQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            let lifecycle = Arc::clone(&self.lifecycle);
            thread::Builder::new()
                .name(format!("{}-consumer", name))
                .spawn(move || consume(name, &queue, &lifecycle, stage, sink))?
        };

        let producer = {
            let queue = Arc::clone(&queue);
            let Self {
                source,
                lifecycle,
                interval,
            } = self;
            thread::Builder::new()
                .name(format!("{}-producer", name))
                .spawn(move || produce(source, &queue, &lifecycle, interval))
        };
        let producer = match producer {
            Ok(handle) => handle,
            Err(e) => {
                queue.close();
                return Err(e);
            }
        };

        debug!(metric = name, "pipeline started");
        Ok(PipelineHandle {
            name,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }
}

fn warn_overrun(name: &str, interval: Duration, elapsed: Duration) {
    if !OVERRUN_WARNED.swap(true, Ordering::Relaxed) {
        warn!(
            metric = name,
            "sampling took {:?}, longer than the {:?} interval; samples may be missed, \
             consider lowering the sampling frequency",
            elapsed,
            interval
        );
    }
}

fn produce<M: MetricSource>(
    mut source: M,
    queue: &HandoffQueue<Frame<M::Snapshot>>,
    lifecycle: &LifecycleController,
    interval: Duration,
) {
    let name = source.name();

    if let Err(e) = source.open() {
        error!(metric = name, "cannot start sampling: {}", e);
        queue.close();
        return;
    }
    if let Some(header) = source.header()
        && queue.push(Frame::Header(header)).is_err()
    {
        return;
    }

    let mut failures: u64 = 0;
    while !lifecycle.is_stopped() {
        lifecycle.wait_if_paused();
        if lifecycle.is_stopped() {
            break;
        }

        let started = Instant::now();
        match source.sample() {
            Ok(snapshots) => {
                debug!(metric = name, count = snapshots.len(), "collected");
                if queue.push(Frame::Tick(snapshots)).is_err() {
                    break;
                }
            }
            Err(e) if e.is_fatal() => {
                error!(metric = name, "sampling aborted: {}", e);
                break;
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!(metric = name, "sample skipped: {}", e);
                } else {
                    debug!(metric = name, failures, "sample skipped: {}", e);
                }
            }
        }

        let elapsed = started.elapsed();
        match interval.checked_sub(elapsed) {
            Some(wait) => {
                lifecycle.sleep(wait);
            }
            None => warn_overrun(name, interval, elapsed),
        }
    }

    queue.close();
    trace!(metric = name, "producer stopped");
}

fn consume<S, F, K>(
    name: &'static str,
    queue: &HandoffQueue<Frame<S>>,
    lifecycle: &LifecycleController,
    mut stage: F,
    mut sink: K,
) -> ConsumerStats
where
    F: Stage<S>,
    K: Sink,
{
    let mut stats = ConsumerStats::default();

    while let Some(frame) = queue.pop() {
        if lifecycle.is_stopped() {
            break;
        }
        let result = match frame {
            Frame::Header(bytes) => sink.write_header(&bytes),
            Frame::Tick(tick) => {
                stats.ticks += 1;
                stage.forward(tick, &mut sink, &mut stats)
            }
        };
        if let Err(e) = result {
            stats.write_errors += 1;
            if stats.write_errors == 1 {
                warn!(metric = name, "write failed: {}", e);
            } else {
                debug!(metric = name, "write failed: {}", e);
            }
        }
    }

    if let Err(e) = sink.close() {
        warn!(metric = name, "failed to close sink: {}", e);
    }
    trace!(metric = name, "consumer stopped");
    stats
}

/// Owns the two threads of a running pipeline.
pub struct PipelineHandle {
    name: &'static str,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<ConsumerStats>>,
}

impl PipelineHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once both threads have exited (or were already joined).
    pub fn is_finished(&self) -> bool {
        self.producer.as_ref().is_none_or(JoinHandle::is_finished)
            && self.consumer.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for both threads until `deadline`. Returns `false` if they are
    /// still running at the deadline; the handle can be joined again later.
    pub fn join_until(&mut self, deadline: Instant) -> bool {
        const POLL: Duration = Duration::from_millis(10);

        while !self.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(POLL.min(deadline - now));
        }

        if let Some(producer) = self.producer.take()
            && producer.join().is_err()
        {
            error!(metric = self.name, "producer thread panicked");
        }
        if let Some(consumer) = self.consumer.take() {
            match consumer.join() {
                Ok(stats) => info!(
                    metric = self.name,
                    ticks = stats.ticks,
                    written = stats.written,
                    write_errors = stats.write_errors,
                    "pipeline finished"
                ),
                Err(_) => error!(metric = self.name, "consumer thread panicked"),
            }
        }
        true
    }
}
