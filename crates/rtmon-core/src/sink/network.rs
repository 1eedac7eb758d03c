//! Batching line-protocol sink.

use tracing::{debug, trace};

use super::delivery::{Batch, DeliveryStats, DeliveryWorker};
use super::line_protocol::write_line;
use super::{Sink, SinkError};
use crate::sample::Sample;

/// Renders samples as line protocol and hands full batches to a
/// [`DeliveryWorker`].
pub struct NetworkSink {
    name: String,
    hostname: String,
    batch_size: usize,
    buffer: String,
    lines: usize,
    worker: Option<DeliveryWorker>,
}

impl NetworkSink {
    /// `batch_size` is clamped to at least 1.
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        batch_size: usize,
        worker: DeliveryWorker,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            batch_size: batch_size.max(1),
            buffer: String::new(),
            lines: 0,
            worker: Some(worker),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lines buffered but not yet handed off.
    pub fn buffered_lines(&self) -> usize {
        self.lines
    }

    fn hand_off(&mut self) -> Result<(), SinkError> {
        if self.lines == 0 {
            return Ok(());
        }
        let worker = self.worker.as_ref().ok_or(SinkError::Closed)?;
        let batch = Batch {
            body: std::mem::take(&mut self.buffer),
            lines: std::mem::take(&mut self.lines),
        };
        trace!(sink = %self.name, lines = batch.lines, "batch handed off");
        worker.submit(batch)
    }

    /// Flushes, then stops the worker once it has sent everything queued.
    pub fn shutdown(&mut self) -> Result<Option<DeliveryStats>, SinkError> {
        let flushed = self.hand_off();
        let stats = self.worker.as_mut().and_then(DeliveryWorker::shutdown);
        self.worker = None;
        flushed.map(|_| stats)
    }
}

impl Sink for NetworkSink {
    fn write_header(&mut self, _header: &[u8]) -> Result<(), SinkError> {
        // Headers describe the binary file layout; the remote needs none.
        Ok(())
    }

    fn write<T: Sample>(&mut self, sample: &T) -> Result<(), SinkError> {
        if self.worker.is_none() {
            return Err(SinkError::Closed);
        }
        write_line(
            &mut self.buffer,
            &sample.point(),
            &[("hostname", self.hostname.as_str())],
        );
        self.lines += 1;
        if self.lines >= self.batch_size {
            self.hand_off()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.hand_off()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.worker.is_none() {
            return Ok(());
        }
        let stats = self.shutdown()?;
        debug!(sink = %self.name, ?stats, "network sink closed");
        Ok(())
    }
}

impl Drop for NetworkSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(sink = %self.name, "failed to close network sink: {}", e);
        }
    }
}
