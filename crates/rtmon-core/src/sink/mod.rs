//! Destinations for sampled values.
//!
//! ```text
//!   consumer thread
//!        │ write(&sample)
//!   ┌────▼─────┐
//!   │   Sink   │ (trait)
//!   └────┬─────┘
//!        ├──────────────────────┐
//!  ┌─────▼─────┐         ┌──────▼──────┐   Batch   ┌────────────────┐
//!  │ FileSink  │         │ NetworkSink ├──────────►│ DeliveryWorker │──► HTTP
//!  │ (bincode) │         │ (line text) │           │ (own thread)   │
//!  └───────────┘         └─────────────┘           └────────────────┘
//! ```

pub mod delivery;
pub mod file;
pub mod http;
pub mod line_protocol;
pub mod network;

pub use delivery::{
    Batch, DEFAULT_MAX_PENDING, DeliveryStats, DeliveryWorker, Response, Transport, TransportError,
};
pub use file::FileSink;
pub use http::{Endpoint, EndpointError, HttpClient, HttpOptions};
pub use network::NetworkSink;

use crate::sample::Sample;

/// Error writing to a sink.
#[derive(Debug)]
pub enum SinkError {
    /// I/O error on the output file.
    Io(std::io::Error),
    /// Sample could not be encoded.
    Encode(bincode::Error),
    /// The sink (or its delivery worker) is already closed.
    Closed,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "I/O error: {}", e),
            SinkError::Encode(e) => write!(f, "encode error: {}", e),
            SinkError::Closed => write!(f, "sink is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

impl From<bincode::Error> for SinkError {
    fn from(e: bincode::Error) -> Self {
        SinkError::Encode(e)
    }
}

/// Where a pipeline's consumer sends its values.
pub trait Sink: Send + 'static {
    /// Writes a metric's binary header. Only meaningful for file output.
    fn write_header(&mut self, header: &[u8]) -> Result<(), SinkError>;

    fn write<T: Sample>(&mut self, sample: &T) -> Result<(), SinkError>;

    /// Pushes buffered data onward (to disk, or to the delivery worker).
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flushes and releases the underlying resource. Idempotent.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Either kind of sink, chosen at startup from configuration.
pub enum MetricSink {
    File(FileSink),
    Network(NetworkSink),
}

impl Sink for MetricSink {
    fn write_header(&mut self, header: &[u8]) -> Result<(), SinkError> {
        match self {
            MetricSink::File(s) => s.write_header(header),
            MetricSink::Network(s) => s.write_header(header),
        }
    }

    fn write<T: Sample>(&mut self, sample: &T) -> Result<(), SinkError> {
        match self {
            MetricSink::File(s) => s.write(sample),
            MetricSink::Network(s) => s.write(sample),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        match self {
            MetricSink::File(s) => s.flush(),
            MetricSink::Network(s) => s.flush(),
        }
    }

    fn close(&mut self) -> Result<(), SinkError> {
        match self {
            MetricSink::File(s) => s.close(),
            MetricSink::Network(s) => s.close(),
        }
    }
}
