//! Metric sources backed by the Linux `/proc` and `/sys` filesystems.
//!
//! Every metric is a leaf implementing [`MetricSource`]: the pipeline only
//! asks it to open, to describe its binary header, and to produce the next
//! batch of snapshots. All file access goes through the [`FileSystem`] trait
//! so sources can be exercised against [`MockFs`] fixtures.
//!
//! ```text
//!  ┌──────┐ ┌─────────┐ ┌─────┐ ┌──────┐ ┌─────┐ ┌────┐
//!  │ cpu  │ │ cpufreq │ │ mem │ │ disk │ │ net │ │ ib │   MetricSource
//!  └──┬───┘ └────┬────┘ └──┬──┘ └──┬───┘ └──┬──┘ └─┬──┘
//!     └──────────┴─────────┴───┬───┴───────┴──────┘
//!                       ┌──────▼──────┐
//!                       │  FileSystem │ (trait)
//!                       └──────┬──────┘
//!                   ┌──────────┴──────────┐
//!             ┌─────▼─────┐         ┌─────▼─────┐
//!             │  RealFs   │         │  MockFs   │
//!             └───────────┘         └───────────┘
//! ```

pub mod cpu;
pub mod cpufreq;
pub mod disk;
pub mod ib;
pub mod index;
pub mod mem;
pub mod mock;
pub mod net;
pub mod procfs;
pub mod traits;

use std::io;
use std::path::{Path, PathBuf};

pub use cpu::CpuSource;
pub use cpufreq::CpuFreqSource;
pub use disk::DiskSource;
pub use ib::IbSource;
pub use index::EntityIndex;
pub use mem::MemSource;
pub use mock::MockFs;
pub use net::NetSource;
pub use procfs::ParseError;
pub use traits::{FileSystem, RealFs};

use crate::sample::Sample;

/// Error reading a metric.
#[derive(Debug)]
pub enum CollectError {
    /// A required kernel interface is missing or unreadable at startup.
    Unavailable { path: PathBuf, source: io::Error },
    /// I/O error while sampling.
    Io(io::Error),
    /// Kernel file content could not be parsed.
    Parse(ParseError),
}

impl CollectError {
    pub fn unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CollectError::Unavailable {
            path: path.into(),
            source,
        }
    }

    /// Fatal errors end the metric's pipeline; others skip one tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CollectError::Unavailable { .. })
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Unavailable { path, source } => {
                write!(f, "{} unavailable: {}", path.display(), source)
            }
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<ParseError> for CollectError {
    fn from(e: ParseError) -> Self {
        CollectError::Parse(e)
    }
}

/// Producer side of one metric.
pub trait MetricSource: Send + 'static {
    type Snapshot: Sample;

    /// Short metric name used in logs and thread names.
    fn name(&self) -> &'static str;

    /// Checks the backing files and builds any entity index tables.
    ///
    /// An error here ends the metric's pipeline before the first sample.
    fn open(&mut self) -> Result<(), CollectError>;

    /// Binary file header written before the first record. Valid after `open`.
    fn header(&self) -> Option<Vec<u8>> {
        None
    }

    /// Reads one snapshot per entity.
    fn sample(&mut self) -> Result<Vec<Self::Snapshot>, CollectError>;
}

/// Reads a file that must exist for the source to work at all.
pub(crate) fn read_required<F: FileSystem>(fs: &F, path: &Path) -> Result<String, CollectError> {
    fs.read_to_string(path)
        .map_err(|e| CollectError::unavailable(path, e))
}

/// Host name used to tag remote lines.
///
/// Reads `<proc>/sys/kernel/hostname`, then `$HOSTNAME`, then `localhost`.
pub fn hostname<F: FileSystem>(fs: &F, proc_path: &Path) -> String {
    fs.read_to_string(&proc_path.join("sys/kernel/hostname"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
