//! What the pipeline needs to know about a metric's values.
//!
//! A snapshot is opaque to the core: it can be encoded (serde field order is
//! the binary record layout), rendered as one line-protocol [`Point`], and,
//! for cumulative metrics, subtracted from an earlier snapshot of the same
//! entity to obtain a rate.

use std::fmt;
use std::hash::Hash;

use serde::Serialize;

/// A value that can be written to any sink.
pub trait Sample: Serialize + Send + 'static {
    /// Wall-clock time the value was read, in nanoseconds since the epoch.
    fn timestamp_ns(&self) -> i64;

    /// Line-protocol view of this value.
    fn point(&self) -> Point;
}

/// A snapshot of monotonically increasing counters for one entity.
pub trait Counter: Sample {
    /// Identity of the entity (core id, device index, interface name).
    type Key: Eq + Hash + Clone + fmt::Debug + Send + 'static;
    /// Result of subtracting two snapshots.
    type Rate: Sample;

    fn key(&self) -> Self::Key;

    /// Computes the change from `earlier` to `self`.
    ///
    /// Fails when the snapshots belong to different entities or when any
    /// counter went backwards (reset or wraparound).
    fn rate_since(&self, earlier: &Self) -> Result<Self::Rate, DeltaError>;
}

/// Error subtracting two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// Minuend and subtrahend describe different entities.
    EntityMismatch { current: String, earlier: String },
    /// A counter is lower than its previous reading.
    CounterRegression {
        field: &'static str,
        current: u64,
        earlier: u64,
    },
    /// The later snapshot is not strictly newer than the earlier one.
    NonPositiveInterval { current_ns: i64, earlier_ns: i64 },
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaError::EntityMismatch { current, earlier } => {
                write!(f, "cannot subtract {} from {}", earlier, current)
            }
            DeltaError::CounterRegression {
                field,
                current,
                earlier,
            } => write!(f, "counter {} went backwards ({} -> {})", field, earlier, current),
            DeltaError::NonPositiveInterval {
                current_ns,
                earlier_ns,
            } => write!(f, "timestamp did not advance ({} -> {})", earlier_ns, current_ns),
        }
    }
}

impl std::error::Error for DeltaError {}

/// Checks that two snapshots carry the same key.
pub fn same_entity<K: PartialEq + fmt::Debug>(current: &K, earlier: &K) -> Result<(), DeltaError> {
    if current == earlier {
        Ok(())
    } else {
        Err(DeltaError::EntityMismatch {
            current: format!("{:?}", current),
            earlier: format!("{:?}", earlier),
        })
    }
}

/// Counter delta, failing on regression.
pub fn delta(field: &'static str, current: u64, earlier: u64) -> Result<u64, DeltaError> {
    current
        .checked_sub(earlier)
        .ok_or(DeltaError::CounterRegression {
            field,
            current,
            earlier,
        })
}

/// Seconds between two nanosecond timestamps; `None` if time did not advance.
pub fn elapsed_secs(current_ns: i64, earlier_ns: i64) -> Option<f64> {
    let dt = current_ns.checked_sub(earlier_ns)?;
    (dt > 0).then(|| dt as f64 / 1e9)
}

/// Like [`elapsed_secs`], failing when time did not advance.
pub fn interval(current_ns: i64, earlier_ns: i64) -> Result<f64, DeltaError> {
    elapsed_secs(current_ns, earlier_ns).ok_or(DeltaError::NonPositiveInterval {
        current_ns,
        earlier_ns,
    })
}

/// Converts a byte delta over `dt` seconds to KiB/s, truncated.
pub fn kib_per_sec(bytes: u64, dt: f64) -> i64 {
    (bytes as f64 / (1024.0 * dt)) as i64
}

/// Field value in a line-protocol point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    Int(i64),
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v as u64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

/// One line-protocol record: `measurement[,tag=v...] field=v[,...] ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp_ns: i64,
}

impl Point {
    pub fn new(measurement: &'static str, timestamp_ns: i64) -> Self {
        Self {
            measurement,
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns,
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }

    pub fn field(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key, value.into()));
        self
    }
}
