//! CPU time counters from `/proc/stat`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::procfs::{CpuStat, parse_cpu_stat};
use super::{CollectError, FileSystem, MetricSource, read_required};
use crate::sample::{Counter, DeltaError, Point, Sample, delta, same_entity};
use crate::util::now_ns;

/// Core id used for the aggregate `cpu` line.
pub const TOTAL_CPU: u32 = u32::MAX;

/// Jiffies spent in each state by one core (or all of them).
///
/// Field order is the binary record layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuTimes {
    pub timestamp_ns: i64,
    pub cpu_id: u32,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CpuTimes {
    fn from_stat(stat: &CpuStat, timestamp_ns: i64) -> Self {
        Self {
            timestamp_ns,
            cpu_id: stat.cpu_id.unwrap_or(TOTAL_CPU),
            user: stat.user,
            nice: stat.nice,
            system: stat.system,
            idle: stat.idle,
            iowait: stat.iowait,
            irq: stat.irq,
            softirq: stat.softirq,
            steal: stat.steal,
            guest: stat.guest,
            guest_nice: stat.guest_nice,
        }
    }

    pub fn is_total(&self) -> bool {
        self.cpu_id == TOTAL_CPU
    }
}

impl Sample for CpuTimes {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        let point = if self.is_total() {
            Point::new("cpu_total", self.timestamp_ns)
        } else {
            Point::new("cpu_core", self.timestamp_ns).tag("cpu", format!("cpu{}", self.cpu_id))
        };
        point
            .field("user", self.user)
            .field("nice", self.nice)
            .field("system", self.system)
            .field("idle", self.idle)
            .field("iowait", self.iowait)
            .field("irq", self.irq)
            .field("softirq", self.softirq)
            .field("steal", self.steal)
            .field("guest", self.guest)
            .field("guest_nice", self.guest_nice)
    }
}

impl Counter for CpuTimes {
    type Key = u32;
    /// Jiffies elapsed in each state since the previous tick.
    type Rate = CpuTimes;

    fn key(&self) -> u32 {
        self.cpu_id
    }

    fn rate_since(&self, earlier: &Self) -> Result<CpuTimes, DeltaError> {
        same_entity(&self.cpu_id, &earlier.cpu_id)?;
        Ok(CpuTimes {
            timestamp_ns: self.timestamp_ns,
            cpu_id: self.cpu_id,
            user: delta("user", self.user, earlier.user)?,
            nice: delta("nice", self.nice, earlier.nice)?,
            system: delta("system", self.system, earlier.system)?,
            idle: delta("idle", self.idle, earlier.idle)?,
            iowait: delta("iowait", self.iowait, earlier.iowait)?,
            irq: delta("irq", self.irq, earlier.irq)?,
            softirq: delta("softirq", self.softirq, earlier.softirq)?,
            steal: delta("steal", self.steal, earlier.steal)?,
            guest: delta("guest", self.guest, earlier.guest)?,
            guest_nice: delta("guest_nice", self.guest_nice, earlier.guest_nice)?,
        })
    }
}

/// Reads the aggregate line plus one line per core on every tick.
pub struct CpuSource<F: FileSystem> {
    fs: F,
    stat_path: PathBuf,
}

impl<F: FileSystem> CpuSource<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            stat_path: proc_path.as_ref().join("stat"),
        }
    }
}

impl<F: FileSystem> MetricSource for CpuSource<F> {
    type Snapshot = CpuTimes;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let content = read_required(&self.fs, &self.stat_path)?;
        parse_cpu_stat(&content)?;
        Ok(())
    }

    fn sample(&mut self) -> Result<Vec<CpuTimes>, CollectError> {
        let content = self.fs.read_to_string(&self.stat_path)?;
        let timestamp_ns = now_ns();
        Ok(parse_cpu_stat(&content)?
            .iter()
            .map(|stat| CpuTimes::from_stat(stat, timestamp_ns))
            .collect())
    }
}
