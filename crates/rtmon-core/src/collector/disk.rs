//! Block device I/O counters from `/proc/diskstats`.
//!
//! Devices are enumerated once in `open`; records carry the device index
//! from the header table. Loop, device-mapper and RAM disks are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::index::EntityIndex;
use super::procfs::{DiskStats, parse_diskstats};
use super::{CollectError, FileSystem, MetricSource, read_required};
use crate::sample::{Counter, DeltaError, Point, Sample, delta, same_entity};
use crate::util::now_ns;

const DEFAULT_SECTOR_SIZE: u32 = 512;

fn is_ignored(device: &str) -> bool {
    device.starts_with("loop") || device.starts_with("dm-") || device.starts_with("ram")
}

/// Cumulative I/O counters of one block device.
///
/// Field order is the binary record layout; the device name is only kept
/// for line protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskCounters {
    pub timestamp_ns: i64,
    pub index: u32,
    pub rd_completed: u64,
    pub rd_merged: u64,
    pub sectors_read: u64,
    pub time_read_ms: u64,
    pub wr_completed: u64,
    pub wr_merged: u64,
    pub sectors_written: u64,
    pub time_write_ms: u64,
    /// Gauge: requests in flight right now.
    pub io_in_progress: u64,
    pub time_io_ms: u64,
    pub time_weighted_io_ms: u64,
    pub disc_completed: u64,
    pub disc_merged: u64,
    pub sectors_discarded: u64,
    pub time_discard_ms: u64,
    pub flush_requests: u64,
    pub time_flush_ms: u64,
    #[serde(skip)]
    pub device: Arc<str>,
}

impl DiskCounters {
    fn from_stats(stats: &DiskStats, index: u32, device: Arc<str>, timestamp_ns: i64) -> Self {
        Self {
            timestamp_ns,
            index,
            rd_completed: stats.reads,
            rd_merged: stats.r_merged,
            sectors_read: stats.read_sectors,
            time_read_ms: stats.read_time,
            wr_completed: stats.writes,
            wr_merged: stats.w_merged,
            sectors_written: stats.write_sectors,
            time_write_ms: stats.write_time,
            io_in_progress: stats.io_in_progress,
            time_io_ms: stats.io_time,
            time_weighted_io_ms: stats.io_weighted_time,
            disc_completed: stats.discards,
            disc_merged: stats.d_merged,
            sectors_discarded: stats.discard_sectors,
            time_discard_ms: stats.discard_time,
            flush_requests: stats.flushes,
            time_flush_ms: stats.flush_time,
            device,
        }
    }

    fn to_point(&self) -> Point {
        Point::new("disk", self.timestamp_ns)
            .tag("device", self.device.as_ref())
            .field("rd_completed", self.rd_completed)
            .field("rd_merged", self.rd_merged)
            .field("sectors_read", self.sectors_read)
            .field("time_read_ms", self.time_read_ms)
            .field("wr_completed", self.wr_completed)
            .field("wr_merged", self.wr_merged)
            .field("sectors_written", self.sectors_written)
            .field("time_write_ms", self.time_write_ms)
            .field("io_in_progress", self.io_in_progress)
            .field("time_io_ms", self.time_io_ms)
            .field("time_weighted_io_ms", self.time_weighted_io_ms)
            .field("disc_completed", self.disc_completed)
            .field("disc_merged", self.disc_merged)
            .field("sectors_discarded", self.sectors_discarded)
            .field("time_discard_ms", self.time_discard_ms)
            .field("flush_requests", self.flush_requests)
            .field("time_flush_ms", self.time_flush_ms)
    }
}

impl Sample for DiskCounters {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        self.to_point()
    }
}

/// Per-interval change of every counter; `io_in_progress` is the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskRate(pub DiskCounters);

impl Sample for DiskRate {
    fn timestamp_ns(&self) -> i64 {
        self.0.timestamp_ns
    }

    fn point(&self) -> Point {
        self.0.to_point()
    }
}

impl Counter for DiskCounters {
    type Key = u32;
    type Rate = DiskRate;

    fn key(&self) -> u32 {
        self.index
    }

    fn rate_since(&self, earlier: &Self) -> Result<DiskRate, DeltaError> {
        same_entity(&self.index, &earlier.index)?;
        Ok(DiskRate(DiskCounters {
            timestamp_ns: self.timestamp_ns,
            index: self.index,
            rd_completed: delta("rd_completed", self.rd_completed, earlier.rd_completed)?,
            rd_merged: delta("rd_merged", self.rd_merged, earlier.rd_merged)?,
            sectors_read: delta("sectors_read", self.sectors_read, earlier.sectors_read)?,
            time_read_ms: delta("time_read_ms", self.time_read_ms, earlier.time_read_ms)?,
            wr_completed: delta("wr_completed", self.wr_completed, earlier.wr_completed)?,
            wr_merged: delta("wr_merged", self.wr_merged, earlier.wr_merged)?,
            sectors_written: delta(
                "sectors_written",
                self.sectors_written,
                earlier.sectors_written,
            )?,
            time_write_ms: delta("time_write_ms", self.time_write_ms, earlier.time_write_ms)?,
            io_in_progress: self.io_in_progress,
            time_io_ms: delta("time_io_ms", self.time_io_ms, earlier.time_io_ms)?,
            time_weighted_io_ms: delta(
                "time_weighted_io_ms",
                self.time_weighted_io_ms,
                earlier.time_weighted_io_ms,
            )?,
            disc_completed: delta("disc_completed", self.disc_completed, earlier.disc_completed)?,
            disc_merged: delta("disc_merged", self.disc_merged, earlier.disc_merged)?,
            sectors_discarded: delta(
                "sectors_discarded",
                self.sectors_discarded,
                earlier.sectors_discarded,
            )?,
            time_discard_ms: delta(
                "time_discard_ms",
                self.time_discard_ms,
                earlier.time_discard_ms,
            )?,
            flush_requests: delta("flush_requests", self.flush_requests, earlier.flush_requests)?,
            time_flush_ms: delta("time_flush_ms", self.time_flush_ms, earlier.time_flush_ms)?,
            device: self.device.clone(),
        }))
    }
}

pub struct DiskSource<F: FileSystem> {
    fs: F,
    diskstats_path: PathBuf,
    block_path: PathBuf,
    index: EntityIndex,
    /// Shared names, by index.
    names: Vec<Arc<str>>,
    /// Hardware sector size in bytes, by index.
    sector_sizes: Vec<u32>,
}

impl<F: FileSystem> DiskSource<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            diskstats_path: proc_path.as_ref().join("diskstats"),
            block_path: sys_path.as_ref().join("block"),
            index: EntityIndex::default(),
            names: Vec::new(),
            sector_sizes: Vec::new(),
        }
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    fn sector_size(&self, device: &str) -> u32 {
        let path = self.block_path.join(device).join("queue/hw_sector_size");
        match self.fs.read_to_string(&path) {
            Ok(content) => content.trim().parse().unwrap_or(DEFAULT_SECTOR_SIZE),
            Err(e) => {
                debug!("{}: {}, assuming {} byte sectors", path.display(), e, DEFAULT_SECTOR_SIZE);
                DEFAULT_SECTOR_SIZE
            }
        }
    }
}

impl<F: FileSystem> MetricSource for DiskSource<F> {
    type Snapshot = DiskCounters;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let content = read_required(&self.fs, &self.diskstats_path)?;
        let disks = parse_diskstats(&content)?;

        self.index = EntityIndex::new(
            disks
                .iter()
                .map(|d| d.device.as_str())
                .filter(|name| !is_ignored(name)),
        );
        self.names = self.index.iter().map(|(_, name)| Arc::from(name)).collect();
        self.sector_sizes = self
            .index
            .iter()
            .map(|(_, name)| self.sector_size(name))
            .collect();

        info!("disk: tracking {} block devices", self.index.len());
        Ok(())
    }

    fn header(&self) -> Option<Vec<u8>> {
        Some(self.index.header_with(|id, _, out| {
            let size = self
                .sector_sizes
                .get(id as usize)
                .copied()
                .unwrap_or(DEFAULT_SECTOR_SIZE);
            out.extend_from_slice(&size.to_le_bytes());
        }))
    }

    fn sample(&mut self) -> Result<Vec<DiskCounters>, CollectError> {
        let content = self.fs.read_to_string(&self.diskstats_path)?;
        let timestamp_ns = now_ns();
        let disks = parse_diskstats(&content)?;

        let mut snapshots = Vec::with_capacity(self.names.len());
        for stats in disks.iter().filter(|d| !is_ignored(&d.device)) {
            let Some(index) = self.index.lookup("disk", &stats.device) else {
                continue;
            };
            let Some(name) = self.names.get(index as usize) else {
                continue;
            };
            snapshots.push(DiskCounters::from_stats(
                stats,
                index,
                name.clone(),
                timestamp_ns,
            ));
        }
        Ok(snapshots)
    }
}
