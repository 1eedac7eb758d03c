//! Memory usage from `/proc/meminfo`. A gauge: written as read.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::procfs::parse_meminfo;
use super::{CollectError, FileSystem, MetricSource, read_required};
use crate::sample::{Point, Sample};
use crate::util::now_ns;

/// One `/proc/meminfo` reading. All sizes in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemUsage {
    pub timestamp_ns: i64,
    pub total_kib: u64,
    pub free_kib: u64,
    pub available_kib: u64,
    pub buffers_kib: u64,
    pub cached_kib: u64,
    pub swap_cached_kib: u64,
    pub swap_total_kib: u64,
    pub swap_free_kib: u64,
    pub slab_kib: u64,
}

impl Sample for MemUsage {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("mem", self.timestamp_ns)
            .field("total_kib", self.total_kib)
            .field("free_kib", self.free_kib)
            .field("available_kib", self.available_kib)
            .field("buffers_kib", self.buffers_kib)
            .field("cached_kib", self.cached_kib)
            .field("swap_cached_kib", self.swap_cached_kib)
            .field("swap_total_kib", self.swap_total_kib)
            .field("swap_free_kib", self.swap_free_kib)
            .field("slab_kib", self.slab_kib)
    }
}

pub struct MemSource<F: FileSystem> {
    fs: F,
    meminfo_path: PathBuf,
}

impl<F: FileSystem> MemSource<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            meminfo_path: proc_path.as_ref().join("meminfo"),
        }
    }
}

impl<F: FileSystem> MetricSource for MemSource<F> {
    type Snapshot = MemUsage;

    fn name(&self) -> &'static str {
        "mem"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let content = read_required(&self.fs, &self.meminfo_path)?;
        parse_meminfo(&content)?;
        Ok(())
    }

    fn sample(&mut self) -> Result<Vec<MemUsage>, CollectError> {
        let content = self.fs.read_to_string(&self.meminfo_path)?;
        let timestamp_ns = now_ns();
        let info = parse_meminfo(&content)?;
        Ok(vec![MemUsage {
            timestamp_ns,
            total_kib: info.mem_total,
            free_kib: info.mem_free,
            available_kib: info.mem_available,
            buffers_kib: info.buffers,
            cached_kib: info.cached,
            swap_cached_kib: info.swap_cached,
            swap_total_kib: info.swap_total,
            swap_free_kib: info.swap_free,
            slab_kib: info.slab,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::sample::FieldValue;

    #[test]
    fn test_sample() {
        let mut source = MemSource::new(MockFs::typical_host(), "/proc");
        source.open().unwrap();
        let snapshots = source.sample().unwrap();
        assert_eq!(snapshots.len(), 1);
        let mem = snapshots[0];
        assert_eq!(mem.total_kib, 16384000);
        assert_eq!(mem.available_kib, 12000000);
        assert_eq!(mem.swap_cached_kib, 1024);
        assert_eq!(mem.slab_kib, 512000);

        let point = mem.point();
        assert_eq!(point.measurement, "mem");
        assert_eq!(point.fields.len(), 9);
        assert_eq!(point.fields[0], ("total_kib", FieldValue::UInt(16384000)));
    }

    #[test]
    fn test_garbled_meminfo_skips_tick() {
        let fs = MockFs::typical_host();
        let mut source = MemSource::new(fs.clone(), "/proc");
        source.open().unwrap();
        fs.add_file("/proc/meminfo", "garbage\n");
        let err = source.sample().unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_binary_layout() {
        let bytes = bincode::serialize(&MemUsage::default()).unwrap();
        assert_eq!(bytes.len(), 8 + 9 * 8);
    }
}
