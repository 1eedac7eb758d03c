//! Current CPU frequency from sysfs cpufreq. A gauge: written as read.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::procfs::{parse_counter, parse_cpu_list};
use super::{CollectError, FileSystem, MetricSource, read_required};
use crate::sample::{Point, Sample};
use crate::util::now_ns;

/// Frequency of one core in kHz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuFreq {
    pub timestamp_ns: i64,
    /// Index into the header table.
    pub index: u32,
    pub khz: u32,
    #[serde(skip)]
    pub cpu_id: u32,
}

impl Sample for CpuFreq {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("cpu_freq", self.timestamp_ns)
            .tag("cpu", format!("cpu{}", self.cpu_id))
            .field("value", self.khz)
    }
}

/// Reads `scaling_cur_freq` of every CPU online at startup, in id order.
pub struct CpuFreqSource<F: FileSystem> {
    fs: F,
    cpu_path: PathBuf,
    /// CPU ids by index.
    cpus: Vec<u32>,
    min_khz: u64,
    max_khz: u64,
}

impl<F: FileSystem> CpuFreqSource<F> {
    pub fn new(fs: F, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            cpu_path: sys_path.as_ref().join("devices/system/cpu"),
            cpus: Vec::new(),
            min_khz: 0,
            max_khz: 0,
        }
    }

    fn cpufreq_file(&self, cpu: u32, file: &str) -> PathBuf {
        self.cpu_path.join(format!("cpu{}/cpufreq/{}", cpu, file))
    }

    fn read_khz(&self, cpu: u32, file: &str) -> Result<u64, CollectError> {
        let content = self.fs.read_to_string(&self.cpufreq_file(cpu, file))?;
        Ok(parse_counter(&content)?)
    }

    /// Hardware limits across all tracked CPUs, in kHz.
    pub fn limits(&self) -> (u64, u64) {
        (self.min_khz, self.max_khz)
    }
}

impl<F: FileSystem> MetricSource for CpuFreqSource<F> {
    type Snapshot = CpuFreq;

    fn name(&self) -> &'static str {
        "cpufreq"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let online_path = self.cpu_path.join("online");
        let online = parse_cpu_list(&read_required(&self.fs, &online_path)?)?;

        self.cpus = online
            .into_iter()
            .filter(|cpu| self.fs.exists(&self.cpufreq_file(*cpu, "scaling_cur_freq")))
            .collect();
        if self.cpus.is_empty() {
            return Err(CollectError::unavailable(
                self.cpu_path.join("cpu0/cpufreq"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no cpufreq driver"),
            ));
        }

        let mut min = u64::MAX;
        let mut max = 0u64;
        for &cpu in &self.cpus {
            if let Ok(v) = self.read_khz(cpu, "cpuinfo_min_freq") {
                min = min.min(v);
            }
            if let Ok(v) = self.read_khz(cpu, "cpuinfo_max_freq") {
                max = max.max(v);
            }
        }
        self.min_khz = if min == u64::MAX { 0 } else { min };
        self.max_khz = max;

        info!(
            "cpufreq: tracking {} cpus ({}-{} kHz)",
            self.cpus.len(),
            self.min_khz,
            self.max_khz
        );
        Ok(())
    }

    /// Count, min and max kHz, then (index, cpu id) per entry.
    fn header(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(20 + self.cpus.len() * 8);
        out.extend_from_slice(&(self.cpus.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.min_khz.to_le_bytes());
        out.extend_from_slice(&self.max_khz.to_le_bytes());
        for (index, cpu) in self.cpus.iter().enumerate() {
            out.extend_from_slice(&(index as u32).to_le_bytes());
            out.extend_from_slice(&cpu.to_le_bytes());
        }
        Some(out)
    }

    fn sample(&mut self) -> Result<Vec<CpuFreq>, CollectError> {
        let timestamp_ns = now_ns();
        let mut snapshots = Vec::with_capacity(self.cpus.len());
        for (index, &cpu) in self.cpus.iter().enumerate() {
            match self.read_khz(cpu, "scaling_cur_freq") {
                Ok(khz) => snapshots.push(CpuFreq {
                    timestamp_ns,
                    index: index as u32,
                    khz: u32::try_from(khz).unwrap_or(u32::MAX),
                    cpu_id: cpu,
                }),
                // CPU went offline since open.
                Err(e) => debug!("cpufreq: cpu{}: {}", cpu, e),
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::sample::FieldValue;

    #[test]
    fn test_sample_online_cpus() {
        let mut source = CpuFreqSource::new(MockFs::typical_host(), "/sys");
        source.open().unwrap();
        assert_eq!(source.limits(), (800000, 3500000));

        let snapshots = source.sample().unwrap();
        let khz: Vec<u32> = snapshots.iter().map(|s| s.khz).collect();
        assert_eq!(khz, vec![2400000, 2300000, 3100000, 1200000]);
        assert_eq!(snapshots[2].index, 2);

        let point = snapshots[2].point();
        assert_eq!(point.measurement, "cpu_freq");
        assert_eq!(point.tags, vec![("cpu", "cpu2".to_string())]);
        assert_eq!(point.fields, vec![("value", FieldValue::UInt(3100000))]);
    }

    #[test]
    fn test_sparse_online_list() {
        let fs = MockFs::new();
        fs.add_file("/sys/devices/system/cpu/online", "0,2\n");
        fs.add_file("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "1000\n");
        fs.add_file("/sys/devices/system/cpu/cpu2/cpufreq/scaling_cur_freq", "2000\n");

        let mut source = CpuFreqSource::new(fs, "/sys");
        source.open().unwrap();
        assert_eq!(source.limits(), (0, 0));

        let snapshots = source.sample().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!((snapshots[1].index, snapshots[1].cpu_id), (1, 2));
    }

    #[test]
    fn test_header() {
        let mut source = CpuFreqSource::new(MockFs::typical_host(), "/sys");
        source.open().unwrap();
        let header = source.header().unwrap();
        assert_eq!(header.len(), 4 + 8 + 8 + 4 * 8);
        assert_eq!(&header[..4], &4u32.to_le_bytes());
        assert_eq!(&header[4..12], &800000u64.to_le_bytes());
        assert_eq!(&header[12..20], &3500000u64.to_le_bytes());
        assert_eq!(&header[header.len() - 4..], &3u32.to_le_bytes());
    }

    #[test]
    fn test_no_cpufreq_driver_is_fatal() {
        let fs = MockFs::new();
        fs.add_file("/sys/devices/system/cpu/online", "0-1\n");
        let mut source = CpuFreqSource::new(fs, "/sys");
        assert!(source.open().unwrap_err().is_fatal());
    }

    #[test]
    fn test_offline_cpu_is_skipped() {
        let fs = MockFs::typical_host();
        let mut source = CpuFreqSource::new(fs.clone(), "/sys");
        source.open().unwrap();
        fs.remove("/sys/devices/system/cpu/cpu1");
        let snapshots = source.sample().unwrap();
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots.iter().all(|s| s.cpu_id != 1));
    }

    #[test]
    fn test_binary_record() {
        let bytes = bincode::serialize(&CpuFreq {
            timestamp_ns: 1,
            index: 2,
            khz: 3,
            cpu_id: 9,
        })
        .unwrap();
        assert_eq!(bytes.len(), 8 + 4 + 4);
    }
}
