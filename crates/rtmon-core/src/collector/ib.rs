//! InfiniBand port data counters from `/sys/class/infiniband`.
//!
//! `port_rcv_data` and `port_xmit_data` count 4-octet words on port 1 of each
//! HCA. The device directory is rescanned every tick so hot-plugged HCAs are
//! noticed (and dropped, since they are not in the header table).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::index::EntityIndex;
use super::procfs::parse_counter;
use super::{CollectError, FileSystem, MetricSource};
use crate::sample::{Counter, DeltaError, Point, Sample, delta, interval, kib_per_sec, same_entity};
use crate::util::now_ns;

/// Bytes per unit of the port data counters.
const WORD_BYTES: u64 = 4;
const PORT: &str = "1";

/// Cumulative data counters of one HCA port, in 4-byte words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IbCounters {
    pub timestamp_ns: i64,
    pub index: u32,
    pub rcv_words: u64,
    pub xmit_words: u64,
    #[serde(skip)]
    pub device: Arc<str>,
}

/// Port throughput over one interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IbRate {
    pub timestamp_ns: i64,
    pub index: u32,
    pub rcv_kib_s: i64,
    pub xmit_kib_s: i64,
    #[serde(skip)]
    pub device: Arc<str>,
}

impl Sample for IbCounters {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("infiniband", self.timestamp_ns)
            .tag("device", self.device.as_ref())
            .field("port_rcv_data", self.rcv_words)
            .field("port_xmit_data", self.xmit_words)
    }
}

impl Sample for IbRate {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("infiniband", self.timestamp_ns)
            .tag("device", self.device.as_ref())
            .field("port_rcv_data", self.rcv_kib_s)
            .field("port_xmit_data", self.xmit_kib_s)
    }
}

impl Counter for IbCounters {
    type Key = u32;
    type Rate = IbRate;

    fn key(&self) -> u32 {
        self.index
    }

    fn rate_since(&self, earlier: &Self) -> Result<IbRate, DeltaError> {
        same_entity(&self.index, &earlier.index)?;
        let dt = interval(self.timestamp_ns, earlier.timestamp_ns)?;
        let rcv = delta("port_rcv_data", self.rcv_words, earlier.rcv_words)?;
        let xmit = delta("port_xmit_data", self.xmit_words, earlier.xmit_words)?;
        Ok(IbRate {
            timestamp_ns: self.timestamp_ns,
            index: self.index,
            rcv_kib_s: kib_per_sec(rcv.saturating_mul(WORD_BYTES), dt),
            xmit_kib_s: kib_per_sec(xmit.saturating_mul(WORD_BYTES), dt),
            device: self.device.clone(),
        })
    }
}

pub struct IbSource<F: FileSystem> {
    fs: F,
    class_path: PathBuf,
    index: EntityIndex,
    names: Vec<Arc<str>>,
}

impl<F: FileSystem> IbSource<F> {
    pub fn new(fs: F, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            class_path: sys_path.as_ref().join("class/infiniband"),
            index: EntityIndex::default(),
            names: Vec::new(),
        }
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    /// Device names under the class directory, sorted.
    fn scan(&self) -> std::io::Result<Vec<String>> {
        let mut devices: Vec<String> = self
            .fs
            .read_dir(&self.class_path)?
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        devices.sort();
        Ok(devices)
    }

    fn read_counter(&self, device: &str, counter: &str) -> Result<u64, CollectError> {
        let path = self
            .class_path
            .join(device)
            .join("ports")
            .join(PORT)
            .join("counters")
            .join(counter);
        Ok(parse_counter(&self.fs.read_to_string(&path)?)?)
    }
}

impl<F: FileSystem> MetricSource for IbSource<F> {
    type Snapshot = IbCounters;

    fn name(&self) -> &'static str {
        "ib"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let devices = self
            .scan()
            .map_err(|e| CollectError::unavailable(&self.class_path, e))?;
        if devices.is_empty() {
            return Err(CollectError::unavailable(
                &self.class_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no InfiniBand devices"),
            ));
        }
        self.index = EntityIndex::new(devices);
        self.names = self.index.iter().map(|(_, name)| Arc::from(name)).collect();
        info!("ib: tracking {} devices", self.index.len());
        Ok(())
    }

    fn header(&self) -> Option<Vec<u8>> {
        Some(self.index.header_with(|_, _, _| {}))
    }

    fn sample(&mut self) -> Result<Vec<IbCounters>, CollectError> {
        let devices = self.scan()?;
        let timestamp_ns = now_ns();

        let mut snapshots = Vec::with_capacity(self.names.len());
        for device in &devices {
            let Some(index) = self.index.lookup("ib", device) else {
                continue;
            };
            let Some(name) = self.names.get(index as usize).cloned() else {
                continue;
            };
            let counters = self
                .read_counter(device, "port_rcv_data")
                .and_then(|rcv| Ok((rcv, self.read_counter(device, "port_xmit_data")?)));
            match counters {
                Ok((rcv_words, xmit_words)) => snapshots.push(IbCounters {
                    timestamp_ns,
                    index,
                    rcv_words,
                    xmit_words,
                    device: name,
                }),
                Err(e) => debug!("ib: {}: {}", device, e),
            }
        }
        Ok(snapshots)
    }
}
