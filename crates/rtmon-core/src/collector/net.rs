//! Network interface byte counters from `/proc/net/dev`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::procfs::parse_net_dev;
use super::{CollectError, FileSystem, MetricSource, read_required};
use crate::sample::{Counter, DeltaError, Point, Sample, delta, interval, kib_per_sec, same_entity};
use crate::util::now_ns;

/// Cumulative counters of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetCounters {
    pub timestamp_ns: i64,
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// Throughput of one interface over one interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetRate {
    pub timestamp_ns: i64,
    pub interface: String,
    pub rx_kib_s: i64,
    pub tx_kib_s: i64,
}

impl Sample for NetCounters {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("network_stats", self.timestamp_ns)
            .tag("interface", self.interface.clone())
            .field("rx_bytes", self.rx_bytes)
            .field("tx_bytes", self.tx_bytes)
    }
}

impl Sample for NetRate {
    fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    fn point(&self) -> Point {
        Point::new("network_stats", self.timestamp_ns)
            .tag("interface", self.interface.clone())
            .field("rx_kib_s", self.rx_kib_s)
            .field("tx_kib_s", self.tx_kib_s)
    }
}

impl Counter for NetCounters {
    type Key = String;
    type Rate = NetRate;

    fn key(&self) -> String {
        self.interface.clone()
    }

    fn rate_since(&self, earlier: &Self) -> Result<NetRate, DeltaError> {
        same_entity(&self.interface, &earlier.interface)?;
        let dt = interval(self.timestamp_ns, earlier.timestamp_ns)?;
        let rx = delta("rx_bytes", self.rx_bytes, earlier.rx_bytes)?;
        let tx = delta("tx_bytes", self.tx_bytes, earlier.tx_bytes)?;
        Ok(NetRate {
            timestamp_ns: self.timestamp_ns,
            interface: self.interface.clone(),
            rx_kib_s: kib_per_sec(rx, dt),
            tx_kib_s: kib_per_sec(tx, dt),
        })
    }
}

/// Every interface listed in `/proc/net/dev`, keyed by name.
pub struct NetSource<F: FileSystem> {
    fs: F,
    dev_path: PathBuf,
}

impl<F: FileSystem> NetSource<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            dev_path: proc_path.as_ref().join("net/dev"),
        }
    }
}

impl<F: FileSystem> MetricSource for NetSource<F> {
    type Snapshot = NetCounters;

    fn name(&self) -> &'static str {
        "net"
    }

    fn open(&mut self) -> Result<(), CollectError> {
        let content = read_required(&self.fs, &self.dev_path)?;
        parse_net_dev(&content)?;
        Ok(())
    }

    fn sample(&mut self) -> Result<Vec<NetCounters>, CollectError> {
        let content = self.fs.read_to_string(&self.dev_path)?;
        let timestamp_ns = now_ns();
        Ok(parse_net_dev(&content)?
            .into_iter()
            .map(|dev| NetCounters {
                timestamp_ns,
                interface: dev.interface,
                rx_bytes: dev.rx_bytes,
                tx_bytes: dev.tx_bytes,
                rx_packets: dev.rx_packets,
                tx_packets: dev.tx_packets,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::sample::FieldValue;

    fn counters(ts: i64, interface: &str, rx: u64, tx: u64) -> NetCounters {
        NetCounters {
            timestamp_ns: ts,
            interface: interface.to_string(),
            rx_bytes: rx,
            tx_bytes: tx,
            ..Default::default()
        }
    }

    #[test]
    fn test_sample() {
        let mut source = NetSource::new(MockFs::typical_host(), "/proc");
        source.open().unwrap();
        let snapshots = source.sample().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].interface, "eth0");
        assert_eq!(snapshots[1].rx_bytes, 987654321);
        assert_eq!(snapshots[1].tx_packets, 456789);
        assert_eq!(snapshots[1].key(), "eth0");
    }

    #[test]
    fn test_rate_in_kib_per_second() {
        let earlier = counters(1_000_000_000, "eth0", 1_000, 0);
        let current = counters(3_000_000_000, "eth0", 1_000 + 2 * 1024 * 10, 1024);
        let rate = current.rate_since(&earlier).unwrap();
        assert_eq!(rate.rx_kib_s, 10);
        assert_eq!(rate.tx_kib_s, 0);

        let point = rate.point();
        assert_eq!(point.measurement, "network_stats");
        assert_eq!(point.tags, vec![("interface", "eth0".to_string())]);
        assert_eq!(point.fields[0], ("rx_kib_s", FieldValue::Int(10)));
    }

    #[test]
    fn test_rate_rejects_bad_input() {
        let earlier = counters(1_000, "eth0", 500, 500);
        assert!(matches!(
            counters(2_000, "eth0", 100, 600).rate_since(&earlier),
            Err(DeltaError::CounterRegression { field: "rx_bytes", .. })
        ));
        assert!(matches!(
            counters(1_000, "eth0", 600, 600).rate_since(&earlier),
            Err(DeltaError::NonPositiveInterval { .. })
        ));
        assert!(matches!(
            counters(2_000, "lo", 600, 600).rate_since(&earlier),
            Err(DeltaError::EntityMismatch { .. })
        ));
    }

    #[test]
    fn test_raw_point_carries_bytes() {
        let point = counters(5, "lo", 1, 2).point();
        assert_eq!(
            point.fields,
            vec![
                ("rx_bytes", FieldValue::UInt(1)),
                ("tx_bytes", FieldValue::UInt(2))
            ]
        );
    }

    #[test]
    fn test_binary_layout_has_length_prefixed_name() {
        let bytes = bincode::serialize(&counters(0, "eth0", 0, 0)).unwrap();
        assert_eq!(&bytes[8..16], &4u64.to_le_bytes());
        assert_eq!(&bytes[16..20], b"eth0");
        assert_eq!(bytes.len(), 8 + 8 + 4 + 4 * 8);
    }
}
