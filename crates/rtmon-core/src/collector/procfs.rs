//! Parsers for `/proc` and `/sys` files.
//!
//! These are pure functions over file contents so they can be tested with
//! plain strings. Malformed lines are skipped, never fatal.

use tracing::debug;

/// A file whose contents could not be used at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Numeric column `idx`, or 0 when the kernel does not emit it.
fn column(parts: &[&str], idx: usize) -> u64 {
    parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0)
}

// ============ /proc/stat ============

/// Single CPU line from `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    /// `None` for the aggregate `cpu` line.
    pub cpu_id: Option<u32>,
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

/// Parses the `cpu*` lines of `/proc/stat`.
///
/// Older kernels omit the trailing steal/guest columns; those read as 0.
pub fn parse_cpu_stat(content: &str) -> Result<Vec<CpuStat>, ParseError> {
    let mut cpus = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(label) = parts.first() else {
            continue;
        };
        let Some(suffix) = label.strip_prefix("cpu") else {
            continue;
        };

        let cpu_id = if suffix.is_empty() {
            None
        } else if let Ok(id) = suffix.parse() {
            Some(id)
        } else {
            debug!("skipping /proc/stat line: {}", line);
            continue;
        };

        if parts.len() < 5 || parts[1..].iter().any(|v| v.parse::<u64>().is_err()) {
            debug!("skipping /proc/stat line: {}", line);
            continue;
        }

        cpus.push(CpuStat {
            cpu_id,
            user: column(&parts, 1),
            nice: column(&parts, 2),
            system: column(&parts, 3),
            idle: column(&parts, 4),
            iowait: column(&parts, 5),
            irq: column(&parts, 6),
            softirq: column(&parts, 7),
            steal: column(&parts, 8),
            guest: column(&parts, 9),
            guest_nice: column(&parts, 10),
        });
    }

    if cpus.is_empty() {
        return Err(ParseError::new("no cpu lines in /proc/stat"));
    }
    Ok(cpus)
}

// ============ /proc/meminfo ============

/// Parsed data from `/proc/meminfo`. All values in KiB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub slab: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut seen_total = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = value.split_whitespace().next().and_then(|s| s.parse().ok()) else {
            debug!("skipping /proc/meminfo line: {}", line);
            continue;
        };
        match key.trim() {
            "MemTotal" => {
                info.mem_total = kb;
                seen_total = true;
            }
            "MemFree" => info.mem_free = kb,
            "MemAvailable" => info.mem_available = kb,
            "Buffers" => info.buffers = kb,
            "Cached" => info.cached = kb,
            "SwapCached" => info.swap_cached = kb,
            "SwapTotal" => info.swap_total = kb,
            "SwapFree" => info.swap_free = kb,
            "Slab" => info.slab = kb,
            _ => {}
        }
    }

    if !seen_total {
        return Err(ParseError::new("MemTotal missing from /proc/meminfo"));
    }
    Ok(info)
}

// ============ /proc/diskstats ============

/// Parsed data from `/proc/diskstats`.
///
/// Discard (kernel 4.18+) and flush (5.5+) columns read as 0 when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub major: u32,
    pub minor: u32,
    pub device: String,
    // reads: completed, merged, sectors, ms
    pub reads: u64,
    pub r_merged: u64,
    pub read_sectors: u64,
    pub read_time: u64,
    // writes: completed, merged, sectors, ms
    pub writes: u64,
    pub w_merged: u64,
    pub write_sectors: u64,
    pub write_time: u64,
    /// Gauge, not a counter.
    pub io_in_progress: u64,
    pub io_time: u64,
    pub io_weighted_time: u64,
    pub discards: u64,
    pub d_merged: u64,
    pub discard_sectors: u64,
    pub discard_time: u64,
    pub flushes: u64,
    pub flush_time: u64,
}

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards d_merged d_sectors d_time [flushes f_time]]
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStats>, ParseError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            if !parts.is_empty() {
                debug!("skipping /proc/diskstats line: {}", line);
            }
            continue;
        }

        let (Ok(major), Ok(minor)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) else {
            debug!("skipping /proc/diskstats line: {}", line);
            continue;
        };

        disks.push(DiskStats {
            major,
            minor,
            device: parts[2].to_string(),
            reads: column(&parts, 3),
            r_merged: column(&parts, 4),
            read_sectors: column(&parts, 5),
            read_time: column(&parts, 6),
            writes: column(&parts, 7),
            w_merged: column(&parts, 8),
            write_sectors: column(&parts, 9),
            write_time: column(&parts, 10),
            io_in_progress: column(&parts, 11),
            io_time: column(&parts, 12),
            io_weighted_time: column(&parts, 13),
            discards: column(&parts, 14),
            d_merged: column(&parts, 15),
            discard_sectors: column(&parts, 16),
            discard_time: column(&parts, 17),
            flushes: column(&parts, 18),
            flush_time: column(&parts, 19),
        });
    }

    Ok(disks)
}

// ============ /proc/net/dev ============

/// Parsed data from `/proc/net/dev`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Result<Vec<NetDevStats>, ParseError> {
    let mut devices = Vec::new();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((interface, counters)) = line.split_once(':') else {
            debug!("skipping /proc/net/dev line: {}", line);
            continue;
        };

        let values: Vec<u64> = counters
            .split_whitespace()
            .map_while(|s| s.parse().ok())
            .collect();
        if values.len() < 16 {
            debug!("skipping /proc/net/dev line: {}", line);
            continue;
        }

        devices.push(NetDevStats {
            interface: interface.trim().to_string(),
            rx_bytes: values[0],
            rx_packets: values[1],
            tx_bytes: values[8],
            tx_packets: values[9],
        });
    }

    Ok(devices)
}

// ============ sysfs ============

/// Parses a single-integer sysfs attribute such as `port_rcv_data`.
pub fn parse_counter(content: &str) -> Result<u64, ParseError> {
    let trimmed = content.trim();
    trimmed
        .parse()
        .map_err(|_| ParseError::new(format!("invalid counter value '{}'", trimmed)))
}

/// Parses a kernel CPU list such as `0-3,8,10-11` into sorted ids.
pub fn parse_cpu_list(content: &str) -> Result<Vec<u32>, ParseError> {
    let mut cpus = Vec::new();
    for part in content.trim().split(',').filter(|p| !p.is_empty()) {
        let bad = || ParseError::new(format!("invalid cpu list entry '{}'", part));
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| bad())?;
                let hi: u32 = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.trim().parse().map_err(|_| bad())?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "\
cpu  10000 500 3000 80000 1000 200 100 7 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0
ctxt 500000
";
        let cpus = parse_cpu_stat(content).unwrap();
        assert_eq!(cpus.len(), 3);
        assert_eq!(cpus[0].cpu_id, None);
        assert_eq!(cpus[0].user, 10000);
        assert_eq!(cpus[0].steal, 7);
        assert_eq!(cpus[2].cpu_id, Some(1));
        assert_eq!(cpus[2].idle, 20000);
    }

    #[test]
    fn test_parse_cpu_stat_skips_malformed() {
        let content = "\
cpu  1 2 3 4 5 6 7 8 9 10
cpuX 1 2 3 4
cpu0 1 2 garbage 4
cpu1 1 2 3 4
";
        let cpus = parse_cpu_stat(content).unwrap();
        assert_eq!(cpus.len(), 2);
        assert_eq!(cpus[1].cpu_id, Some(1));
        assert_eq!(cpus[1].iowait, 0);
    }

    #[test]
    fn test_parse_cpu_stat_empty_is_error() {
        assert!(parse_cpu_stat("intr 1 2 3\n").is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:         1024 kB
SwapTotal:       4096000 kB
SwapFree:        4095000 kB
Slab:             512000 kB
HugePages_Total:       0
";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_available, 12000000);
        assert_eq!(info.cached, 2048000);
        assert_eq!(info.swap_cached, 1024);
        assert_eq!(info.swap_free, 4095000);
        assert_eq!(info.slab, 512000);
    }

    #[test]
    fn test_parse_meminfo_requires_total() {
        assert!(parse_meminfo("MemFree: 1 kB\n").is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   8       0 sda 1234 0 56789 100 5678 0 98765 200 0 150 300 11 1 88 9 40 6
   8       1 sda1 1000 0 50000 80 5000 0 90000 180 0 130 260
 259       0 nvme0n1 9999 0 123456 500 8888 0 654321 400 5 1000 2000 0 0 0 0
broken line
";
        let disks = parse_diskstats(content).unwrap();

        assert_eq!(disks.len(), 3);

        assert_eq!(disks[0].major, 8);
        assert_eq!(disks[0].minor, 0);
        assert_eq!(disks[0].device, "sda");
        assert_eq!(disks[0].reads, 1234);
        assert_eq!(disks[0].read_sectors, 56789);
        assert_eq!(disks[0].write_sectors, 98765);
        assert_eq!(disks[0].io_weighted_time, 300);
        assert_eq!(disks[0].discards, 11);
        assert_eq!(disks[0].discard_sectors, 88);
        assert_eq!(disks[0].flushes, 40);
        assert_eq!(disks[0].flush_time, 6);

        assert_eq!(disks[1].discards, 0);
        assert_eq!(disks[2].device, "nvme0n1");
        assert_eq!(disks[2].io_in_progress, 5);
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
  eth0: 9876543     5678    1    2    0     0          0        10 87654321     4321    3    4    0     0       0          0
  bad0: 1 2 3
";
        let devices = parse_net_dev(content).unwrap();

        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].interface, "lo");
        assert_eq!(devices[0].rx_bytes, 1234567);
        assert_eq!(devices[0].rx_packets, 1234);
        assert_eq!(devices[0].tx_bytes, 1234567);

        assert_eq!(devices[1].interface, "eth0");
        assert_eq!(devices[1].rx_bytes, 9876543);
        assert_eq!(devices[1].tx_bytes, 87654321);
        assert_eq!(devices[1].tx_packets, 4321);
    }

    #[test]
    fn test_parse_net_dev_glued_counter() {
        // Large counters can touch the colon.
        let content = "eth1:12345678901 10 0 0 0 0 0 0 555 5 0 0 0 0 0 0\n";
        let devices = parse_net_dev(content).unwrap();
        assert_eq!(devices[0].interface, "eth1");
        assert_eq!(devices[0].rx_bytes, 12345678901);
        assert_eq!(devices[0].tx_bytes, 555);
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("123456\n").unwrap(), 123456);
        assert!(parse_counter("n/a").is_err());
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3\n").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0,2-3,8").unwrap(), vec![0, 2, 3, 8]);
        assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a-b").is_err());
    }
}
