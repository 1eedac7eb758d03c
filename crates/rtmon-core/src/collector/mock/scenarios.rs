//! Pre-built mock filesystem scenarios for testing.
//!
//! These provide realistic `/proc` and `/sys` states for every metric.

use super::filesystem::MockFs;

impl MockFs {
    /// A four-core host with two block devices, one NIC and one HCA.
    ///
    /// Also includes a loop device and a device-mapper volume, which the disk
    /// source ignores.
    pub fn typical_host() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/sys/kernel/hostname", "node01\n");

        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );

        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:         1024 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4095000 kB
Dirty:              1024 kB
Writeback:             0 kB
Slab:             512000 kB
SReclaimable:     256000 kB
",
        );

        fs.add_file(
            "/proc/diskstats",
            "\
   7       0 loop0 55 0 1234 10 0 0 0 0 0 20 10 0 0 0 0 0 0
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 10 0 80 5 100 7
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0 0 0
 253       0 dm-0 40000 0 1800000 9000 29000 0 1400000 7000 0 14000 16000 0 0 0 0 0 0
",
        );

        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );

        fs.add_file("/sys/devices/system/cpu/online", "0-3\n");
        for (cpu, khz) in [(0, 2400000), (1, 2300000), (2, 3100000), (3, 1200000)] {
            let base = format!("/sys/devices/system/cpu/cpu{}/cpufreq", cpu);
            fs.add_file(format!("{}/scaling_cur_freq", base), format!("{}\n", khz));
            fs.add_file(format!("{}/cpuinfo_min_freq", base), "800000\n");
            fs.add_file(format!("{}/cpuinfo_max_freq", base), "3500000\n");
        }

        fs.add_file("/sys/block/sda/queue/hw_sector_size", "512\n");
        fs.add_file("/sys/block/nvme0n1/queue/hw_sector_size", "4096\n");

        let counters = "/sys/class/infiniband/mlx5_0/ports/1/counters";
        fs.add_file(format!("{}/port_rcv_data", counters), "1000000\n");
        fs.add_file(format!("{}/port_xmit_data", counters), "2000000\n");

        fs
    }
}
