//! Resolved and validated monitor configuration.
//!
//! The daemon collects raw command-line values into [`MonitorOptions`];
//! [`MonitorConfig::resolve`] checks them all before any thread is started.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::sink::{DEFAULT_MAX_PENDING, Endpoint, EndpointError, HttpOptions};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// The metrics this monitor can sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    CpuFreq,
    Mem,
    Disk,
    Net,
    Ib,
}

/// Number of series a metric produces per tick, relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// One series per core.
    High,
    /// One series per device.
    Medium,
    /// A single series.
    Low,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Cpu,
        MetricKind::CpuFreq,
        MetricKind::Mem,
        MetricKind::Disk,
        MetricKind::Net,
        MetricKind::Ib,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::CpuFreq => "cpufreq",
            MetricKind::Mem => "mem",
            MetricKind::Disk => "disk",
            MetricKind::Net => "net",
            MetricKind::Ib => "ib",
        }
    }

    pub fn cardinality(self) -> Cardinality {
        match self {
            MetricKind::Cpu | MetricKind::CpuFreq => Cardinality::High,
            MetricKind::Disk | MetricKind::Net | MetricKind::Ib => Cardinality::Medium,
            MetricKind::Mem => Cardinality::Low,
        }
    }

    /// Whether the remote sink receives rates rather than raw values.
    pub fn is_cumulative(self) -> bool {
        !matches!(self, MetricKind::CpuFreq | MetricKind::Mem)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Cardinality {
    /// Lines per network batch for a given base size; never below 1.
    pub fn batch_size(self, base: usize) -> usize {
        let size = match self {
            Cardinality::High => base,
            Cardinality::Medium => base / 10,
            Cardinality::Low => base / 100,
        };
        size.max(1)
    }
}

/// Where one metric's samples go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Binary records appended to a local file.
    File(PathBuf),
    /// Line protocol to the configured remote endpoint.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricConfig {
    pub kind: MetricKind,
    pub destination: Destination,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: Endpoint,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub base_batch_size: usize,
    /// Batches allowed to wait for delivery per metric before the oldest
    /// are dropped.
    pub max_pending_batches: usize,
}

impl RemoteConfig {
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            token: self.token.clone(),
        }
    }

    pub fn batch_size(&self, kind: MetricKind) -> usize {
        kind.cardinality().batch_size(self.base_batch_size)
    }
}

/// Unvalidated settings as given on the command line.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub sampling_frequency: f64,
    /// Enabled metrics with their optional output file.
    pub metrics: Vec<(MetricKind, Option<PathBuf>)>,
    pub remote_url: Option<String>,
    pub token: Option<String>,
    pub batch_size: usize,
    pub max_pending_batches: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub proc_path: PathBuf,
    pub sys_path: PathBuf,
    pub shutdown_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            sampling_frequency: 1.0,
            metrics: Vec::new(),
            remote_url: None,
            token: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_pending_batches: DEFAULT_MAX_PENDING,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            proc_path: PathBuf::from("/proc"),
            sys_path: PathBuf::from("/sys"),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidFrequency(f64),
    NoMetrics,
    /// A metric has no output file and no remote endpoint is configured.
    NoDestination(MetricKind),
    DuplicateMetric(MetricKind),
    Endpoint(EndpointError),
    ZeroBatchSize,
    ZeroMaxPending,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidFrequency(hz) => {
                write!(f, "sampling frequency must be a positive number, got {}", hz)
            }
            ConfigError::NoMetrics => write!(f, "no metric enabled"),
            ConfigError::NoDestination(kind) => write!(
                f,
                "metric {} needs an output file or a remote endpoint",
                kind
            ),
            ConfigError::DuplicateMetric(kind) => write!(f, "metric {} enabled twice", kind),
            ConfigError::Endpoint(e) => write!(f, "{}", e),
            ConfigError::ZeroBatchSize => write!(f, "batch size must be at least 1"),
            ConfigError::ZeroMaxPending => write!(f, "pending batch limit must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<EndpointError> for ConfigError {
    fn from(e: EndpointError) -> Self {
        ConfigError::Endpoint(e)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub metrics: Vec<MetricConfig>,
    pub remote: Option<RemoteConfig>,
    pub proc_path: PathBuf,
    pub sys_path: PathBuf,
    pub shutdown_timeout: Duration,
}

impl MonitorConfig {
    /// Validates options. With a remote endpoint every metric goes remote and
    /// file paths are ignored.
    pub fn resolve(options: MonitorOptions) -> Result<Self, ConfigError> {
        let hz = options.sampling_frequency;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(ConfigError::InvalidFrequency(hz));
        }
        let interval = Duration::try_from_secs_f64(1.0 / hz)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(ConfigError::InvalidFrequency(hz))?;

        if options.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if options.max_pending_batches == 0 {
            return Err(ConfigError::ZeroMaxPending);
        }
        if options.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        let remote = options
            .remote_url
            .as_deref()
            .map(|url| -> Result<RemoteConfig, ConfigError> {
                Ok(RemoteConfig {
                    endpoint: Endpoint::parse(url)?,
                    token: options.token.clone().filter(|t| !t.is_empty()),
                    connect_timeout: options.connect_timeout,
                    request_timeout: options.request_timeout,
                    base_batch_size: options.batch_size,
                    max_pending_batches: options.max_pending_batches,
                })
            })
            .transpose()?;

        let mut metrics: Vec<MetricConfig> = Vec::with_capacity(options.metrics.len());
        for (kind, path) in options.metrics {
            if metrics.iter().any(|m| m.kind == kind) {
                return Err(ConfigError::DuplicateMetric(kind));
            }
            let destination = match (&remote, path) {
                (Some(_), _) => Destination::Remote,
                (None, Some(path)) => Destination::File(path),
                (None, None) => return Err(ConfigError::NoDestination(kind)),
            };
            metrics.push(MetricConfig { kind, destination });
        }

        Ok(Self {
            interval,
            metrics,
            remote,
            proc_path: options.proc_path,
            sys_path: options.sys_path,
            shutdown_timeout: options.shutdown_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(metrics: Vec<(MetricKind, Option<PathBuf>)>) -> MonitorOptions {
        MonitorOptions {
            sampling_frequency: 10.0,
            metrics,
            ..Default::default()
        }
    }

    #[test]
    fn test_file_destinations() {
        let config = MonitorConfig::resolve(options(vec![
            (MetricKind::Cpu, Some(PathBuf::from("cpu.bin"))),
            (MetricKind::Mem, Some(PathBuf::from("mem.bin"))),
        ]))
        .unwrap();
        assert_eq!(config.interval, Duration::from_millis(100));
        assert!(config.remote.is_none());
        assert_eq!(
            config.metrics[1],
            MetricConfig {
                kind: MetricKind::Mem,
                destination: Destination::File(PathBuf::from("mem.bin"))
            }
        );
    }

    #[test]
    fn test_remote_overrides_files() {
        let mut opts = options(vec![
            (MetricKind::Disk, Some(PathBuf::from("disk.bin"))),
            (MetricKind::Net, None),
        ]);
        opts.remote_url = Some("http://db.local:8086".to_string());
        opts.token = Some("secret".to_string());

        let config = MonitorConfig::resolve(opts).unwrap();
        assert!(config.metrics.iter().all(|m| m.destination == Destination::Remote));

        let remote = config.remote.unwrap();
        assert_eq!(remote.endpoint.port, 8086);
        assert_eq!(remote.endpoint.path, "/write?precision=ns");
        assert_eq!(remote.http_options().token.as_deref(), Some("secret"));
        assert_eq!(remote.batch_size(MetricKind::Disk), 100);
        assert_eq!(remote.max_pending_batches, DEFAULT_MAX_PENDING);
    }

    #[test]
    fn test_rejects_bad_frequency() {
        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e300] {
            let mut opts = options(vec![(MetricKind::Cpu, Some(PathBuf::from("c")))]);
            opts.sampling_frequency = hz;
            assert!(matches!(
                MonitorConfig::resolve(opts),
                Err(ConfigError::InvalidFrequency(_))
            ));
        }
    }

    #[test]
    fn test_rejects_incomplete_config() {
        assert_eq!(
            MonitorConfig::resolve(options(vec![])).unwrap_err(),
            ConfigError::NoMetrics
        );
        assert_eq!(
            MonitorConfig::resolve(options(vec![(MetricKind::Ib, None)])).unwrap_err(),
            ConfigError::NoDestination(MetricKind::Ib)
        );
        assert_eq!(
            MonitorConfig::resolve(options(vec![
                (MetricKind::Cpu, Some(PathBuf::from("a"))),
                (MetricKind::Cpu, Some(PathBuf::from("b"))),
            ]))
            .unwrap_err(),
            ConfigError::DuplicateMetric(MetricKind::Cpu)
        );

        let mut opts = options(vec![(MetricKind::Cpu, None)]);
        opts.batch_size = 0;
        assert_eq!(
            MonitorConfig::resolve(opts).unwrap_err(),
            ConfigError::ZeroBatchSize
        );

        let mut opts = options(vec![(MetricKind::Cpu, None)]);
        opts.max_pending_batches = 0;
        assert_eq!(
            MonitorConfig::resolve(opts).unwrap_err(),
            ConfigError::ZeroMaxPending
        );

        let mut opts = options(vec![(MetricKind::Cpu, None)]);
        opts.remote_url = Some("https://db.local".to_string());
        assert!(matches!(
            MonitorConfig::resolve(opts),
            Err(ConfigError::Endpoint(_))
        ));
    }

    #[test]
    fn test_batch_policy() {
        assert_eq!(MetricKind::Cpu.cardinality().batch_size(1000), 1000);
        assert_eq!(MetricKind::Net.cardinality().batch_size(1000), 100);
        assert_eq!(MetricKind::Mem.cardinality().batch_size(1000), 10);
        assert_eq!(MetricKind::Mem.cardinality().batch_size(50), 1);
        assert_eq!(MetricKind::Ib.cardinality().batch_size(1), 1);
    }

    #[test]
    fn test_cumulative_metrics() {
        let cumulative: Vec<_> = MetricKind::ALL
            .into_iter()
            .filter(|k| k.is_cumulative())
            .map(MetricKind::name)
            .collect();
        assert_eq!(cumulative, vec!["cpu", "disk", "net", "ib"]);
    }
}
