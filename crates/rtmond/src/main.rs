//! rtmond - real-time host telemetry daemon.
//!
//! Samples kernel counters at a fixed frequency and writes them either to
//! per-metric binary files or, as line protocol, to a remote time-series
//! database. SIGUSR1/SIGUSR2 pause and resume sampling without a restart.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod signals;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rtmon_core::collector::{
    self, CpuFreqSource, CpuSource, DiskSource, IbSource, MemSource, MetricSource, NetSource,
    RealFs,
};
use rtmon_core::config::{
    DEFAULT_BATCH_SIZE, Destination, MetricConfig, MetricKind, MonitorConfig, MonitorOptions,
};
use rtmon_core::lifecycle::LifecycleController;
use rtmon_core::pipeline::{PipelineHandle, SamplingPipeline};
use rtmon_core::sample::Counter;
use rtmon_core::sink::{
    DEFAULT_MAX_PENDING, DeliveryWorker, FileSink, HttpClient, MetricSink, NetworkSink, SinkError,
};
use rtmon_core::supervisor::{ShutdownOutcome, Supervisor};

/// Real-time host telemetry collector.
#[derive(Parser, Debug)]
#[command(name = "rtmond", about = "Real-time host telemetry collector", version)]
struct Args {
    /// Samples per second, shared by every enabled metric.
    #[arg(short = 'f', long, value_name = "HZ")]
    sampling_frequency: f64,

    /// Sample CPU times. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    cpu: Option<Option<PathBuf>>,

    /// Sample CPU frequencies. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    cpu_freq: Option<Option<PathBuf>>,

    /// Sample memory usage. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    mem: Option<Option<PathBuf>>,

    /// Sample block device I/O. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    disk: Option<Option<PathBuf>>,

    /// Sample network interface I/O. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    net: Option<Option<PathBuf>>,

    /// Sample InfiniBand port counters. Optional value: binary output file.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    ib: Option<Option<PathBuf>>,

    /// Remote endpoint (http://host[:port][/path]). Sends every metric there
    /// instead of to files.
    #[arg(long, visible_alias = "db-url", value_name = "URL")]
    grafana: Option<String>,

    /// Token sent as `Authorization: Token <TOKEN>`.
    #[arg(long, env = "RTMON_DB_TOKEN", hide_env_values = true)]
    db_token: Option<String>,

    /// Base number of lines per network batch, scaled down for metrics with
    /// fewer series.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Batches per metric allowed to wait for delivery; the oldest are
    /// dropped beyond this.
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING, value_name = "N")]
    max_pending_batches: usize,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to /sys filesystem (for testing/mocking).
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    #[arg(long, default_value_t = 1000, value_name = "MS")]
    connect_timeout_ms: u64,

    /// Total time allowed for one delivery request, response included.
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    request_timeout_ms: u64,

    /// How long to wait for pipelines to drain on shutdown.
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    shutdown_timeout_secs: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Explicit log level (off, error, warn, info, debug, trace). Overrides -v and -q.
    #[arg(long, env = "RTMON_LOG_LEVEL", value_parser = parse_level)]
    log_level: Option<LevelFilter>,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse()
        .map_err(|e| format!("invalid log level '{}': {}", s, e))
}

impl Args {
    fn level(&self) -> LevelFilter {
        if let Some(level) = self.log_level {
            return level;
        }
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    fn monitor_options(&self) -> MonitorOptions {
        let metrics = [
            (MetricKind::Cpu, &self.cpu),
            (MetricKind::CpuFreq, &self.cpu_freq),
            (MetricKind::Mem, &self.mem),
            (MetricKind::Disk, &self.disk),
            (MetricKind::Net, &self.net),
            (MetricKind::Ib, &self.ib),
        ]
        .into_iter()
        .filter_map(|(kind, flag)| flag.as_ref().map(|path| (kind, path.clone())))
        .collect();

        MonitorOptions {
            sampling_frequency: self.sampling_frequency,
            metrics,
            remote_url: self.grafana.clone(),
            token: self.db_token.clone(),
            batch_size: self.batch_size,
            max_pending_batches: self.max_pending_batches,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            proc_path: self.proc_path.clone(),
            sys_path: self.sys_path.clone(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// Initializes the tracing subscriber for this crate and the core library.
fn init_logging(level: LevelFilter) {
    let mut filter = EnvFilter::from_default_env();
    for target in ["rtmond", "rtmon_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Failure to start one metric.
#[derive(Debug)]
enum StartError {
    Sink(SinkError),
    Spawn(io::Error),
    NoEndpoint,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Sink(e) => write!(f, "cannot open output: {}", e),
            StartError::Spawn(e) => write!(f, "cannot spawn thread: {}", e),
            StartError::NoEndpoint => write!(f, "remote destination without endpoint"),
        }
    }
}

impl std::error::Error for StartError {}

impl From<SinkError> for StartError {
    fn from(e: SinkError) -> Self {
        StartError::Sink(e)
    }
}

impl From<io::Error> for StartError {
    fn from(e: io::Error) -> Self {
        StartError::Spawn(e)
    }
}

fn build_sink(
    metric: &MetricConfig,
    config: &MonitorConfig,
    hostname: &str,
) -> Result<MetricSink, StartError> {
    match &metric.destination {
        Destination::File(path) => {
            info!(metric = %metric.kind, "writing to {}", path.display());
            Ok(MetricSink::File(FileSink::create(path)?))
        }
        Destination::Remote => {
            let remote = config.remote.as_ref().ok_or(StartError::NoEndpoint)?;
            let client = HttpClient::new(remote.endpoint.clone(), remote.http_options());
            let worker =
                DeliveryWorker::spawn(metric.kind.name(), client, remote.max_pending_batches)?;
            let batch_size = remote.batch_size(metric.kind);
            info!(
                metric = %metric.kind,
                batch_size,
                "sending to {}",
                remote.endpoint
            );
            Ok(MetricSink::Network(NetworkSink::new(
                metric.kind.name(),
                hostname,
                batch_size,
                worker,
            )))
        }
    }
}

struct Launcher<'a> {
    lifecycle: &'a Arc<LifecycleController>,
    interval: Duration,
}

impl Launcher<'_> {
    fn gauge<M: MetricSource>(&self, source: M, sink: MetricSink) -> io::Result<PipelineHandle> {
        SamplingPipeline::new(source, Arc::clone(self.lifecycle), self.interval).spawn(sink)
    }

    /// Files get raw counters; the remote gets rates.
    fn counter<M>(&self, source: M, sink: MetricSink) -> io::Result<PipelineHandle>
    where
        M: MetricSource,
        M::Snapshot: Counter,
    {
        let pipeline = SamplingPipeline::new(source, Arc::clone(self.lifecycle), self.interval);
        if matches!(sink, MetricSink::Network(_)) {
            pipeline.spawn_rates(sink)
        } else {
            pipeline.spawn(sink)
        }
    }
}

fn start_metric(
    metric: &MetricConfig,
    config: &MonitorConfig,
    hostname: &str,
    lifecycle: &Arc<LifecycleController>,
) -> Result<PipelineHandle, StartError> {
    let sink = build_sink(metric, config, hostname)?;
    let launch = Launcher {
        lifecycle,
        interval: config.interval,
    };
    let (proc_path, sys_path) = (&config.proc_path, &config.sys_path);

    let handle = match metric.kind {
        MetricKind::Cpu => launch.counter(CpuSource::new(RealFs, proc_path), sink)?,
        MetricKind::CpuFreq => launch.gauge(CpuFreqSource::new(RealFs, sys_path), sink)?,
        MetricKind::Mem => launch.gauge(MemSource::new(RealFs, proc_path), sink)?,
        MetricKind::Disk => {
            launch.counter(DiskSource::new(RealFs, proc_path, sys_path), sink)?
        }
        MetricKind::Net => launch.counter(NetSource::new(RealFs, proc_path), sink)?,
        MetricKind::Ib => launch.counter(IbSource::new(RealFs, sys_path), sink)?,
    };
    Ok(handle)
}

fn main() {
    let args = Args::parse();

    init_logging(args.level());

    let config = match MonitorConfig::resolve(args.monitor_options()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("rtmond {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={:?}, metrics=[{}], proc={}, sys={}",
        config.interval,
        config
            .metrics
            .iter()
            .map(|m| m.kind.name())
            .collect::<Vec<_>>()
            .join(", "),
        config.proc_path.display(),
        config.sys_path.display()
    );
    if args.grafana.is_some()
        && [&args.cpu, &args.cpu_freq, &args.mem, &args.disk, &args.net, &args.ib]
            .iter()
            .any(|flag| matches!(flag, Some(Some(_))))
    {
        warn!("remote endpoint given, output files are ignored");
    }

    // Before any thread exists, so every thread inherits the mask.
    let control_signals = match signals::block_control_signals() {
        Ok(set) => Some(set),
        Err(e) => {
            warn!("Failed to block SIGUSR1/SIGUSR2, pause/resume disabled: {}", e);
            None
        }
    };

    let lifecycle = Arc::new(LifecycleController::new());
    let hostname = collector::hostname(&RealFs, &config.proc_path);
    let mut supervisor = Supervisor::new(Arc::clone(&lifecycle), config.shutdown_timeout);

    for metric in &config.metrics {
        match start_metric(metric, &config, &hostname, &lifecycle) {
            Ok(handle) => supervisor.add(handle),
            Err(e) => error!(metric = %metric.kind, "Failed to start: {}", e),
        }
    }
    if supervisor.is_empty() {
        error!("No metric could be started");
        std::process::exit(1);
    }

    let (triggers, trigger_rx) = mpsc::channel();
    if let Err(e) = signals::install_termination_handler(triggers.clone()) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }
    if let Some(set) = control_signals
        && let Err(e) = signals::spawn_listener(set, triggers.clone())
    {
        warn!("Failed to start signal listener: {}", e);
    }

    lifecycle.resume();
    info!("Sampling {} metrics", supervisor.len());

    let outcome = supervisor.run(trigger_rx);
    drop(triggers);

    if outcome == ShutdownOutcome::DeadlineExceeded {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rtmond").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_command_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_metric_flags_with_and_without_path() {
        let args = parse(&["-f", "10", "--cpu", "--mem", "mem.bin", "--disk"]);
        assert_eq!(args.cpu, Some(None));
        assert_eq!(args.mem, Some(Some(PathBuf::from("mem.bin"))));
        assert_eq!(args.disk, Some(None));
        assert_eq!(args.net, None);

        let options = args.monitor_options();
        assert_eq!(
            options.metrics,
            vec![
                (MetricKind::Cpu, None),
                (MetricKind::Mem, Some(PathBuf::from("mem.bin"))),
                (MetricKind::Disk, None),
            ]
        );
    }

    #[test]
    fn test_remote_options() {
        let args = parse(&[
            "--sampling-frequency",
            "2.5",
            "--cpu-freq",
            "--db-url",
            "http://db:8086",
            "--batch-size",
            "500",
            "--connect-timeout-ms",
            "250",
            "--max-pending-batches",
            "8",
        ]);
        let options = args.monitor_options();
        assert_eq!(options.sampling_frequency, 2.5);
        assert_eq!(options.remote_url.as_deref(), Some("http://db:8086"));
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
        assert_eq!(options.max_pending_batches, 8);

        let config = MonitorConfig::resolve(options).unwrap();
        assert_eq!(config.metrics[0].destination, Destination::Remote);
    }

    #[test]
    fn test_frequency_is_required() {
        assert!(Args::try_parse_from(["rtmond", "--cpu"]).is_err());
    }

    #[test]
    fn test_log_level_selection() {
        assert_eq!(parse(&["-f", "1"]).level(), LevelFilter::INFO);
        assert_eq!(parse(&["-f", "1", "-vv"]).level(), LevelFilter::TRACE);
        assert_eq!(parse(&["-f", "1", "-q"]).level(), LevelFilter::ERROR);
        assert_eq!(
            parse(&["-f", "1", "-q", "--log-level", "debug"]).level(),
            LevelFilter::DEBUG
        );
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_file_sink_for_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.bin");
        let config = MonitorConfig::resolve(MonitorOptions {
            sampling_frequency: 1.0,
            metrics: vec![(MetricKind::Cpu, Some(path.clone()))],
            ..Default::default()
        })
        .unwrap();

        let sink = build_sink(&config.metrics[0], &config, "node01").unwrap();
        assert!(matches!(sink, MetricSink::File(_)));
        assert!(path.exists());
    }
}
