//! laminar-log demo driver
//!
//! Starts a backend worker with a stdout handler, runs a number of producer
//! threads that log concurrently, then stops the backend and reports metrics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use laminar_log::config::NO_CPU_AFFINITY;
use laminar_log::{BackendConfig, BackendWorker, LogLevel, LogRecord, StreamHandler};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// laminar-log - asynchronous logging backend demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of producer threads
    #[arg(short, long)]
    producers: Option<usize>,

    /// Records logged by each producer
    #[arg(short, long)]
    records: Option<usize>,

    /// Backend idle sleep in microseconds
    #[arg(long)]
    sleep_us: Option<u64>,

    /// CPU to pin the backend thread to
    #[arg(long)]
    cpu: Option<usize>,

    /// Backend thread name
    #[arg(long)]
    thread_name: Option<String>,

    /// Print raw ticks instead of calibrated wall-clock time
    #[arg(long)]
    no_tsc_clock: bool,

    /// Log level for the backend's own diagnostics
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Contents of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    backend: BackendSection,
    workload: WorkloadSection,
}

/// `[backend]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct BackendSection {
    sleep_duration_us: u64,
    /// 65535 means unpinned
    cpu_affinity: u16,
    thread_name: String,
    enable_tsc_clock: bool,
    clock_warmup_ms: u64,
    clock_resync_interval_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            sleep_duration_us: 100,
            cpu_affinity: NO_CPU_AFFINITY,
            thread_name: laminar_log::config::DEFAULT_THREAD_NAME.to_string(),
            enable_tsc_clock: true,
            clock_warmup_ms: 100,
            clock_resync_interval_ms: 500,
        }
    }
}

/// `[workload]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct WorkloadSection {
    producers: usize,
    records_per_producer: usize,
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            producers: 4,
            records_per_producer: 1_000,
        }
    }
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Merges the file's `[backend]` table with command-line overrides.
fn backend_config(section: &BackendSection, args: &Args) -> Result<BackendConfig> {
    let mut builder = BackendConfig::builder()
        .sleep_duration(Duration::from_micros(
            args.sleep_us.unwrap_or(section.sleep_duration_us),
        ))
        .thread_name(
            args.thread_name
                .clone()
                .unwrap_or_else(|| section.thread_name.clone()),
        )
        .enable_tsc_clock(section.enable_tsc_clock && !args.no_tsc_clock)
        .clock_warmup(Duration::from_millis(section.clock_warmup_ms))
        .clock_resync_interval(Duration::from_millis(section.clock_resync_interval_ms));

    let cpu = args
        .cpu
        .or_else(|| BackendConfig::cpu_affinity_from_raw(section.cpu_affinity));
    if let Some(cpu) = cpu {
        builder = builder.cpu_affinity(cpu);
    }

    Ok(builder.build()?)
}

/// Logs `records` lines from the calling thread, retrying while the queue is full.
fn run_producer(worker: &BackendWorker<LogRecord>, records: usize) -> u64 {
    let producer = worker.contexts().register_current_thread();
    let mut retries = 0u64;

    for n in 0..records {
        let mut record = LogRecord::new(LogLevel::Info, "demo", format!("record {n}"));
        while let Err(rejected) = producer.push(record) {
            record = rejected;
            retries += 1;
            thread::yield_now();
        }
    }

    let mut flush = LogRecord::flush();
    while let Err(rejected) = producer.push(flush) {
        flush = rejected;
        thread::yield_now();
    }
    retries
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("laminar_log={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let file = load_file_config(args.config.as_deref())?;
    let config = backend_config(&file.backend, &args)?;
    let producers = args.producers.unwrap_or(file.workload.producers);
    let records = args.records.unwrap_or(file.workload.records_per_producer);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(?config, producers, records, "Starting backend");

    let worker: Arc<BackendWorker<LogRecord>> = Arc::new(BackendWorker::new(config));
    worker.handlers().add(Arc::new(StreamHandler::stdout()));
    worker.start()?;

    let started = Instant::now();
    let threads = (0..producers)
        .map(|i| {
            let worker = Arc::clone(&worker);
            thread::Builder::new()
                .name(format!("producer-{i}"))
                .spawn(move || run_producer(&worker, records))
                .context("spawning producer thread")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut retries = 0;
    for handle in threads {
        match handle.join() {
            Ok(n) => retries += n,
            Err(_) => warn!("producer thread panicked"),
        }
    }

    worker.stop()?;

    let metrics = worker.metrics().snapshot();
    info!(
        elapsed_ms = started.elapsed().as_millis(),
        records = metrics.records_processed,
        drained = metrics.drained_records,
        iterations = metrics.iterations,
        idle_iterations = metrics.idle_iterations,
        full_queue_retries = retries,
        "Done"
    );
    Ok(())
}
