//! consumption - estimates the power draw and energy of a set of processes.
//!
//! Usage:
//!   consumption 1234                  # 5 samples of PID 1234, one per second
//!   consumption -s 0 1234             # sample until Ctrl-C
//!   consumption --tree 1234           # include every descendant of 1234
//!   consumption -s 60 -i 500ms 10..12 # 60 samples of PIDs 10, 11, 12
//!   consumption --csv out/run.csv --html out/run.html 1234

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use consumption::collector::{
    CollectError, Collector, CollectorOptions, ProcReader, RealFs, SystemParams,
    new_collector_with,
};
use consumption::fmt::format_interval;
use consumption::power::{Accumulator, Config};
use consumption::report::{
    ReportError, ReportPaths, ReportSink, Row, RunInfo, StdoutFormat, finish_run, write_header,
    write_row,
};
use consumption::util::{ArgParseError, HostSummary, parse_interval, parse_pids, pid_names};

/// Longest uninterrupted sleep, so Ctrl-C is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Process power and energy estimator.
#[derive(Parser)]
#[command(
    name = "consumption",
    about = "Estimates power draw and energy of Linux processes",
    version
)]
struct Args {
    /// Target PIDs: `N` or inclusive ranges `N..M`, space or comma separated.
    #[arg(value_name = "PID", required = true, num_args = 1..)]
    pids: Vec<String>,

    /// Also measure every descendant of the given PIDs.
    #[arg(long)]
    tree: bool,

    /// Number of reported samples (0 = until interrupted).
    #[arg(short, long, default_value_t = 5)]
    samples: u64,

    /// Sampling interval: 500ms, 1s, 2m, or bare seconds.
    #[arg(short, long, default_value = "1s", value_parser = parse_interval)]
    interval: Duration,

    /// EMA factor for VM-wide utilization (0 disables smoothing).
    #[arg(long, default_value_t = 0.5, value_parser = parse_unit)]
    ema: f64,

    /// Initial samples to discard from output and averages.
    #[arg(long, default_value_t = 1)]
    warmup: u64,

    /// Idle power of the machine, watts.
    #[arg(long, env = "CONSUMPTION_P_IDLE")]
    p_idle: Option<f64>,

    /// Power at full CPU load, watts.
    #[arg(long, env = "CONSUMPTION_P_MAX")]
    p_max: Option<f64>,

    /// Exponent of the CPU power curve.
    #[arg(long, env = "CONSUMPTION_GAMMA")]
    gamma: Option<f64>,

    /// Joules per byte read from storage.
    #[arg(long = "er", env = "CONSUMPTION_E_READ")]
    e_read: Option<f64>,

    /// Joules per byte written to storage.
    #[arg(long = "ew", env = "CONSUMPTION_E_WRITE")]
    e_write: Option<f64>,

    /// Joules per refaulted byte.
    #[arg(long = "e-mem-ref", env = "CONSUMPTION_E_MEM_REFAULT")]
    e_mem_refault: Option<f64>,

    /// Joules per byte of RSS churn.
    #[arg(long = "e-mem-rss", env = "CONSUMPTION_E_MEM_RSS")]
    e_mem_rss: Option<f64>,

    /// Fraction of idle power attributed to the processes, in [0, 1].
    #[arg(long, env = "CONSUMPTION_ALPHA", value_parser = parse_unit)]
    alpha: Option<f64>,

    /// Aligned table output (default).
    #[arg(long, conflicts_with = "plain")]
    pretty: bool,

    /// Comma separated lines instead of a table.
    #[arg(long)]
    plain: bool,

    /// Write every tick to a CSV file.
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,

    /// Write every tick to a JSON file at the end of the run.
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Write an HTML report at the end of the run.
    #[arg(long, value_name = "PATH")]
    html: Option<PathBuf>,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Mount point of the cgroup v2 hierarchy.
    #[arg(long, default_value = "/sys/fs/cgroup")]
    cgroup_root: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a factor in [0, 1].
fn parse_unit(s: &str) -> Result<f64, String> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("'{}' is outside [0, 1]", s));
    }
    Ok(v)
}

/// Failures that end the run.
#[derive(Debug)]
enum RunError {
    NoPids,
    Args(ArgParseError),
    Collect(CollectError),
    Report(ReportError),
    Io(io::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::NoPids => write!(f, "at least one PID is required"),
            RunError::Args(e) => write!(f, "{}", e),
            RunError::Collect(e) => write!(f, "{}", e),
            RunError::Report(e) => write!(f, "{}", e),
            RunError::Io(e) => write!(f, "output error: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ArgParseError> for RunError {
    fn from(e: ArgParseError) -> Self {
        RunError::Args(e)
    }
}

impl From<CollectError> for RunError {
    fn from(e: CollectError) -> Self {
        RunError::Collect(e)
    }
}

impl From<ReportError> for RunError {
    fn from(e: ReportError) -> Self {
        RunError::Report(e)
    }
}

impl From<io::Error> for RunError {
    fn from(e: io::Error) -> Self {
        RunError::Io(e)
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Builds the model from user overrides on top of the defaults.
fn model_config(args: &Args) -> Config {
    let mut overrides = Config::unset();
    let fields = [
        (args.p_idle, &mut overrides.p_idle),
        (args.p_max, &mut overrides.p_max),
        (args.gamma, &mut overrides.gamma),
        (args.e_read, &mut overrides.e_read),
        (args.e_write, &mut overrides.e_write),
        (args.e_mem_refault, &mut overrides.e_mem_refault),
        (args.e_mem_rss, &mut overrides.e_mem_rss),
        (args.alpha, &mut overrides.alpha),
    ];
    for (value, slot) in fields {
        if let Some(v) = value {
            *slot = v;
        }
    }
    Config::merged(&overrides)
}

/// Sleeps for `total`, waking early once `running` is cleared.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// State of one measurement run.
struct Run<'a> {
    args: &'a Args,
    pids: &'a [u32],
    format: StdoutFormat,
    accumulator: Accumulator,
    sink: ReportSink,
}

impl Run<'_> {
    /// Ticks until the sample limit, an interrupt, or every target exiting.
    fn measure(
        &mut self,
        collector: &mut dyn Collector,
        running: &AtomicBool,
    ) -> Result<(), RunError> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_header(&mut out, self.format)?;
        out.flush()?;

        let mut taken: u64 = 0;
        let mut last = Instant::now();

        while running.load(Ordering::SeqCst) {
            if self.args.samples > 0 && self.accumulator.samples() >= self.args.samples {
                break;
            }

            sleep_while_running(self.args.interval, running);
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;

            let snap = match collector.sample(self.pids, dt) {
                Ok(snap) => snap,
                Err(e) if e.is_all_exited() => {
                    info!("All target processes exited");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Sample failed, skipping tick");
                    continue;
                }
            };

            taken += 1;
            if taken <= self.args.warmup {
                debug!(sample = taken, warmup = self.args.warmup, "Warmup sample discarded");
                continue;
            }

            let power = self.accumulator.apply(&snap);
            let row = Row::new(
                Local::now(),
                &snap,
                &power,
                self.accumulator.cumulative_energy(),
            );
            write_row(&mut out, self.format, &row)?;
            out.flush()?;
            self.sink.record(row)?;
        }

        Ok(())
    }
}

fn run(args: Args) -> Result<(), RunError> {
    let pids = parse_pids(&args.pids)?;
    if pids.is_empty() {
        return Err(RunError::NoPids);
    }

    let params = SystemParams::detect();
    let reader = ProcReader::new(RealFs::new(), &args.proc_path, params.page_size);
    let pids = if args.tree {
        let tree = reader.process_tree(&pids);
        debug!(roots = pids.len(), total = tree.len(), "Expanded process tree");
        tree
    } else {
        pids
    };

    let config = model_config(&args);
    let host = HostSummary::read(&reader, params.nproc);
    let names = pid_names(&reader, &pids);

    let sink = ReportSink::open(&ReportPaths {
        csv: args.csv.clone(),
        json: args.json.clone(),
        html: args.html.clone(),
    })?;

    let options = CollectorOptions {
        proc_path: args.proc_path.clone(),
        cgroup_root: args.cgroup_root.clone(),
        ema_alpha: args.ema,
        params,
    };
    let mut collector = new_collector_with(RealFs::new(), &options)?;

    println!(
        "{} | kernel {} | {} CPUs | {} RAM | {} backend | {} PIDs | every {}",
        host.hostname,
        host.kernel,
        host.cpus,
        host.mem_display(),
        collector.name(),
        pids.len(),
        format_interval(args.interval),
    );
    debug!(?config, "Power model");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut state = Run {
        args: &args,
        pids: &pids,
        format: if args.plain && !args.pretty {
            StdoutFormat::Plain
        } else {
            StdoutFormat::Table
        },
        accumulator: Accumulator::new(config),
        sink,
    };

    let measured = state.measure(collector.as_mut(), &running);
    let finished = finish_run(
        &mut io::stdout().lock(),
        collector.as_mut(),
        &state.accumulator,
        state.sink,
        &RunInfo {
            host: &host,
            interval: args.interval,
            processes: &names,
        },
    );
    measured?;
    finished?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
