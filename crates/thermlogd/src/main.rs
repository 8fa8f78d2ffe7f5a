//! thermlogd - Serial temperature/voltage logger daemon.
//!
//! Reads line-oriented readings from a microcontroller over a serial port,
//! assembles them into records and appends them to a CSV table until
//! interrupted.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use thermlog_core::config::{
    DEFAULT_BAUD_RATE, DEFAULT_OUTPUT_PATH, DEFAULT_PORT_PATH, parse_positive_seconds,
    parse_seconds,
};
use thermlog_core::{
    AcquisitionConfig, AcquisitionError, AcquisitionSummary, CancellationToken, Protocol,
    StopReason, open_and_run,
};

/// Serial temperature/voltage logger daemon.
#[derive(Parser)]
#[command(name = "thermlogd", about = "Serial temperature/voltage logger", version)]
struct Args {
    /// Serial device path.
    #[arg(short, long, env = "THERMLOG_PORT", default_value = DEFAULT_PORT_PATH)]
    port: String,

    /// Serial line rate.
    #[arg(short, long, env = "THERMLOG_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Output CSV table. Truncated at startup.
    #[arg(short, long, env = "THERMLOG_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Line protocol of the firmware: dual-line or accumulator.
    #[arg(long, env = "THERMLOG_PROTOCOL", default_value = "dual-line")]
    protocol: Protocol,

    /// Seconds between forced flushes of the table.
    #[arg(long, env = "THERMLOG_FLUSH_INTERVAL", default_value = "10", value_parser = parse_seconds)]
    flush_interval: Duration,

    /// Seconds to wait after opening the device before reading.
    #[arg(long, env = "THERMLOG_SETTLE_DELAY", default_value = "2", value_parser = parse_seconds)]
    settle_delay: Duration,

    /// Seconds a single read may block. Must be greater than zero.
    #[arg(long, env = "THERMLOG_READ_TIMEOUT", default_value = "1", value_parser = parse_positive_seconds)]
    read_timeout: Duration,

    /// Discard a lone accumulator field after this many lines without its
    /// counterpart. Waits indefinitely if unset.
    #[arg(long, env = "THERMLOG_STALENESS_LIMIT", value_name = "LINES")]
    staleness_limit: Option<u32>,

    /// Discard records whose reference temperature is the sensor fault
    /// value (-1000).
    #[arg(long, env = "THERMLOG_REJECT_SENSOR_FAULTS")]
    reject_sensor_faults: bool,

    /// Read lines from a captured file instead of the serial device.
    #[arg(long, env = "THERMLOG_REPLAY", value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn to_config(&self) -> AcquisitionConfig {
        AcquisitionConfig::new(&self.port)
            .with_baud_rate(self.baud)
            .with_output_path(&self.output)
            .with_protocol(self.protocol)
            .with_flush_interval(self.flush_interval)
            .with_settle_delay(self.settle_delay)
            .with_read_timeout(self.read_timeout)
            .with_staleness_limit(self.staleness_limit)
            .with_reject_sensor_faults(self.reject_sensor_faults)
            .with_replay_path(self.replay.clone())
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("thermlogd={}", level).parse().unwrap())
        .add_directive(format!("thermlog_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn describe_summary(summary: &AcquisitionSummary) -> String {
    let cause = match summary.stopped_by {
        StopReason::Cancelled => "interrupted",
        StopReason::SourceClosed => "input ended",
    };
    format!("{}: {}", cause, summary.stats)
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = args.to_config();

    info!("thermlogd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: source={}, output={}, protocol={}, flush_interval={:?}",
        config.source_description(),
        config.output_path.display(),
        config.protocol,
        config.flush_interval
    );
    if let Some(limit) = config.staleness_limit {
        info!("Accumulator staleness limit: {} lines", limit);
    }

    // Setup graceful shutdown
    let token = CancellationToken::new();
    let t = token.clone();
    if let Err(e) = ctrlc::set_handler(move || t.cancel()) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    match open_and_run(&config, &token) {
        Ok(summary) => {
            info!("Shutdown complete ({})", describe_summary(&summary));
            ExitCode::SUCCESS
        }
        Err(AcquisitionError::Cancelled) => {
            info!("Interrupted before acquisition started");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Acquisition failed: {}", e);
            eprintln!("thermlogd: {}", e);
            ExitCode::FAILURE
        }
    }
}
