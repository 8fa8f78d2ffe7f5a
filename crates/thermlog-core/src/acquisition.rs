//! Acquisition loop.
//!
//! ```text
//! OPENING ──► RUNNING ──► CLOSING ──► CLOSED
//!    │           │  ▲
//!    │           └──┘ read → parse → append → flush if due
//!    └─ device open failure: abort, sink never created
//! ```
//!
//! RUNNING ends when the [`CancellationToken`] is observed at the top of an
//! iteration, when the line source reports `Closed`, or on a device/sink
//! I/O failure. Every exit path goes through CLOSING exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::config::AcquisitionConfig;
use crate::parser::{ParseOutcome, ParserOptions, RecordParser, build_parser};
use crate::record::SensorRecord;
use crate::source::{LineSource, ReadOutcome, ReplaySource, SerialLineSource, SourceError};
use crate::store::{FlushPolicy, SinkError, TableSink};

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Opening,
    Running,
    Closing,
    Closed,
}

/// Why RUNNING ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token was set.
    Cancelled,
    /// The line source has no more input.
    SourceClosed,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub lines_read: u64,
    pub idle_reads: u64,
    pub records_written: u64,
    pub malformed: u64,
    pub flushes: u64,
}

impl fmt::Display for AcquisitionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} records, {} malformed, {} flushes, {} idle reads",
            self.lines_read, self.records_written, self.malformed, self.flushes, self.idle_reads
        )
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub stats: AcquisitionStats,
    pub stopped_by: StopReason,
}

/// Error type for acquisition.
#[derive(Debug)]
pub enum AcquisitionError {
    /// Device open or read failure.
    Source(SourceError),
    /// Table create, write or flush failure.
    Sink(SinkError),
    /// Cancelled before RUNNING was reached.
    Cancelled,
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Source(e) => write!(f, "line source: {}", e),
            AcquisitionError::Sink(e) => write!(f, "output table: {}", e),
            AcquisitionError::Cancelled => write!(f, "cancelled during startup"),
        }
    }
}

impl std::error::Error for AcquisitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcquisitionError::Source(e) => Some(e),
            AcquisitionError::Sink(e) => Some(e),
            AcquisitionError::Cancelled => None,
        }
    }
}

impl From<SourceError> for AcquisitionError {
    fn from(e: SourceError) -> Self {
        AcquisitionError::Source(e)
    }
}

impl From<SinkError> for AcquisitionError {
    fn from(e: SinkError) -> Self {
        AcquisitionError::Sink(e)
    }
}

/// Sleeps for `duration` in short slices, returning early with
/// `Cancelled` if the token is set.
pub fn sleep_cancellable(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), AcquisitionError> {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if token.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        let sleep_time = remaining.min(SLEEP_SLICE);
        std::thread::sleep(sleep_time);
        remaining = remaining.saturating_sub(sleep_time);
    }
    if token.is_cancelled() {
        return Err(AcquisitionError::Cancelled);
    }
    Ok(())
}

/// One acquisition: a line source, a parser and a table sink.
///
/// Owns all three exclusively. The sink is closed exactly once, by
/// [`run`](Acquisition::run), by [`close`](Acquisition::close), or on drop.
pub struct Acquisition<S: LineSource> {
    source: S,
    parser: Box<dyn RecordParser>,
    sink: TableSink,
    flush_policy: FlushPolicy,
    state: AcquisitionState,
    stats: AcquisitionStats,
}

impl<S: LineSource> Acquisition<S> {
    /// Finishes OPENING with an acquired source: creates the table
    /// (truncating it) and the parser for the configured protocol.
    ///
    /// If the table cannot be created the source is dropped and released.
    pub fn new(source: S, config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        let sink = TableSink::create(&config.output_path, config.protocol)?;
        let flush_policy = FlushPolicy::new(config.flush_interval, Instant::now());
        info!(
            "Writing {} records to {} (flush every {:?})",
            config.protocol,
            config.output_path.display(),
            flush_policy.interval()
        );

        Ok(Self {
            source,
            parser: build_parser(config.protocol, ParserOptions::from(config)),
            sink,
            flush_policy,
            state: AcquisitionState::Opening,
            stats: AcquisitionStats::default(),
        })
    }

    /// Replaces the parser. It must speak the configured protocol.
    pub fn with_parser(mut self, parser: Box<dyn RecordParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    pub fn sink(&self) -> &TableSink {
        &self.sink
    }

    /// Runs until cancelled, the source closes, or an I/O failure.
    ///
    /// The table is flushed and closed before this returns, on every path.
    pub fn run(mut self, token: &CancellationToken) -> Result<AcquisitionSummary, AcquisitionError> {
        self.state = AcquisitionState::Running;
        info!("Acquisition running on {}", self.source.describe());

        let loop_result = self.run_loop(token);
        let close_result = self.close();

        match (loop_result, close_result) {
            (Ok(stopped_by), Ok(())) => Ok(AcquisitionSummary {
                stats: self.stats,
                stopped_by,
            }),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), close_result) => {
                if let Err(close_err) = close_result {
                    error!("Close after failure also failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn run_loop(&mut self, token: &CancellationToken) -> Result<StopReason, AcquisitionError> {
        while !token.is_cancelled() {
            match self.source.next_line()? {
                ReadOutcome::Idle => self.stats.idle_reads += 1,
                ReadOutcome::Closed => {
                    info!("Line source closed");
                    return Ok(StopReason::SourceClosed);
                }
                ReadOutcome::Line(line) => {
                    self.stats.lines_read += 1;
                    self.handle_line(&line)?;
                }
            }
        }
        info!("Received shutdown signal");
        Ok(StopReason::Cancelled)
    }

    fn handle_line(&mut self, line: &str) -> Result<(), AcquisitionError> {
        trace!("<- {}", line);

        match self.parser.feed(line) {
            ParseOutcome::Pending => {}
            ParseOutcome::Record(record) => {
                self.sink.append(&record)?;
                self.stats.records_written += 1;
                log_record(self.stats.records_written, &record);

                let now = Instant::now();
                if self.flush_policy.is_due(now) {
                    self.sink.flush()?;
                    self.flush_policy.mark_flushed(now);
                    self.stats.flushes += 1;
                }
            }
            ParseOutcome::Malformed(malformed) => {
                self.stats.malformed += 1;
                warn!(
                    "Discarded malformed record ({}): {}",
                    malformed.reason,
                    malformed.lines.join(" | ")
                );
            }
        }
        Ok(())
    }

    /// CLOSING → CLOSED: flushes and releases the table. Idempotent.
    pub fn close(&mut self) -> Result<(), AcquisitionError> {
        if self.state == AcquisitionState::Closed {
            return Ok(());
        }
        self.state = AcquisitionState::Closing;
        let pending = self.sink.rows_unflushed();
        if pending > 0 {
            debug!("Flushing {} pending rows", pending);
        }
        let result = self.sink.close();
        self.state = AcquisitionState::Closed;
        info!(
            "Closed {} ({} rows)",
            self.sink.path().display(),
            self.sink.rows_written()
        );
        result.map_err(AcquisitionError::from)
    }
}

impl<S: LineSource> Drop for Acquisition<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close acquisition: {}", e);
        }
    }
}

fn log_record(n: u64, record: &SensorRecord) {
    match record {
        SensorRecord::Pair(r) => info!(
            "Record #{}: {} DS18B20={} Thermistor={} Voltage={} Resistance={}",
            n,
            r.timestamp,
            r.reference_temp_c,
            r.thermistor_temp_c,
            r.thermistor_voltage_v,
            r.thermistor_resistance_ohm
        ),
        SensorRecord::Sample(r) => info!(
            "Record #{}: row={} DS18B20={} Voltage={}",
            n, r.sequence, r.reference_temp_c, r.thermistor_voltage_v
        ),
    }
}

/// Full lifecycle: opens the configured source, waits for the device to
/// settle, creates the table and runs until cancelled.
///
/// A device that cannot be opened aborts before the table is touched.
pub fn open_and_run(
    config: &AcquisitionConfig,
    token: &CancellationToken,
) -> Result<AcquisitionSummary, AcquisitionError> {
    info!("Opening {}", config.source_description());

    let source: Box<dyn LineSource> = match &config.replay_path {
        Some(path) => Box::new(ReplaySource::from_path(path)?),
        None => {
            let serial =
                SerialLineSource::open(&config.port_path, config.baud_rate, config.read_timeout)?;
            if !config.settle_delay.is_zero() {
                info!("Waiting {:?} for the device to settle", config.settle_delay);
                sleep_cancellable(config.settle_delay, token)?;
            }
            Box::new(serial)
        }
    };

    Acquisition::new(source, config)?.run(token)
}
