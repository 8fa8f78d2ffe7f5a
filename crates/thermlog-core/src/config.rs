//! Acquisition configuration.
//!
//! Everything the acquisition loop needs at startup lives in
//! [`AcquisitionConfig`]. Defaults match the bench setup: a Pico on
//! `/dev/ttyACM0` at 115200 baud, flushing every 10 seconds.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default serial device path.
pub const DEFAULT_PORT_PATH: &str = "/dev/ttyACM0";

/// Default line rate of the device's USB serial console.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default output table path.
pub const DEFAULT_OUTPUT_PATH: &str = "sensor_data.csv";

/// Line protocol spoken by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Two consecutive lines per reading: temperature pair, then
    /// voltage/resistance pair. Rows are timestamped.
    #[default]
    DualLine,
    /// Temperature and voltage arrive independently; rows are numbered.
    Accumulator,
}

impl Protocol {
    /// Name used on the command line and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::DualLine => "dual-line",
            Protocol::Accumulator => "accumulator",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dual-line" | "dual" | "pair" => Ok(Protocol::DualLine),
            "accumulator" | "single-line" | "single" => Ok(Protocol::Accumulator),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Error type for configuration values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Protocol name not recognized.
    UnknownProtocol(String),
    /// Duration string is not a non-negative number of seconds.
    InvalidDuration(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownProtocol(name) => write!(
                f,
                "unknown protocol '{}' (expected 'dual-line' or 'accumulator')",
                name
            ),
            ConfigError::InvalidDuration(s) => write!(f, "invalid duration '{}'", s),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parses a duration given in (possibly fractional) seconds, e.g. "10" or "0.5".
pub fn parse_seconds(s: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration(s.to_string()))
}

/// Like [`parse_seconds`], but rejects zero.
pub fn parse_positive_seconds(s: &str) -> Result<Duration, ConfigError> {
    match parse_seconds(s)? {
        d if d.is_zero() => Err(ConfigError::InvalidDuration(s.to_string())),
        d => Ok(d),
    }
}

/// Configuration consumed by the acquisition loop at startup.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Serial device path (e.g., /dev/ttyACM0, COM14).
    pub port_path: String,
    /// Serial line rate.
    pub baud_rate: u32,
    /// Output table path. Truncated at startup.
    pub output_path: PathBuf,
    /// Line protocol of the device firmware.
    pub protocol: Protocol,
    /// Maximum time an appended row may stay unflushed.
    pub flush_interval: Duration,
    /// Delay after opening the device before its output is trusted.
    pub settle_delay: Duration,
    /// Bounded wait of a single read. Also bounds cancellation latency.
    pub read_timeout: Duration,
    /// Accumulator only: discard a lone field after this many lines
    /// without its counterpart. `None` waits indefinitely.
    pub staleness_limit: Option<u32>,
    /// Report readings carrying the reference sensor fault value as malformed.
    pub reject_sensor_faults: bool,
    /// Read lines from a captured file instead of the serial device.
    pub replay_path: Option<PathBuf>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            port_path: DEFAULT_PORT_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            protocol: Protocol::DualLine,
            flush_interval: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
            staleness_limit: None,
            reject_sensor_faults: false,
            replay_path: None,
        }
    }
}

impl AcquisitionConfig {
    /// Creates a configuration for the given device with default settings.
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_staleness_limit(mut self, limit: Option<u32>) -> Self {
        self.staleness_limit = limit;
        self
    }

    pub fn with_reject_sensor_faults(mut self, reject: bool) -> Self {
        self.reject_sensor_faults = reject;
        self
    }

    pub fn with_replay_path(mut self, path: Option<PathBuf>) -> Self {
        self.replay_path = path;
        self
    }

    /// Human-readable description of the line source for logs.
    pub fn source_description(&self) -> String {
        match &self.replay_path {
            Some(path) => format!("replay {}", path.display()),
            None => format!("{} @ {} baud", self.port_path, self.baud_rate),
        }
    }
}
