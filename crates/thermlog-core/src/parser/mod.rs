//! Record parsers: turn raw device lines into sensor records.
//!
//! Two interchangeable assemblers, chosen once per run by [`Protocol`]:
//! - [`PairParser`]: two consecutive, anchored lines per record
//! - [`AccumulatorParser`]: independent fields searched anywhere in a line
//!
//! Malformed input is a value ([`ParseOutcome::Malformed`]), never an error.
//! After a malformed report the parser is back in a known-good state.

mod accumulator;
pub mod fields;
mod pair;

pub use accumulator::AccumulatorParser;
pub use pair::PairParser;

use std::fmt;

use crate::config::{AcquisitionConfig, Protocol};
use crate::record::{SENSOR_FAULT_TEMP_C, SensorRecord};

/// Result of feeding one line to a parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Line accepted, record not complete yet.
    Pending,
    /// A complete record.
    Record(SensorRecord),
    /// Input discarded; the parser has been reset.
    Malformed(MalformedRecord),
}

/// Why input was discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedReason {
    /// A line did not match the pattern expected at its position.
    PatternMismatch { expected: &'static str },
    /// A captured literal was not a finite float.
    InvalidNumber { field: &'static str, text: String },
    /// The reference sensor reported its fault value.
    SensorFault { value: f64 },
    /// A lone field waited too long for its counterpart.
    Stale { field: &'static str, lines: u32 },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::PatternMismatch { expected } => {
                write!(f, "expected {} line", expected)
            }
            MalformedReason::InvalidNumber { field, text } => {
                write!(f, "invalid number '{}' for {}", text, field)
            }
            MalformedReason::SensorFault { value } => {
                write!(f, "reference sensor fault ({})", value)
            }
            MalformedReason::Stale { field, lines } => {
                write!(f, "{} unpaired after {} lines", field, lines)
            }
        }
    }
}

/// Discarded input together with the raw lines involved.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    pub lines: Vec<String>,
    pub reason: MalformedReason,
}

impl MalformedRecord {
    pub fn new(lines: Vec<String>, reason: MalformedReason) -> Self {
        Self { lines, reason }
    }
}

/// Parser behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParserOptions {
    /// Report readings with the reference sensor fault value as malformed.
    pub reject_sensor_faults: bool,
    /// Accumulator only: discard a lone field after this many lines.
    pub staleness_limit: Option<u32>,
}

impl ParserOptions {
    /// Returns the fault reason if `reference_temp_c` is the fault value
    /// and faults are rejected.
    pub(crate) fn sensor_fault(&self, reference_temp_c: f64) -> Option<MalformedReason> {
        if self.reject_sensor_faults && reference_temp_c == SENSOR_FAULT_TEMP_C {
            Some(MalformedReason::SensorFault {
                value: reference_temp_c,
            })
        } else {
            None
        }
    }
}

impl From<&AcquisitionConfig> for ParserOptions {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            reject_sensor_faults: config.reject_sensor_faults,
            staleness_limit: config.staleness_limit,
        }
    }
}

/// Stateful assembler of records from raw lines.
pub trait RecordParser: Send {
    /// Feeds one non-empty, trimmed line.
    fn feed(&mut self, line: &str) -> ParseOutcome;

    /// Drops any partially assembled record.
    fn reset(&mut self);

    /// Protocol this parser understands.
    fn protocol(&self) -> Protocol;
}

/// Builds the parser for a protocol.
pub fn build_parser(protocol: Protocol, options: ParserOptions) -> Box<dyn RecordParser> {
    match protocol {
        Protocol::DualLine => Box::new(PairParser::new(options)),
        Protocol::Accumulator => Box::new(AccumulatorParser::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_parser_matches_protocol() {
        let options = ParserOptions::default();
        assert_eq!(
            build_parser(Protocol::DualLine, options).protocol(),
            Protocol::DualLine
        );
        assert_eq!(
            build_parser(Protocol::Accumulator, options).protocol(),
            Protocol::Accumulator
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = AcquisitionConfig::default()
            .with_reject_sensor_faults(true)
            .with_staleness_limit(Some(5));
        let options = ParserOptions::from(&config);
        assert!(options.reject_sensor_faults);
        assert_eq!(options.staleness_limit, Some(5));
    }

    #[test]
    fn test_sensor_fault_only_when_enabled() {
        let lenient = ParserOptions::default();
        assert!(lenient.sensor_fault(SENSOR_FAULT_TEMP_C).is_none());

        let strict = ParserOptions {
            reject_sensor_faults: true,
            ..Default::default()
        };
        assert!(strict.sensor_fault(SENSOR_FAULT_TEMP_C).is_some());
        assert!(strict.sensor_fault(21.5).is_none());
    }

    #[test]
    fn test_reason_display() {
        let reason = MalformedReason::PatternMismatch {
            expected: "temperature pair",
        };
        assert_eq!(reason.to_string(), "expected temperature pair line");
        let reason = MalformedReason::Stale {
            field: "thermistor voltage",
            lines: 3,
        };
        assert_eq!(reason.to_string(), "thermistor voltage unpaired after 3 lines");
    }
}
