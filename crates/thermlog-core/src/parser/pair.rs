//! Dual-line record assembler.
//!
//! A reading is two consecutive lines: the temperature pair, then the
//! voltage/resistance pair, both matched from the start of the line.
//!
//! Resynchronization: only a line matching the temperature pattern may open
//! a record. When the second line of an attempt does not fit, the attempt is
//! dropped and that line is re-examined as a possible opener. A single
//! garbled, extra or missing line therefore costs at most one record and
//! never shifts the pairing of the lines that follow.
//!
//! This is stricter than clearing a two-line buffer after every attempt. A
//! garbled line between two pairs costs no record at all (it is reported on
//! its own), and a garbled line inside a pair costs only that pair.

use chrono::{Local, NaiveDateTime, Timelike};

use super::fields::{FieldError, TEMPERATURE_PAIR, VOLTAGE_RESISTANCE_PAIR};
use super::{MalformedReason, MalformedRecord, ParseOutcome, ParserOptions, RecordParser};
use crate::config::Protocol;
use crate::record::{PairReading, SensorRecord};

/// Temperatures parsed from an accepted first line.
#[derive(Debug, Clone, PartialEq)]
struct TemperatureLine {
    raw: String,
    reference_temp_c: f64,
    thermistor_temp_c: f64,
}

/// Pending buffer of the dual-line protocol.
#[derive(Debug, Clone, Default, PartialEq)]
enum PairState {
    #[default]
    Empty,
    AwaitingVoltage(TemperatureLine),
}

/// Assembles [`PairReading`]s from line pairs.
pub struct PairParser {
    state: PairState,
    options: ParserOptions,
    clock: fn() -> NaiveDateTime,
}

/// Local wall-clock time truncated to whole seconds.
fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn invalid_number(lines: Vec<String>, e: FieldError) -> ParseOutcome {
    ParseOutcome::Malformed(MalformedRecord::new(
        lines,
        MalformedReason::InvalidNumber {
            field: e.field,
            text: e.text,
        },
    ))
}

impl PairParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            state: PairState::Empty,
            options,
            clock: local_now,
        }
    }

    /// Replaces the timestamp source (for deterministic output).
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Returns `true` while a temperature line waits for its partner.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, PairState::AwaitingVoltage(_))
    }

    /// Tries to accept `line` as the first line of a record.
    fn open(&mut self, line: &str) -> ParseOutcome {
        match TEMPERATURE_PAIR.extract(line) {
            Ok(Some(values)) => {
                self.state = PairState::AwaitingVoltage(TemperatureLine {
                    raw: line.to_string(),
                    reference_temp_c: values[0],
                    thermistor_temp_c: values[1],
                });
                ParseOutcome::Pending
            }
            Ok(None) => ParseOutcome::Malformed(MalformedRecord::new(
                vec![line.to_string()],
                MalformedReason::PatternMismatch {
                    expected: TEMPERATURE_PAIR.name(),
                },
            )),
            Err(e) => invalid_number(vec![line.to_string()], e),
        }
    }

    /// Completes a record with the voltage/resistance line.
    fn complete(&mut self, first: TemperatureLine, line: &str) -> ParseOutcome {
        let lines = vec![first.raw.clone(), line.to_string()];

        let values = match VOLTAGE_RESISTANCE_PAIR.extract(line) {
            Ok(Some(values)) => values,
            Ok(None) => {
                // The stray line may itself open the next record. If it looks
                // like one but carries a bad number, that is the reason to report.
                let reason = match self.open(line) {
                    ParseOutcome::Malformed(MalformedRecord {
                        reason: reason @ MalformedReason::InvalidNumber { .. },
                        ..
                    }) => reason,
                    _ => MalformedReason::PatternMismatch {
                        expected: VOLTAGE_RESISTANCE_PAIR.name(),
                    },
                };
                return ParseOutcome::Malformed(MalformedRecord::new(lines, reason));
            }
            Err(e) => return invalid_number(lines, e),
        };

        if let Some(reason) = self.options.sensor_fault(first.reference_temp_c) {
            return ParseOutcome::Malformed(MalformedRecord::new(lines, reason));
        }

        ParseOutcome::Record(SensorRecord::Pair(PairReading {
            timestamp: (self.clock)(),
            reference_temp_c: first.reference_temp_c,
            thermistor_temp_c: first.thermistor_temp_c,
            thermistor_voltage_v: values[0],
            thermistor_resistance_ohm: values[1],
        }))
    }
}

impl RecordParser for PairParser {
    fn feed(&mut self, line: &str) -> ParseOutcome {
        match std::mem::take(&mut self.state) {
            PairState::Empty => self.open(line),
            PairState::AwaitingVoltage(first) => self.complete(first, line),
        }
    }

    fn reset(&mut self) {
        self.state = PairState::Empty;
    }

    fn protocol(&self) -> Protocol {
        Protocol::DualLine
    }
}
