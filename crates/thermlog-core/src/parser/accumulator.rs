//! Single-field accumulator.
//!
//! Every line is searched independently for the reference temperature and
//! the thermistor voltage. A match overwrites its slot; once both slots are
//! filled a numbered record is emitted and both slots are cleared.

use super::fields::{FieldError, LinePattern, REFERENCE_TEMPERATURE, THERMISTOR_VOLTAGE};
use super::{MalformedReason, MalformedRecord, ParseOutcome, ParserOptions, RecordParser};
use crate::config::Protocol;
use crate::record::{SampleReading, SensorRecord};

/// Accumulator slots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Slots {
    reference_temp_c: Option<f64>,
    thermistor_voltage_v: Option<f64>,
    /// Lines seen since a lone slot was last written.
    lines_waiting: u32,
}

impl Slots {
    fn is_partial(&self) -> bool {
        self.reference_temp_c.is_some() != self.thermistor_voltage_v.is_some()
    }

    fn filled_field(&self) -> &'static str {
        if self.reference_temp_c.is_some() {
            REFERENCE_TEMPERATURE.name()
        } else {
            THERMISTOR_VOLTAGE.name()
        }
    }
}

/// Assembles [`SampleReading`]s from independently arriving fields.
pub struct AccumulatorParser {
    slots: Slots,
    next_sequence: u64,
    options: ParserOptions,
}

fn search(pattern: &LinePattern, line: &str) -> Result<Option<f64>, FieldError> {
    Ok(pattern.extract(line)?.map(|values| values[0]))
}

impl AccumulatorParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            slots: Slots::default(),
            next_sequence: 1,
            options,
        }
    }

    /// Sequence number the next emitted record will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Returns `true` if exactly one slot is filled.
    pub fn is_partial(&self) -> bool {
        self.slots.is_partial()
    }

    fn malformed(&mut self, line: &str, reason: MalformedReason) -> ParseOutcome {
        self.slots = Slots::default();
        ParseOutcome::Malformed(MalformedRecord::new(vec![line.to_string()], reason))
    }
}

impl RecordParser for AccumulatorParser {
    fn feed(&mut self, line: &str) -> ParseOutcome {
        let temperature = match search(&REFERENCE_TEMPERATURE, line) {
            Ok(v) => v,
            Err(e) => {
                return self.malformed(
                    line,
                    MalformedReason::InvalidNumber {
                        field: e.field,
                        text: e.text,
                    },
                );
            }
        };
        let voltage = match search(&THERMISTOR_VOLTAGE, line) {
            Ok(v) => v,
            Err(e) => {
                return self.malformed(
                    line,
                    MalformedReason::InvalidNumber {
                        field: e.field,
                        text: e.text,
                    },
                );
            }
        };

        if let Some(t) = temperature {
            if let Some(reason) = self.options.sensor_fault(t) {
                return self.malformed(line, reason);
            }
            self.slots.reference_temp_c = Some(t);
        }
        if let Some(v) = voltage {
            self.slots.thermistor_voltage_v = Some(v);
        }

        if let (Some(reference_temp_c), Some(thermistor_voltage_v)) =
            (self.slots.reference_temp_c, self.slots.thermistor_voltage_v)
        {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.slots = Slots::default();
            return ParseOutcome::Record(SensorRecord::Sample(SampleReading {
                sequence,
                reference_temp_c,
                thermistor_voltage_v,
            }));
        }

        if temperature.is_some() || voltage.is_some() {
            self.slots.lines_waiting = 0;
        } else if self.slots.is_partial() {
            self.slots.lines_waiting += 1;
            if let Some(limit) = self.options.staleness_limit
                && self.slots.lines_waiting >= limit
            {
                let reason = MalformedReason::Stale {
                    field: self.slots.filled_field(),
                    lines: self.slots.lines_waiting,
                };
                return self.malformed(line, reason);
            }
        }

        ParseOutcome::Pending
    }

    fn reset(&mut self) {
        self.slots = Slots::default();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> AccumulatorParser {
        AccumulatorParser::new(ParserOptions::default())
    }

    fn sample(outcome: ParseOutcome) -> Option<SampleReading> {
        match outcome {
            ParseOutcome::Record(SensorRecord::Sample(r)) => Some(r),
            _ => None,
        }
    }

    #[test]
    fn test_emits_once_both_fields_seen() {
        let mut parser = parser();
        assert_eq!(parser.feed("DS18B20 Temperature: 20.0"), ParseOutcome::Pending);
        let record = sample(parser.feed("Thermistor Voltage: 1.0")).unwrap();
        assert_eq!(
            record,
            SampleReading {
                sequence: 1,
                reference_temp_c: 20.0,
                thermistor_voltage_v: 1.0,
            }
        );

        // Voltage alone after an emission waits for a new temperature.
        assert_eq!(parser.feed("Thermistor Voltage: 1.1"), ParseOutcome::Pending);
        assert!(parser.is_partial());
        let record = sample(parser.feed("DS18B20 Temperature: 20.5")).unwrap();
        assert_eq!(record.sequence, 2);
        assert_eq!(record.thermistor_voltage_v, 1.1);
    }

    #[test]
    fn test_both_fields_on_one_line() {
        let mut parser = parser();
        let line = "DS18B20 Temperature: 23.5 °C\tThermistor Voltage: 1.2 V";
        let record = sample(parser.feed(line)).unwrap();
        assert_eq!(record.reference_temp_c, 23.5);
        assert_eq!(record.thermistor_voltage_v, 1.2);
    }

    #[test]
    fn test_later_value_overwrites_slot() {
        let mut parser = parser();
        parser.feed("DS18B20 Temperature: 20.0");
        parser.feed("DS18B20 Temperature: 21.0");
        let record = sample(parser.feed("Thermistor Voltage: 1.0")).unwrap();
        assert_eq!(record.reference_temp_c, 21.0);
    }

    #[test]
    fn test_sequence_has_no_gaps() {
        let mut parser = parser();
        let mut sequences = Vec::new();
        for i in 0..5 {
            parser.feed("boot banner");
            parser.feed(&format!("DS18B20 Temperature: {}.5", 20 + i));
            parser.feed("");
            parser.feed("noise noise");
            if let Some(r) = sample(parser.feed("Thermistor Voltage: 1.0")) {
                sequences.push(r.sequence);
            }
        }
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert_eq!(parser.next_sequence(), 6);
    }

    #[test]
    fn test_no_record_without_both_fields() {
        let mut parser = parser();
        for line in [
            "Thermistor Voltage: 1.0",
            "Thermistor Voltage: 1.1",
            "unrelated",
            "Thermistor Voltage: 1.2",
        ] {
            assert_eq!(parser.feed(line), ParseOutcome::Pending);
        }
    }

    #[test]
    fn test_invalid_number_resets_slots() {
        let mut parser = parser();
        parser.feed("DS18B20 Temperature: 20.0");
        let line = format!("Thermistor Voltage: {}", "9".repeat(400));
        assert!(matches!(
            parser.feed(&line),
            ParseOutcome::Malformed(MalformedRecord {
                reason: MalformedReason::InvalidNumber { .. },
                ..
            })
        ));
        assert!(!parser.is_partial());
        assert_eq!(parser.feed("Thermistor Voltage: 1.0"), ParseOutcome::Pending);
    }

    #[test]
    fn test_waits_indefinitely_without_limit() {
        let mut parser = parser();
        parser.feed("DS18B20 Temperature: 20.0");
        for _ in 0..1000 {
            assert_eq!(parser.feed("noise"), ParseOutcome::Pending);
        }
        assert!(sample(parser.feed("Thermistor Voltage: 1.0")).is_some());
    }

    #[test]
    fn test_staleness_limit_discards_lone_slot() {
        let mut parser = AccumulatorParser::new(ParserOptions {
            staleness_limit: Some(3),
            ..Default::default()
        });
        parser.feed("DS18B20 Temperature: 20.0");
        assert_eq!(parser.feed("noise"), ParseOutcome::Pending);
        assert_eq!(parser.feed("noise"), ParseOutcome::Pending);
        match parser.feed("noise") {
            ParseOutcome::Malformed(m) => assert_eq!(
                m.reason,
                MalformedReason::Stale {
                    field: "reference temperature",
                    lines: 3
                }
            ),
            other => panic!("expected stale report, got {:?}", other),
        }
        assert!(!parser.is_partial());

        // Sequence numbering is unaffected by the discard.
        parser.feed("Thermistor Voltage: 1.0");
        let record = sample(parser.feed("DS18B20 Temperature: 21.0")).unwrap();
        assert_eq!(record.sequence, 1);
    }

    #[test]
    fn test_sensor_fault_rejected_when_enabled() {
        let mut parser = AccumulatorParser::new(ParserOptions {
            reject_sensor_faults: true,
            ..Default::default()
        });
        assert!(matches!(
            parser.feed("DS18B20 Temperature: -1000.0"),
            ParseOutcome::Malformed(_)
        ));
        assert!(parser.feed("Thermistor Voltage: 1.0") == ParseOutcome::Pending);
    }
}
