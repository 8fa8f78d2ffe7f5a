//! Sensor records and their table representation.

use chrono::NaiveDateTime;

use crate::config::Protocol;

/// Column delimiter of the persisted table.
pub const DELIMITER: char = ',';

/// Timestamp format of dual-line rows (local wall clock, second resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header of the dual-line table.
pub const PAIR_COLUMNS: &[&str] = &[
    "Timestamp",
    "DS18B20_Temp_C",
    "Thermistor_Temp_C",
    "Thermistor_Voltage_V",
    "Thermistor_Resistance_Ohms",
];

/// Header of the accumulator table.
pub const SAMPLE_COLUMNS: &[&str] = &["Row_Number", "DS18B20_Temp_C", "Thermistor_Voltage_V"];

/// Value the DS18B20 firmware reports when the sensor misses its presence pulse.
pub const SENSOR_FAULT_TEMP_C: f64 = -1000.0;

/// Reading assembled from a temperature line and a voltage/resistance line.
#[derive(Debug, Clone, PartialEq)]
pub struct PairReading {
    pub timestamp: NaiveDateTime,
    pub reference_temp_c: f64,
    pub thermistor_temp_c: f64,
    pub thermistor_voltage_v: f64,
    pub thermistor_resistance_ohm: f64,
}

/// Reading assembled from independently arriving temperature and voltage fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReading {
    /// Starts at 1, increments by exactly 1 per emitted record.
    pub sequence: u64,
    pub reference_temp_c: f64,
    pub thermistor_voltage_v: f64,
}

/// One fully assembled reading, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorRecord {
    Pair(PairReading),
    Sample(SampleReading),
}

impl SensorRecord {
    /// Protocol the record belongs to.
    pub fn protocol(&self) -> Protocol {
        match self {
            SensorRecord::Pair(_) => Protocol::DualLine,
            SensorRecord::Sample(_) => Protocol::Accumulator,
        }
    }

    /// Reference (DS18B20) temperature, present in both variants.
    pub fn reference_temp_c(&self) -> f64 {
        match self {
            SensorRecord::Pair(r) => r.reference_temp_c,
            SensorRecord::Sample(r) => r.reference_temp_c,
        }
    }

    pub fn thermistor_voltage_v(&self) -> f64 {
        match self {
            SensorRecord::Pair(r) => r.thermistor_voltage_v,
            SensorRecord::Sample(r) => r.thermistor_voltage_v,
        }
    }

    /// Formats the record as table cells, in header order.
    pub fn cells(&self) -> Vec<String> {
        match self {
            SensorRecord::Pair(r) => vec![
                r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                format_float(r.reference_temp_c),
                format_float(r.thermistor_temp_c),
                format_float(r.thermistor_voltage_v),
                format_float(r.thermistor_resistance_ohm),
            ],
            SensorRecord::Sample(r) => vec![
                r.sequence.to_string(),
                format_float(r.reference_temp_c),
                format_float(r.thermistor_voltage_v),
            ],
        }
    }

    /// Formats the record as one delimited row (without line terminator).
    pub fn to_row(&self) -> String {
        self.cells().join(&DELIMITER.to_string())
    }
}

/// Column names for a protocol's table.
pub fn columns(protocol: Protocol) -> &'static [&'static str] {
    match protocol {
        Protocol::DualLine => PAIR_COLUMNS,
        Protocol::Accumulator => SAMPLE_COLUMNS,
    }
}

/// Header row for a protocol's table (without line terminator).
pub fn header_row(protocol: Protocol) -> String {
    columns(protocol).join(&DELIMITER.to_string())
}

/// Float literal that always keeps a decimal point for whole values ("20.0", not "20").
fn format_float(value: f64) -> String {
    format!("{:?}", value)
}
