//! Reader for persisted tables.
//!
//! Applies the cleaning rules of the analysis side: exactly one header line
//! is skipped, rows with the wrong column count or unparseable fields are
//! dropped, and for numbered tables a row number that does not increase is
//! dropped as out of order. Dropped rows are reported, not fatal.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::Protocol;
use crate::record::{
    DELIMITER, PAIR_COLUMNS, PairReading, SAMPLE_COLUMNS, SampleReading, SensorRecord,
    TIMESTAMP_FORMAT, columns,
};

/// Error type for reading a table.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    /// The file has no header line.
    Empty,
    /// The header matches no known table layout.
    UnknownHeader(String),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "I/O error: {}", e),
            ReadError::Empty => write!(f, "table is empty"),
            ReadError::UnknownHeader(h) => write!(f, "unrecognized header '{}'", h),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

/// Why a data row was dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ColumnCount { found: usize, expected: usize },
    InvalidField { column: &'static str },
    OutOfOrder { previous: u64, found: u64 },
    /// The row is not valid UTF-8.
    InvalidEncoding,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ColumnCount { found, expected } => {
                write!(f, "{} columns, expected {}", found, expected)
            }
            SkipReason::InvalidField { column } => write!(f, "invalid {}", column),
            SkipReason::OutOfOrder { previous, found } => {
                write!(f, "row {} after row {}", found, previous)
            }
            SkipReason::InvalidEncoding => write!(f, "invalid UTF-8"),
        }
    }
}

/// A dropped data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    /// 1-based line number in the file (the header is line 1).
    pub line_number: usize,
    pub content: String,
    pub reason: SkipReason,
}

/// Accepted rows and the rows dropped while cleaning.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub protocol: Protocol,
    pub records: Vec<SensorRecord>,
    pub skipped: Vec<SkippedRow>,
}

/// Reads and cleans a table file.
pub fn read_table(path: &Path) -> Result<LoadedTable, ReadError> {
    let file = File::open(path)?;
    read_table_from(BufReader::new(file))
}

/// Reads and cleans a table from any buffered reader.
///
/// Only an unreadable or unrecognizable header fails the whole table; every
/// data row problem, including invalid UTF-8, drops just that row.
pub fn read_table_from<R: BufRead>(mut reader: R) -> Result<LoadedTable, ReadError> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Err(ReadError::Empty);
    }
    let protocol = detect_protocol(&String::from_utf8_lossy(&buf))?;

    let mut table = LoadedTable {
        protocol,
        records: Vec::new(),
        skipped: Vec::new(),
    };
    let mut last_sequence: Option<u64> = None;
    let mut line_number = 1;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_number += 1;

        let parsed = match std::str::from_utf8(&buf) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => match protocol {
                Protocol::DualLine => parse_pair_row(text.trim()),
                Protocol::Accumulator => parse_sample_row(text.trim())
                    .and_then(|r| match last_sequence {
                        Some(previous) if r.sequence <= previous => Err(SkipReason::OutOfOrder {
                            previous,
                            found: r.sequence,
                        }),
                        _ => Ok(r),
                    })
                    .map(SensorRecord::Sample),
            },
            Err(_) => Err(SkipReason::InvalidEncoding),
        };

        match parsed {
            Ok(record) => {
                if let SensorRecord::Sample(r) = &record {
                    last_sequence = Some(r.sequence);
                }
                table.records.push(record);
            }
            Err(reason) => table.skipped.push(SkippedRow {
                line_number,
                content: String::from_utf8_lossy(&buf).trim().to_string(),
                reason,
            }),
        }
    }

    Ok(table)
}

fn detect_protocol(header: &str) -> Result<Protocol, ReadError> {
    let names: Vec<&str> = header
        .trim()
        .trim_start_matches('\u{feff}')
        .split(DELIMITER)
        .map(str::trim)
        .collect();
    if names == PAIR_COLUMNS {
        Ok(Protocol::DualLine)
    } else if names == SAMPLE_COLUMNS {
        Ok(Protocol::Accumulator)
    } else {
        Err(ReadError::UnknownHeader(header.trim().to_string()))
    }
}

fn split_row(content: &str, protocol: Protocol) -> Result<Vec<&str>, SkipReason> {
    let cells: Vec<&str> = content.split(DELIMITER).map(str::trim).collect();
    let expected = columns(protocol).len();
    if cells.len() != expected {
        return Err(SkipReason::ColumnCount {
            found: cells.len(),
            expected,
        });
    }
    Ok(cells)
}

fn float_cell(cell: &str, column: &'static str) -> Result<f64, SkipReason> {
    cell.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(SkipReason::InvalidField { column })
}

fn parse_pair_row(content: &str) -> Result<SensorRecord, SkipReason> {
    let cells = split_row(content, Protocol::DualLine)?;
    let timestamp = NaiveDateTime::parse_from_str(cells[0], TIMESTAMP_FORMAT).map_err(|_| {
        SkipReason::InvalidField {
            column: PAIR_COLUMNS[0],
        }
    })?;
    Ok(SensorRecord::Pair(PairReading {
        timestamp,
        reference_temp_c: float_cell(cells[1], PAIR_COLUMNS[1])?,
        thermistor_temp_c: float_cell(cells[2], PAIR_COLUMNS[2])?,
        thermistor_voltage_v: float_cell(cells[3], PAIR_COLUMNS[3])?,
        thermistor_resistance_ohm: float_cell(cells[4], PAIR_COLUMNS[4])?,
    }))
}

fn parse_sample_row(content: &str) -> Result<SampleReading, SkipReason> {
    let cells = split_row(content, Protocol::Accumulator)?;
    let sequence = cells[0]
        .parse::<u64>()
        .map_err(|_| SkipReason::InvalidField {
            column: SAMPLE_COLUMNS[0],
        })?;
    Ok(SampleReading {
        sequence,
        reference_temp_c: float_cell(cells[1], SAMPLE_COLUMNS[1])?,
        thermistor_voltage_v: float_cell(cells[2], SAMPLE_COLUMNS[2])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(content: &str) -> LoadedTable {
        read_table_from(Cursor::new(content.as_bytes())).unwrap()
    }

    #[test]
    fn test_reads_pair_table() {
        let table = read(
            "Timestamp,DS18B20_Temp_C,Thermistor_Temp_C,Thermistor_Voltage_V,Thermistor_Resistance_Ohms\n\
             2025-03-14 09:26:53,23.5,24.1,1.234,10123.5\n",
        );
        assert_eq!(table.protocol, Protocol::DualLine);
        assert_eq!(table.records.len(), 1);
        match &table.records[0] {
            SensorRecord::Pair(r) => {
                assert_eq!(r.thermistor_resistance_ohm, 10123.5);
                assert_eq!(
                    r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    "2025-03-14 09:26:53"
                );
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_skips_bad_sample_rows() {
        let table = read(
            "Row_Number,DS18B20_Temp_C,Thermistor_Voltage_V\n\
             1,20.0,1.0\n\
             2,20.5\n\
             3,abc,1.1\n\
             \n\
             4,21.0,1.2\n\
             4,21.0,1.2\n\
             2,19.0,0.9\n\
             5,inf,1.3\n\
             6,21.5,1.3\n",
        );
        assert_eq!(table.protocol, Protocol::Accumulator);
        let sequences: Vec<u64> = table
            .records
            .iter()
            .map(|r| match r {
                SensorRecord::Sample(s) => s.sequence,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(sequences, vec![1, 4, 6]);

        let reasons: Vec<&SkipReason> = table.skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(reasons, vec![
            &SkipReason::ColumnCount {
                found: 2,
                expected: 3
            },
            &SkipReason::InvalidField {
                column: "DS18B20_Temp_C"
            },
            &SkipReason::OutOfOrder {
                previous: 4,
                found: 4
            },
            &SkipReason::OutOfOrder {
                previous: 4,
                found: 2
            },
            &SkipReason::InvalidField {
                column: "DS18B20_Temp_C"
            },
        ]);
        assert_eq!(table.skipped[0].line_number, 3);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped_alone() {
        let table = read_table_from(Cursor::new(
            b"Row_Number,DS18B20_Temp_C,Thermistor_Voltage_V\n\
              1,20.0,1.0\n\
              2,2\xff.0,1.1\n\
              3,21.0,1.2\n"
                .to_vec(),
        ))
        .unwrap();

        assert_eq!(table.records.len(), 2);
        assert_eq!(table.skipped.len(), 1);
        assert_eq!(table.skipped[0].line_number, 3);
        assert_eq!(table.skipped[0].reason, SkipReason::InvalidEncoding);
        assert_eq!(table.skipped[0].content, "2,2\u{fffd}.0,1.1");
    }

    #[test]
    fn test_last_row_without_newline() {
        let table = read("Row_Number,DS18B20_Temp_C,Thermistor_Voltage_V\n1,20.0,1.0\n2,20.5,1.1");
        assert_eq!(table.records.len(), 2);
        assert!(table.skipped.is_empty());
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(
            read_table_from(Cursor::new(Vec::new())),
            Err(ReadError::Empty)
        ));
    }

    #[test]
    fn test_unknown_header() {
        assert!(matches!(
            read_table_from(Cursor::new(b"a,b,c\n1,2,3\n".to_vec())),
            Err(ReadError::UnknownHeader(_))
        ));
    }
}
