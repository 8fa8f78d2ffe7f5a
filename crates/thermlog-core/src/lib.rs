//! thermlog-core: acquisition library for serial temperature/voltage loggers.
//!
//! Provides:
//! - `source`: line sources (serial device, replayed capture, scripted)
//! - `parser`: record assemblers for the dual-line and accumulator protocols
//! - `record`: sensor record types and their table columns
//! - `store`: append-only table sink with flush policy, and the table reader
//! - `acquisition`: the run-until-cancelled acquisition loop
//! - `config`: acquisition configuration with documented defaults

pub mod acquisition;
pub mod config;
pub mod parser;
pub mod record;
pub mod source;
pub mod store;

pub use acquisition::{
    Acquisition, AcquisitionError, AcquisitionState, AcquisitionStats, AcquisitionSummary,
    CancellationToken, StopReason, open_and_run,
};
pub use config::{AcquisitionConfig, ConfigError, Protocol};
pub use record::{PairReading, SampleReading, SensorRecord};
