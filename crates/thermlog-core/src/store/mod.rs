//! Persisted store: the append-only table sink and its reader.

pub mod reader;
mod sink;

pub use reader::{LoadedTable, ReadError, SkipReason, SkippedRow, read_table};
pub use sink::{FlushPolicy, SinkError, TableSink, TableWriter};
