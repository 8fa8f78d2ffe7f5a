use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::Protocol;
use crate::record::{SensorRecord, columns, header_row};

/// Error type for the table sink.
#[derive(Debug)]
pub enum SinkError {
    /// Creating, writing or syncing the file failed.
    Io(io::Error),
    /// Record belongs to another protocol than the table.
    ProtocolMismatch { table: Protocol, record: Protocol },
    /// Record would produce an invalid row (non-finite value).
    InvalidRecord(String),
    /// Append after close.
    Closed,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "I/O error: {}", e),
            SinkError::ProtocolMismatch { table, record } => {
                write!(f, "{} record written to {} table", record, table)
            }
            SinkError::InvalidRecord(row) => write!(f, "refusing invalid row '{}'", row),
            SinkError::Closed => write!(f, "sink is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Byte target of a table: can be made durable and cut back to a length.
pub trait TableWriter: Write {
    /// Forces written bytes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Shortens the target to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl TableWriter for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// Append-only table writer.
///
/// Rows go into an in-process buffer on [`append`](TableSink::append);
/// only [`flush`](TableSink::flush) and [`close`](TableSink::close) push
/// them to stable storage. Dropping an open sink closes it.
///
/// After a failed write the sink gives up: buffered bytes are discarded and
/// the target is cut back to the end of the last flush, so the table never
/// ends in a partial row. Rows appended since that flush are lost.
pub struct TableSink<W: TableWriter = File> {
    path: PathBuf,
    protocol: Protocol,
    writer: Option<BufWriter<W>>,
    rows_written: u64,
    rows_unflushed: u64,
    /// Bytes handed to the writer so far.
    bytes_written: u64,
    /// Bytes known to be on stable storage.
    bytes_flushed: u64,
}

impl TableSink {
    /// Creates (truncating) the table file and writes its header row.
    pub fn create(path: &Path, protocol: Protocol) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Self::from_writer(file, path, protocol)
    }
}

impl<W: TableWriter> TableSink<W> {
    /// Starts a table on an empty target and writes its header row.
    pub fn from_writer(
        writer: W,
        path: impl Into<PathBuf>,
        protocol: Protocol,
    ) -> Result<Self, SinkError> {
        let mut sink = Self {
            path: path.into(),
            protocol,
            writer: Some(BufWriter::new(writer)),
            rows_written: 0,
            rows_unflushed: 0,
            bytes_written: 0,
            bytes_flushed: 0,
        };
        sink.write_line(header_row(protocol))?;
        sink.flush()?;

        debug!("Created {} table at {}", protocol, sink.path.display());
        Ok(sink)
    }

    /// Writes one row to the buffer. Does not guarantee durability.
    pub fn append(&mut self, record: &SensorRecord) -> Result<(), SinkError> {
        if record.protocol() != self.protocol {
            return Err(SinkError::ProtocolMismatch {
                table: self.protocol,
                record: record.protocol(),
            });
        }

        let row = record.to_row();
        if !row_is_well_formed(&row, self.protocol) {
            return Err(SinkError::InvalidRecord(row));
        }

        self.write_line(row)?;
        self.rows_written += 1;
        self.rows_unflushed += 1;
        Ok(())
    }

    /// Writes `line` and its terminator with a single call.
    fn write_line(&mut self, mut line: String) -> Result<(), SinkError> {
        line.push('\n');
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        if let Err(e) = writer.write_all(line.as_bytes()) {
            self.abandon();
            return Err(e.into());
        }
        self.bytes_written += line.len() as u64;
        Ok(())
    }

    /// Forces buffered rows to stable storage.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let result = writer.flush().and_then(|()| writer.get_mut().sync());
        if let Err(e) = result {
            self.abandon();
            return Err(e.into());
        }
        debug!(
            "Flushed {} rows to {} ({} total)",
            self.rows_unflushed,
            self.path.display(),
            self.rows_written
        );
        self.rows_unflushed = 0;
        self.bytes_flushed = self.bytes_written;
        Ok(())
    }

    /// Releases the target after a write failure without flushing the
    /// buffer, and cuts it back to the last flushed row.
    fn abandon(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let (mut inner, _unwritten) = writer.into_parts();
        match inner
            .truncate(self.bytes_flushed)
            .and_then(|()| inner.sync())
        {
            Ok(()) => warn!(
                "Write to {} failed; dropped {} unflushed rows",
                self.path.display(),
                self.rows_unflushed
            ),
            Err(e) => warn!(
                "Write to {} failed and it could not be cut back to {} bytes: {}",
                self.path.display(),
                self.bytes_flushed,
                e
            ),
        }
        self.rows_written -= self.rows_unflushed;
        self.rows_unflushed = 0;
    }

    /// Flushes and releases the target. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if self.writer.is_none() {
            return Ok(());
        }
        let result = self.flush();
        self.writer = None;
        result
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Rows currently in the table, flushed or not.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Rows appended since the last flush.
    pub fn rows_unflushed(&self) -> u64 {
        self.rows_unflushed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl<W: TableWriter> Drop for TableSink<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.path.display(), e);
        }
    }
}

/// Checks a row against the table's column count and numeric columns.
fn row_is_well_formed(row: &str, protocol: Protocol) -> bool {
    let cells: Vec<&str> = row.split(crate::record::DELIMITER).collect();
    if cells.len() != columns(protocol).len() {
        return false;
    }
    cells[1..]
        .iter()
        .all(|cell| cell.parse::<f64>().is_ok_and(|v| v.is_finite()))
}

/// Time-based flush policy, evaluated after each append.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    interval: Duration,
    last_flush: Instant,
}

impl FlushPolicy {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_flush: now,
        }
    }

    /// Returns `true` once at least one interval has passed since the last flush.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.interval
    }

    /// Records a flush at `now`.
    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
