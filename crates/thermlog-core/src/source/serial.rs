//! Serial device line source.

use std::io::{self, Read};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use super::{LineSource, ReadOutcome, SourceError, outcome_for};

/// Longest line kept before it is handed over unterminated.
/// Bounds memory if the device stops sending newlines.
pub const MAX_LINE_BYTES: usize = 4096;

/// Shortest read timeout handed to the device. A zero timeout would turn
/// every idle poll into a busy loop.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Size of a single read from the device.
const READ_CHUNK_BYTES: usize = 256;

/// Reads newline-terminated lines from a serial device.
///
/// Bytes received before a timeout are kept and joined with the next read,
/// so a line that straddles a timeout is still delivered whole.
pub struct SerialLineSource<R: Read = Box<dyn SerialPort>> {
    reader: R,
    description: String,
    pending: Vec<u8>,
    chunk: [u8; READ_CHUNK_BYTES],
}

impl SerialLineSource {
    /// Opens the serial device with the given line rate and read timeout.
    /// Timeouts below [`MIN_READ_TIMEOUT`] are raised to it.
    pub fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, SourceError> {
        let port = serialport::new(port_path, baud_rate)
            .timeout(effective_timeout(timeout))
            .open()
            .map_err(|e| SourceError::Open {
                port: port_path.to_string(),
                source: io::Error::from(e),
            })?;

        debug!("Opened {} at {} baud", port_path, baud_rate);
        Ok(Self::from_reader(
            port,
            format!("{} @ {} baud", port_path, baud_rate),
        ))
    }
}

impl<R: Read> SerialLineSource<R> {
    /// Wraps any byte reader whose reads time out with `TimedOut`/`WouldBlock`.
    pub fn from_reader(reader: R, description: impl Into<String>) -> Self {
        Self {
            reader,
            description: description.into(),
            pending: Vec::new(),
            chunk: [0; READ_CHUNK_BYTES],
        }
    }

    /// Removes and returns the first complete line from the pending bytes.
    fn take_buffered_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}

impl<R: Read> LineSource for SerialLineSource<R> {
    fn next_line(&mut self) -> Result<ReadOutcome, SourceError> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(outcome_for(&line));
            }

            if self.pending.len() >= MAX_LINE_BYTES {
                let line = std::mem::take(&mut self.pending);
                return Ok(outcome_for(&line));
            }

            match self.reader.read(&mut self.chunk) {
                Ok(0) => return Ok(ReadOutcome::Idle),
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadOutcome::Idle),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Idle),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Read(e)),
            }
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn effective_timeout(requested: Duration) -> Duration {
    requested.max(MIN_READ_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that replays a fixed sequence of chunks and errors.
    struct ChunkReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ChunkReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    fn timeout() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    #[test]
    fn test_reads_lines_from_one_chunk() {
        let reader = ChunkReader::new(vec![Ok(b"first\r\nsecond\n".to_vec())]);
        let mut source = SerialLineSource::from_reader(reader, "test");

        assert_eq!(source.next_line().unwrap(), ReadOutcome::Line("first".into()));
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Line("second".into()));
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Idle);
    }

    #[test]
    fn test_timeout_is_idle_and_keeps_partial_line() {
        let reader = ChunkReader::new(vec![
            Ok(b"Thermistor Volt".to_vec()),
            timeout(),
            Ok(b"age: 1.5 V\n".to_vec()),
        ]);
        let mut source = SerialLineSource::from_reader(reader, "test");

        assert_eq!(source.next_line().unwrap(), ReadOutcome::Idle);
        assert_eq!(
            source.next_line().unwrap(),
            ReadOutcome::Line("Thermistor Voltage: 1.5 V".into())
        );
    }

    #[test]
    fn test_blank_line_is_idle() {
        let reader = ChunkReader::new(vec![Ok(b"\r\n".to_vec())]);
        let mut source = SerialLineSource::from_reader(reader, "test");
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Idle);
    }

    #[test]
    fn test_invalid_bytes_are_dropped() {
        let reader = ChunkReader::new(vec![Ok(b"ab\xffcd\n".to_vec())]);
        let mut source = SerialLineSource::from_reader(reader, "test");
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Line("abcd".into()));
    }

    #[test]
    fn test_overlong_line_is_cut() {
        let reader = ChunkReader::new(
            (0..(MAX_LINE_BYTES / READ_CHUNK_BYTES) + 1)
                .map(|_| Ok(vec![b'x'; READ_CHUNK_BYTES]))
                .collect(),
        );
        let mut source = SerialLineSource::from_reader(reader, "test");

        match source.next_line().unwrap() {
            ReadOutcome::Line(line) => assert_eq!(line.len(), MAX_LINE_BYTES),
            other => panic!("expected a line, got {:?}", other),
        }
    }

    #[test]
    fn test_hard_error_is_reported() {
        let reader = ChunkReader::new(vec![Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device unplugged",
        ))]);
        let mut source = SerialLineSource::from_reader(reader, "test");
        assert!(matches!(source.next_line(), Err(SourceError::Read(_))));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = SerialLineSource::open(
            "/dev/thermlog-does-not-exist",
            115_200,
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_zero_timeout_is_raised() {
        assert_eq!(effective_timeout(Duration::ZERO), MIN_READ_TIMEOUT);
        assert_eq!(
            effective_timeout(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
