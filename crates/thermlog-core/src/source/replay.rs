//! Replays a captured device stream from a file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::{LineSource, ReadOutcome, SourceError, outcome_for};

/// Line source over a captured text stream (e.g. a terminal log of the device).
///
/// Lines go through the same decoding as live serial input. Once the input
/// is exhausted every read returns [`ReadOutcome::Closed`].
pub struct ReplaySource<R: BufRead = BufReader<File>> {
    reader: R,
    description: String,
    exhausted: bool,
    buf: Vec<u8>,
}

impl ReplaySource {
    /// Opens a capture file.
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::Open {
            port: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::new(
            BufReader::new(file),
            format!("replay {}", path.display()),
        ))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R, description: impl Into<String>) -> Self {
        Self {
            reader,
            description: description.into(),
            exhausted: false,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> LineSource for ReplaySource<R> {
    fn next_line(&mut self) -> Result<ReadOutcome, SourceError> {
        if self.exhausted {
            return Ok(ReadOutcome::Closed);
        }

        self.buf.clear();
        let n = loop {
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Read(e)),
            }
        };

        if n == 0 {
            self.exhausted = true;
            return Ok(ReadOutcome::Closed);
        }

        Ok(outcome_for(&self.buf))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_replay_lines_then_closed() {
        let data = "first\n\nsecond\r\nlast-without-newline";
        let mut source = ReplaySource::new(Cursor::new(data.as_bytes()), "mem");

        assert_eq!(source.next_line().unwrap(), ReadOutcome::Line("first".into()));
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Idle);
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Line("second".into()));
        assert_eq!(
            source.next_line().unwrap(),
            ReadOutcome::Line("last-without-newline".into())
        );
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Closed);
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.txt");
        std::fs::write(&path, b"Thermistor Voltage: 1.1\xff\n").unwrap();

        let mut source = ReplaySource::from_path(&path).unwrap();
        assert_eq!(
            source.next_line().unwrap(),
            ReadOutcome::Line("Thermistor Voltage: 1.1".into())
        );
        assert_eq!(source.next_line().unwrap(), ReadOutcome::Closed);
        assert!(source.describe().starts_with("replay "));
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReplaySource::from_path(&dir.path().join("missing.txt"));
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }
}
