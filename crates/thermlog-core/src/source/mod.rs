//! Line sources: where raw device lines come from.
//!
//! A [`LineSource`] delivers newline-terminated text with a bounded wait.
//! Timeouts are not errors: they show up as [`ReadOutcome::Idle`] and the
//! caller simply asks again.
//!
//! ```text
//!            ┌──────────────┐
//!            │  LineSource  │ (trait)
//!            └──────┬───────┘
//!     ┌─────────────┼──────────────┐
//! ┌───▼────────┐ ┌──▼───────────┐ ┌▼───────────────┐
//! │SerialLine- │ │ ReplaySource │ │ ScriptedSource │
//! │Source      │ │ (captures)   │ │ (testing)      │
//! └────────────┘ └──────────────┘ └────────────────┘
//! ```

mod replay;
mod scripted;
mod serial;

pub use replay::ReplaySource;
pub use scripted::ScriptedSource;
pub use serial::{MAX_LINE_BYTES, SerialLineSource};

use std::fmt;
use std::io;

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A decoded, trimmed, non-empty line.
    Line(String),
    /// Nothing usable yet (timeout or blank line). Retry.
    Idle,
    /// The stream has ended for good (replay sources only).
    Closed,
}

/// Error type for line sources.
#[derive(Debug)]
pub enum SourceError {
    /// The device could not be opened.
    Open { port: String, source: io::Error },
    /// A read failed for a reason other than a timeout.
    Read(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Open { port, source } => {
                write!(f, "failed to open {}: {}", port, source)
            }
            SourceError::Read(e) => write!(f, "read failed: {}", e),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Open { source, .. } => Some(source),
            SourceError::Read(e) => Some(e),
        }
    }
}

impl From<io::Error> for SourceError {
    fn from(e: io::Error) -> Self {
        SourceError::Read(e)
    }
}

/// A stream of device lines with bounded-wait reads.
pub trait LineSource {
    /// Reads the next line, waiting at most the source's timeout.
    ///
    /// Invalid bytes never cause an error; they are dropped during decoding.
    fn next_line(&mut self) -> Result<ReadOutcome, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<T: LineSource + ?Sized> LineSource for Box<T> {
    fn next_line(&mut self) -> Result<ReadOutcome, SourceError> {
        (**self).next_line()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Decodes raw line bytes into trimmed text.
///
/// Invalid UTF-8 sequences are dropped rather than substituted, so a burst
/// of line noise does not leave replacement characters inside a field.
pub fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let cleaned: String = text
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    cleaned.trim().to_string()
}

/// Wraps a decoded line into an outcome, mapping blank lines to `Idle`.
pub(crate) fn outcome_for(bytes: &[u8]) -> ReadOutcome {
    let line = decode_line(bytes);
    if line.is_empty() {
        ReadOutcome::Idle
    } else {
        ReadOutcome::Line(line)
    }
}
