//! In-memory line source for testing the acquisition path without a device.

use std::collections::VecDeque;

use super::{LineSource, ReadOutcome, SourceError};
use crate::acquisition::CancellationToken;

/// Line source that plays back a fixed script of read outcomes.
///
/// When the script runs out it either reports [`ReadOutcome::Closed`] or,
/// if a token was attached with [`ScriptedSource::cancel_when_exhausted`],
/// cancels that token and reports `Idle`. The latter simulates a user
/// interrupt arriving after the device has been quiet.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<ReadOutcome>,
    cancel_on_exhaust: Option<CancellationToken>,
    reads: usize,
}

impl ScriptedSource {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a script of lines. Blank strings become `Idle` reads.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut source = Self::new();
        for line in lines {
            source.push_line(line.as_ref());
        }
        source
    }

    /// Appends one line to the script.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            self.push_idle();
        } else {
            self.script.push_back(ReadOutcome::Line(line.to_string()));
        }
    }

    /// Appends a timed-out read.
    pub fn push_idle(&mut self) {
        self.script.push_back(ReadOutcome::Idle);
    }

    /// Cancels `token` instead of closing once the script is exhausted.
    pub fn cancel_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.cancel_on_exhaust = Some(token);
        self
    }

    /// Number of reads issued so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl LineSource for ScriptedSource {
    fn next_line(&mut self) -> Result<ReadOutcome, SourceError> {
        self.reads += 1;
        if let Some(outcome) = self.script.pop_front() {
            return Ok(outcome);
        }
        match &self.cancel_on_exhaust {
            Some(token) => {
                token.cancel();
                Ok(ReadOutcome::Idle)
            }
            None => Ok(ReadOutcome::Closed),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
