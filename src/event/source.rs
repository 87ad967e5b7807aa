use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use thiserror::Error;

use crate::event::record::Event;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed event on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads events from a JSON-lines file, one event object per line.
///
/// Blank lines are skipped. The iterator yields an error once and callers
/// are expected to stop there.
pub struct JsonLinesSource {
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl JsonLinesSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let f = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(f).lines(),
            line: 0,
        })
    }
}

impl Iterator for JsonLinesSource {
    type Item = Result<Event, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(SourceError::Io(e))),
            };
            self.line += 1;
            if raw.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(
                serde_json::from_str(&raw).map_err(|source| SourceError::Json { line, source }),
            );
        }
    }
}

/// Anything yielding events in order, such as [`JsonLinesSource`] or an
/// in-memory `Vec` of events.
pub trait EventSource: Iterator<Item = Result<Event, SourceError>> {}

impl<T: Iterator<Item = Result<Event, SourceError>>> EventSource for T {}
