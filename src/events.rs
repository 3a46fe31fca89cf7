//! Sequential JSON-Lines sources (plain or gzipped)

use crate::error::{PhsError, Result};
use crate::format::EventRecord;
use crate::utils::open_text_reader;
use log::debug;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, Lines};
use std::marker::PhantomData;
use std::path::Path;

/// Reads one JSON object per line and deserializes it into `T`.
///
/// The reader owns its underlying file, so the handle is released as soon as
/// the iterator is dropped, whether it ran to completion or was abandoned
/// after an error.
pub struct JsonLinesReader<T> {
    name: String,
    lines: Lines<Box<dyn BufRead>>,
    line_num: usize,
    _record: PhantomData<fn() -> T>,
}

/// Event source over a JSON-Lines run file
pub type EventReader = JsonLinesReader<EventRecord>;

impl<T: DeserializeOwned> JsonLinesReader<T> {
    /// Open a file; gzip is detected from its first bytes
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening JSON-Lines source {}", path.display());
        let reader = open_text_reader(path)?;
        Ok(Self::new(path.display().to_string(), reader))
    }

    pub fn from_reader<R: BufRead + 'static>(name: &str, reader: R) -> Self {
        Self::new(name.to_string(), Box::new(reader))
    }

    fn new(name: String, reader: Box<dyn BufRead>) -> Self {
        Self {
            name,
            lines: reader.lines(),
            line_num: 0,
            _record: PhantomData,
        }
    }

    /// Display name of the source (its path for files)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of lines consumed so far
    pub fn line_num(&self) -> usize {
        self.line_num
    }
}

impl<T: DeserializeOwned> Iterator for JsonLinesReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.lines.next()?;
            self.line_num += 1;
            let line = match next {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Some(Err(PhsError::SourceUnavailable(format!(
                        "Malformed line {} in {}: {}",
                        self.line_num, self.name, e
                    ))));
                }
                Err(e) => return Some(Err(e.into())),
            };

            // Streams dumped as a JSON array body carry a trailing comma
            let line = line.trim().trim_end_matches(',');
            if line.is_empty() {
                continue;
            }

            return Some(serde_json::from_str(line).map_err(|e| {
                PhsError::SourceUnavailable(format!(
                    "Malformed line {} in {}: {}",
                    self.line_num, self.name, e
                ))
            }));
        }
    }
}
