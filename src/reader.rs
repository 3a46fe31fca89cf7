use crate::binary::read_event;
use crate::error::{PhsError, Result};
use crate::format::{PhotonEvent, PHS_VERSION_HEADER};
use crate::utils::read_f64_le;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Detect a photon-stream file by its version header
pub fn is_phs_file<P: AsRef<Path>>(path: P) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 3];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == PHS_VERSION_HEADER),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reads a photon-stream file in lockstep with its layout.
///
/// The file does not record how many metadata fields it holds, so the caller
/// passes the size of the schema the file was written with.
pub struct PhsReader<R: Read> {
    reader: R,
    metadata: Vec<f64>,
}

impl PhsReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, num_fields: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open '{}': {}", path.display(), e),
            )
        })?;
        debug!("Reading {} with {} metadata fields", path.display(), num_fields);
        Self::new(BufReader::with_capacity(131072, file), num_fields)
    }
}

impl<R: Read> PhsReader<R> {
    /// Check the version header and read the metadata block
    pub fn new(mut reader: R, num_fields: usize) -> Result<Self> {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                PhsError::InvalidFormat("File shorter than version header".to_string())
            }
            _ => e.into(),
        })?;
        if &header != PHS_VERSION_HEADER {
            return Err(PhsError::InvalidFormat(format!(
                "Invalid version header {:02x?}",
                header
            )));
        }

        let mut metadata = Vec::with_capacity(num_fields);
        for _ in 0..num_fields {
            let value = read_f64_le(&mut reader).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    PhsError::InvalidFormat("Truncated metadata block".to_string())
                }
                _ => e.into(),
            })?;
            metadata.push(value);
        }

        Ok(Self { reader, metadata })
    }

    /// Metadata values in sorted field-name order
    pub fn metadata(&self) -> &[f64] {
        &self.metadata
    }

    /// Read the next event, `None` at a clean end of file
    pub fn next_event(&mut self) -> Result<Option<PhotonEvent>> {
        read_event(&mut self.reader)
    }

    /// Iterator over the remaining events (sequential access)
    pub fn events(&mut self) -> EventIterator<'_, R> {
        EventIterator {
            reader: self,
            done: false,
        }
    }
}

pub struct EventIterator<'a, R: Read> {
    reader: &'a mut PhsReader<R>,
    done: bool,
}

impl<'a, R: Read> Iterator for EventIterator<'a, R> {
    type Item = Result<PhotonEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // Lockstep parsing cannot resync after a bad event
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
