//! Sequential photon-stream file writer

use crate::binary::encode_event;
use crate::error::{PhsError, Result};
use crate::format::{EventRecord, PHS_VERSION_HEADER};
use crate::metadata::{MetadataRecord, SchemaContext};
use log::{debug, info};
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    HeaderWritten,
    MetadataWritten,
    EventWritten,
    Closed,
}

impl WriterState {
    fn name(self) -> &'static str {
        match self {
            WriterState::HeaderWritten => "header",
            WriterState::MetadataWritten => "metadata",
            WriterState::EventWritten => "event",
            WriterState::Closed => "close",
        }
    }
}

/// Writes header → metadata block → events, in that order and nothing else
pub struct PhsWriter<W: Write> {
    sink: W,
    state: WriterState,
    num_events: u64,
    bytes_written: u64,
}

/// What a finished run produced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub num_events: u64,
    pub bytes_written: u64,
}

impl<W: Write> PhsWriter<W> {
    /// Write the version header to `sink`
    pub fn new(mut sink: W) -> Result<Self> {
        sink.write_all(PHS_VERSION_HEADER)?;
        Ok(Self {
            sink,
            state: WriterState::HeaderWritten,
            num_events: 0,
            bytes_written: PHS_VERSION_HEADER.len() as u64,
        })
    }

    fn require_state(&self, allowed: &[WriterState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PhsError::OutOfOrder {
                state: self.state.name(),
                operation,
            })
        }
    }

    /// Encode and write the run's metadata block
    pub fn write_metadata(
        &mut self,
        ctx: &mut SchemaContext,
        metadata: &MetadataRecord,
    ) -> Result<()> {
        self.require_state(&[WriterState::HeaderWritten], "write metadata")?;
        let block = ctx.encode_metadata(metadata)?;
        self.sink.write_all(&block)?;
        self.bytes_written += block.len() as u64;
        self.state = WriterState::MetadataWritten;
        debug!("Wrote metadata block of {} bytes", block.len());
        Ok(())
    }

    /// Validate and encode one event fully before any of it reaches the sink
    pub fn write_event(&mut self, event: &EventRecord) -> Result<()> {
        self.require_state(
            &[WriterState::MetadataWritten, WriterState::EventWritten],
            "write event",
        )?;
        let bytes = encode_event(&event.validate()?)?;
        self.sink.write_all(&bytes)?;
        self.bytes_written += bytes.len() as u64;
        self.num_events += 1;
        self.state = WriterState::EventWritten;
        Ok(())
    }

    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    /// Flush and hand back the sink
    pub fn finish(mut self) -> Result<(W, RunSummary)> {
        self.require_state(
            &[WriterState::MetadataWritten, WriterState::EventWritten],
            "close",
        )?;
        self.sink.flush()?;
        self.state = WriterState::Closed;
        let summary = RunSummary {
            num_events: self.num_events,
            bytes_written: self.bytes_written,
        };
        Ok((self.sink, summary))
    }
}

/// Write a complete run. On an event failure the events before it stay in the sink.
pub fn write_run<W, I>(
    sink: W,
    ctx: &mut SchemaContext,
    metadata: &MetadataRecord,
    events: I,
) -> Result<RunSummary>
where
    W: Write,
    I: IntoIterator<Item = Result<EventRecord>>,
{
    let mut writer = PhsWriter::new(sink)?;
    writer.write_metadata(ctx, metadata)?;
    for event in events {
        let event = event?;
        if let Err(e) = writer.write_event(&event) {
            // Keep what was written so far on disk
            writer.sink.flush()?;
            return Err(e);
        }
    }
    let (_, summary) = writer.finish()?;
    info!(
        "Wrote {} events ({} bytes)",
        summary.num_events, summary.bytes_written
    );
    Ok(summary)
}
