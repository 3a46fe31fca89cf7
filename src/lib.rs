//! Photon-stream (PHS) binary format for runs of detector events
//!
//! Format: [Version header] → [Metadata block] → [Events]
//! - Version header: 0xFA 0xC7 0x01
//! - Metadata block: one f64 per run-info field, sorted by field name
//! - Events: 4 x i32, 3 x f64, length-prefixed photon arrivals and saturated pixels
//!
//! All values are little-endian with no padding. Record boundaries are implicit,
//! so readers parse in lockstep with the layout.

mod binary;
mod error;
mod events;
mod format;
mod metadata;
mod paths;
mod reader;
mod utils;
mod writer;

use log::{error, info, warn};

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub use binary::{
    arrival_block_len, encode_arrival_times, encode_event, encode_saturated_pixels,
    read_arrival_times, read_event, read_saturated_pixels, skip_arrival_times,
};
pub use error::{PhsError, Result};
pub use events::{EventReader, JsonLinesReader};
pub use format::{
    EventRecord, PhotonEvent, EVENT_FIXED_SIZE, MAX_U16_LEN, PHS_EXTENSION, PHS_VERSION_HEADER,
};
pub use metadata::{
    parse_timestamp, FieldKind, FieldSpec, MetadataProvider, MetadataRecord, MetadataSchema,
    MetadataValue, RunInfoKeys, RunInfoTable, SchemaContext, TimestampUnit,
};
pub use paths::{make_path, night_run_from_path, RunId};
pub use reader::{is_phs_file, EventIterator, PhsReader};
pub use utils::{pack_f64, pack_i32};
pub use writer::{write_run, PhsWriter, RunSummary};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Settings shared by every run of one invocation
#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub schema: MetadataSchema,
    pub run_info_keys: RunInfoKeys,
    pub extension: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeConfig {
    /// Defaults to [`MetadataSchema::inferred`], which keeps any field with a
    /// numeric reading as the legacy transcoder did. Declare a schema with
    /// [`TranscodeConfig::schema`] to pin the field set across runs.
    pub fn new() -> Self {
        Self {
            schema: MetadataSchema::inferred(),
            run_info_keys: RunInfoKeys::default(),
            extension: PHS_EXTENSION.to_string(),
        }
    }

    pub fn schema(mut self, schema: MetadataSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn run_info_keys(mut self, keys: RunInfoKeys) -> Self {
        self.run_info_keys = keys;
        self
    }

    pub fn extension(mut self, ext: &str) -> Self {
        self.extension = ext.to_string();
        self
    }

    /// Fresh schema context for one batch
    pub fn context(&self) -> SchemaContext {
        SchemaContext::new(self.schema.clone())
    }

    pub fn load_run_info<P: AsRef<Path>>(&self, path: P) -> Result<RunInfoTable> {
        RunInfoTable::load(path, &self.run_info_keys)
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Transcode one JSON-Lines run file. The night and run are taken from the
/// input file name; output directories are created as needed and an existing
/// output is overwritten.
pub fn transcode_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input_path: P,
    output_path: Q,
    provider: &mut dyn MetadataProvider,
    ctx: &mut SchemaContext,
) -> Result<RunSummary> {
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();

    let id = night_run_from_path(input_path)?;
    let metadata = provider.run_info(id.night_number(), id.run_number())?;
    let events = EventReader::open(input_path)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let output = File::create(output_path).map_err(|e| {
        PhsError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create output file '{}': {}", output_path.display(), e),
        ))
    })?;

    info!(
        "Converting night {} run {}: {} -> {}",
        id.night,
        id.run,
        input_path.display(),
        output_path.display()
    );
    write_run(BufWriter::new(output), ctx, &metadata, events)
}

/// Outcome of a batch conversion
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub converted: usize,
    pub num_events: u64,
    pub failed: Vec<PathBuf>,
}

/// Transcode every file matching `pattern` (in sorted order) into
/// `<out_base>/<YYYY>/<MM>/<DD>/<night>_<run><extension>`.
///
/// A failing file is logged and skipped; outputs it left behind stay on disk.
/// A metadata schema mismatch stops the whole batch.
pub fn transcode_batch<P: AsRef<Path>>(
    pattern: &str,
    out_base: P,
    provider: &mut dyn MetadataProvider,
    ctx: &mut SchemaContext,
    extension: &str,
) -> Result<BatchSummary> {
    let entries = glob::glob(pattern)
        .map_err(|e| PhsError::InvalidInput(format!("Invalid pattern '{}': {}", pattern, e)))?;

    let mut summary = BatchSummary::default();
    let mut inputs = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => inputs.push(path),
            Err(e) => {
                warn!("Skipping unreadable match: {}", e);
                summary.failed.push(e.path().to_path_buf());
            }
        }
    }
    inputs.sort();

    if inputs.is_empty() {
        warn!("No input files match '{}'", pattern);
    }

    for input in inputs {
        let result = match night_run_from_path(&input) {
            Ok(id) => {
                let output = make_path(out_base.as_ref(), &id, extension);
                transcode_file(&input, &output, provider, ctx)
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(run) => {
                summary.converted += 1;
                summary.num_events += run.num_events;
            }
            Err(e) if e.is_fatal() => {
                error!("Aborting batch at {}: {}", input.display(), e);
                return Err(e);
            }
            Err(e) => {
                error!("Failed to convert {}: {}", input.display(), e);
                summary.failed.push(input);
            }
        }
    }

    info!(
        "Batch done: {} converted ({} events), {} failed",
        summary.converted,
        summary.num_events,
        summary.failed.len()
    );
    Ok(summary)
}
