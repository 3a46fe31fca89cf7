//! Night/run identification from file names and output path layout

use crate::error::{PhsError, Result};
use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};

/// A run identified from an input file name such as `20131101_012.phs.jsonl.gz`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunId {
    /// `YYYYMMDD` exactly as it appears in the name
    pub night: String,
    /// Run digits exactly as they appear in the name (zero padding kept)
    pub run: String,
    date: NaiveDate,
}

impl RunId {
    pub fn night_number(&self) -> u32 {
        // validated as an 8-digit date in `parse`
        self.night.parse().unwrap_or_default()
    }

    pub fn run_number(&self) -> u32 {
        self.run.parse().unwrap_or_default()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Parse `NNNNNNNN?RRR...`: characters 0..8 are the night, 9..12 the run
    pub fn parse(basename: &str) -> Result<Self> {
        let invalid = |why: &str| {
            PhsError::InvalidInput(format!("Cannot derive night/run from '{}': {}", basename, why))
        };

        let night = basename.get(0..8).ok_or_else(|| invalid("name too short"))?;
        let run = basename
            .get(9..basename.len().min(12))
            .filter(|r| !r.is_empty())
            .ok_or_else(|| invalid("no run number"))?;

        let date = NaiveDate::parse_from_str(night, "%Y%m%d")
            .ok()
            .filter(|_| night.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| invalid("night is not a YYYYMMDD date"))?;
        if !run.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("run is not numeric"));
        }

        Ok(Self {
            night: night.to_string(),
            run: run.to_string(),
            date,
        })
    }
}

/// Derive the run from an input path: the file name up to its first `.`
pub fn night_run_from_path<P: AsRef<Path>>(path: P) -> Result<RunId> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PhsError::InvalidInput(format!("No file name in '{}'", path.display())))?;
    let basename = file_name.split('.').next().unwrap_or(file_name);
    RunId::parse(basename)
}

/// `<base>/<YYYY>/<MM>/<DD>/<night>_<run><ext>`
pub fn make_path<P: AsRef<Path>>(base: P, run: &RunId, ext: &str) -> PathBuf {
    let date = run.date();
    base.as_ref()
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
        .join(format!("{}_{}{}", run.night, run.run, ext))
}
