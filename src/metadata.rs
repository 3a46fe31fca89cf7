//! Run-level metadata: field conversion, the sorted f64 block and run-info providers

use crate::error::{PhsError, Result};
use crate::events::JsonLinesReader;
use crate::utils::pack_f64;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

/// One run's metadata, keyed by field name
pub type MetadataRecord = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Text(String),
    Null,
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(v: DateTime<Utc>) -> Self {
        MetadataValue::Timestamp(v)
    }
}

impl From<&Value> for MetadataValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => MetadataValue::Null,
            Value::Bool(b) => MetadataValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetadataValue::Int(i),
                None => MetadataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => match parse_timestamp(s) {
                Some(ts) => MetadataValue::Timestamp(ts),
                None => MetadataValue::Text(s.clone()),
            },
            other => MetadataValue::Text(other.to_string()),
        }
    }
}

/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS[.f]` form database dumps use
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Unit timestamps are expressed in, counted from the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    #[default]
    Nanoseconds,
    Seconds,
    Days,
}

impl TimestampUnit {
    pub fn convert(&self, ts: &DateTime<Utc>) -> f64 {
        let seconds = ts.timestamp() as f64 + ts.timestamp_subsec_nanos() as f64 / 1e9;
        match self {
            TimestampUnit::Nanoseconds => match ts.timestamp_nanos_opt() {
                Some(ns) => ns as f64,
                None => seconds * 1e9,
            },
            TimestampUnit::Seconds => seconds,
            TimestampUnit::Days => seconds / 86400.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Plain numeric cast (floats, integers, booleans, numeric text)
    Number,
    /// Datetime converted with the schema's [`TimestampUnit`]
    Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Number,
        }
    }

    pub fn timestamp(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Timestamp,
        }
    }
}

/// Which metadata fields are kept and how they become doubles.
///
/// Without declared `fields` every value with a numeric reading is kept.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MetadataSchema {
    #[serde(default)]
    pub timestamp_unit: TimestampUnit,
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
}

impl MetadataSchema {
    pub fn inferred() -> Self {
        Self::default()
    }

    pub fn declared(fields: Vec<FieldSpec>) -> Self {
        Self {
            timestamp_unit: TimestampUnit::default(),
            fields: Some(fields),
        }
    }

    pub fn with_timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.timestamp_unit = unit;
        self
    }

    /// Load a schema from a JSON config file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            PhsError::InvalidInput(format!("Invalid schema file '{}': {}", path.display(), e))
        })
    }

    fn convert(&self, value: &MetadataValue, kind: FieldKind) -> Option<f64> {
        match (value, kind) {
            (MetadataValue::Float(v), _) => Some(*v),
            (MetadataValue::Int(v), _) => Some(*v as f64),
            (MetadataValue::Timestamp(ts), _) => Some(self.timestamp_unit.convert(ts)),
            (MetadataValue::Bool(b), FieldKind::Number) => Some(if *b { 1.0 } else { 0.0 }),
            (MetadataValue::Text(s), FieldKind::Number) => s.trim().parse::<f64>().ok(),
            (MetadataValue::Text(s), FieldKind::Timestamp) => {
                parse_timestamp(s).map(|ts| self.timestamp_unit.convert(&ts))
            }
            (MetadataValue::Bool(_), FieldKind::Timestamp) | (MetadataValue::Null, _) => None,
        }
    }

    /// Convert a record, silently dropping fields without a numeric reading.
    /// The result is ordered by field name.
    pub fn retain(&self, record: &MetadataRecord) -> BTreeMap<String, f64> {
        match &self.fields {
            None => record
                .iter()
                .filter_map(|(name, value)| {
                    self.convert(value, FieldKind::Number)
                        .map(|v| (name.clone(), v))
                })
                .collect(),
            Some(fields) => fields
                .iter()
                .filter_map(|spec| {
                    let value = record.get(&spec.name)?;
                    self.convert(value, spec.kind).map(|v| (spec.name.clone(), v))
                })
                .collect(),
        }
    }
}

// ============================================================================
// SCHEMA CONTEXT
// ============================================================================

/// Holds the reference field-name set shared by every run of one batch.
///
/// The first encoded record fixes the set; it never changes afterwards.
#[derive(Debug, Default)]
pub struct SchemaContext {
    schema: MetadataSchema,
    reference: Option<Vec<String>>,
}

impl SchemaContext {
    pub fn new(schema: MetadataSchema) -> Self {
        Self {
            schema,
            reference: None,
        }
    }

    pub fn schema(&self) -> &MetadataSchema {
        &self.schema
    }

    /// Sorted reference field names, once established
    pub fn reference_fields(&self) -> Option<&[String]> {
        self.reference.as_deref()
    }

    /// Encode one run's metadata as `F` little-endian doubles sorted by name
    pub fn encode_metadata(&mut self, record: &MetadataRecord) -> Result<Vec<u8>> {
        let retained = self.schema.retain(record);
        let names: Vec<String> = retained.keys().cloned().collect();

        if let Some(expected) = &self.reference {
            if *expected != names {
                return Err(PhsError::SchemaMismatch {
                    expected: expected.clone(),
                    found: names,
                });
            }
        } else {
            info!("Metadata schema established with {} fields", names.len());
            debug!("Metadata fields: {:?}", names);
            self.reference = Some(names);
        }

        let values: Vec<f64> = retained.into_values().collect();
        Ok(pack_f64(&values))
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// Looks up the metadata of one run
pub trait MetadataProvider {
    fn run_info(&mut self, night: u32, run: u32) -> Result<MetadataRecord>;
}

impl MetadataProvider for HashMap<(u32, u32), MetadataRecord> {
    fn run_info(&mut self, night: u32, run: u32) -> Result<MetadataRecord> {
        self.get(&(night, run)).cloned().ok_or_else(|| {
            PhsError::SourceUnavailable(format!("No run info for night {} run {}", night, run))
        })
    }
}

/// Names of the columns identifying a run in a run-info table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunInfoKeys {
    pub night: String,
    pub run: String,
}

impl Default for RunInfoKeys {
    fn default() -> Self {
        Self {
            night: "fNight".to_string(),
            run: "fRunID".to_string(),
        }
    }
}

/// Run-info rows loaded from a JSON-Lines dump, one object per run
pub struct RunInfoTable {
    rows: HashMap<(u32, u32), MetadataRecord>,
}

impl RunInfoTable {
    pub fn load<P: AsRef<Path>>(path: P, keys: &RunInfoKeys) -> Result<Self> {
        let reader: JsonLinesReader<Map<String, Value>> = JsonLinesReader::open(path.as_ref())?;
        let mut rows = Vec::new();
        for row in reader {
            let row = row?;
            rows.push(
                row.iter()
                    .map(|(k, v)| (k.clone(), MetadataValue::from(v)))
                    .collect::<MetadataRecord>(),
            );
        }
        let table = Self::from_rows(rows, keys)?;
        info!(
            "Loaded run info for {} runs from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn from_rows<I>(rows: I, keys: &RunInfoKeys) -> Result<Self>
    where
        I: IntoIterator<Item = MetadataRecord>,
    {
        let mut table = HashMap::new();
        for row in rows {
            let night = key_value(&row, &keys.night)?;
            let run = key_value(&row, &keys.run)?;
            table.insert((night, run), row);
        }
        Ok(Self { rows: table })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn key_value(row: &MetadataRecord, key: &str) -> Result<u32> {
    match row.get(key) {
        Some(MetadataValue::Int(v)) => u32::try_from(*v).map_err(|_| {
            PhsError::SourceUnavailable(format!("Run-info key '{}' out of range: {}", key, v))
        }),
        Some(other) => Err(PhsError::SourceUnavailable(format!(
            "Run-info key '{}' is not an integer: {}",
            key, other
        ))),
        None => Err(PhsError::SourceUnavailable(format!(
            "Run-info row without key '{}'",
            key
        ))),
    }
}

impl MetadataProvider for RunInfoTable {
    fn run_info(&mut self, night: u32, run: u32) -> Result<MetadataRecord> {
        self.rows.run_info(night, run)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            MetadataValue::Text(s) => write!(f, "{:?}", s),
            MetadataValue::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(fields: &[(&str, MetadataValue)]) -> MetadataRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_sorted_block() {
        let mut ctx = SchemaContext::default();
        let rec = record(&[("B", 2.5f64.into()), ("A", 1.0f64.into())]);
        let bytes = ctx.encode_metadata(&rec).unwrap();
        assert_eq!(bytes, pack_f64(&[1.0, 2.5]));
        assert_eq!(ctx.reference_fields().unwrap(), &["A", "B"]);
    }

    #[test]
    fn test_non_numeric_dropped_before_comparison() {
        let mut ctx = SchemaContext::default();
        let first = record(&[("A", 1.0f64.into()), ("comment", "cloudy".into())]);
        let second = record(&[("A", 3.0f64.into()), ("comment", MetadataValue::Null)]);
        assert_eq!(ctx.encode_metadata(&first).unwrap().len(), 8);
        assert_eq!(ctx.encode_metadata(&second).unwrap(), pack_f64(&[3.0]));
    }

    #[test]
    fn test_schema_mismatch() {
        let mut ctx = SchemaContext::default();
        ctx.encode_metadata(&record(&[("A", 1.0f64.into()), ("B", 2i64.into())]))
            .unwrap();
        ctx.encode_metadata(&record(&[("A", 7.0f64.into()), ("B", 9i64.into())]))
            .unwrap();
        match ctx.encode_metadata(&record(&[("A", 1.0f64.into()), ("C", 2.0f64.into())])) {
            Err(PhsError::SchemaMismatch { expected, found }) => {
                assert_eq!(expected, vec!["A", "B"]);
                assert_eq!(found, vec!["A", "C"]);
            }
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
        // reference is never reconciled
        assert_eq!(ctx.reference_fields().unwrap(), &["A", "B"]);
    }

    #[test]
    fn test_timestamp_units() {
        let ts = Utc.with_ymd_and_hms(1970, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(TimestampUnit::Seconds.convert(&ts), 129600.0);
        assert_eq!(TimestampUnit::Days.convert(&ts), 1.5);
        assert_eq!(TimestampUnit::Nanoseconds.convert(&ts), 129600.0e9);
    }

    #[test]
    fn test_declared_schema() {
        let schema = MetadataSchema::declared(vec![
            FieldSpec::number("fNumEvents"),
            FieldSpec::timestamp("fRunStart"),
        ])
        .with_timestamp_unit(TimestampUnit::Seconds);
        let rec = record(&[
            ("fNumEvents", "1500".into()),
            ("fRunStart", "1970-01-01 00:01:00".into()),
            ("fUndeclared", 4.0f64.into()),
        ]);
        let retained = schema.retain(&rec);
        assert_eq!(retained.len(), 2);
        assert_eq!(retained["fNumEvents"], 1500.0);
        assert_eq!(retained["fRunStart"], 60.0);
    }

    #[test]
    fn test_schema_from_json() {
        let json = r#"{"timestamp_unit":"days","fields":[{"name":"fRunStart","kind":"timestamp"}]}"#;
        let schema: MetadataSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.timestamp_unit, TimestampUnit::Days);
        assert_eq!(schema.fields, Some(vec![FieldSpec::timestamp("fRunStart")]));

        let schema: MetadataSchema = serde_json::from_str("{}").unwrap();
        assert_eq!(schema, MetadataSchema::inferred());
    }

    #[test]
    fn test_run_info_table() {
        let rows = vec![
            record(&[("fNight", 20131101i64.into()), ("fRunID", 12i64.into())]),
            record(&[("fNight", 20131101i64.into()), ("fRunID", 13i64.into())]),
        ];
        let mut table = RunInfoTable::from_rows(rows, &RunInfoKeys::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.run_info(20131101, 13).is_ok());
        assert!(matches!(
            table.run_info(20131101, 14),
            Err(PhsError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_json_values_become_metadata() {
        let v: Value = serde_json::json!({"a": 1, "b": 1.5, "c": "2013-11-01 20:00:00", "d": "x"});
        let map = v.as_object().unwrap();
        assert_eq!(MetadataValue::from(&map["a"]), MetadataValue::Int(1));
        assert_eq!(MetadataValue::from(&map["b"]), MetadataValue::Float(1.5));
        assert!(matches!(MetadataValue::from(&map["c"]), MetadataValue::Timestamp(_)));
        assert_eq!(MetadataValue::from(&map["d"]), MetadataValue::Text("x".into()));
    }
}
