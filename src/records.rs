//! CSV loading for session events, purchases and item features.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub type SessionId = u64;
pub type ItemId = u32;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One row of `train_sessions.csv` or `train_purchases.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub ts_ms_utc: i64,
}

/// One row of `item_features.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFeatureRow {
    pub item_id: ItemId,
    pub category: u32,
    pub value: u32,
}

#[derive(Debug, Error)]
pub enum RecordLoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("header is missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("line {line}: failed to parse field {field} value '{value}'")]
    ParseField {
        line: u64,
        field: &'static str,
        value: String,
    },
}

pub fn load_session_events(path: &Path) -> Result<Vec<EventRow>, RecordLoadError> {
    let rows = load_events_from_reader(open(path)?)?;
    info!(
        component = "records",
        event = "records.load.sessions",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

pub fn load_purchases(path: &Path) -> Result<Vec<EventRow>, RecordLoadError> {
    let rows = load_events_from_reader(open(path)?)?;
    info!(
        component = "records",
        event = "records.load.purchases",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

pub fn load_item_features(path: &Path) -> Result<Vec<ItemFeatureRow>, RecordLoadError> {
    let rows = load_item_features_from_reader(open(path)?)?;
    info!(
        component = "records",
        event = "records.load.item_features",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Reads `session_id,item_id,date` rows. Column order is taken from the header.
pub fn load_events_from_reader<R: Read>(reader: R) -> Result<Vec<EventRow>, RecordLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let session_idx = column_index(&headers, "session_id")?;
    let item_idx = column_index(&headers, "item_id")?;
    let date_idx = column_index(&headers, "date")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        rows.push(EventRow {
            session_id: parse_u64(&record, session_idx, line, "session_id")?,
            item_id: parse_u32(&record, item_idx, line, "item_id")?,
            ts_ms_utc: parse_timestamp(&record, date_idx, line, "date")?,
        });
    }

    Ok(rows)
}

/// Reads `item_id,feature_category_id,feature_value_id` rows.
pub fn load_item_features_from_reader<R: Read>(
    reader: R,
) -> Result<Vec<ItemFeatureRow>, RecordLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let item_idx = column_index(&headers, "item_id")?;
    let category_idx = column_index(&headers, "feature_category_id")?;
    let value_idx = column_index(&headers, "feature_value_id")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        rows.push(ItemFeatureRow {
            item_id: parse_u32(&record, item_idx, line, "item_id")?,
            category: parse_u32(&record, category_idx, line, "feature_category_id")?,
            value: parse_u32(&record, value_idx, line, "feature_value_id")?,
        });
    }

    Ok(rows)
}

/// Parses a dataset date stamp as UTC milliseconds. The fractional part is optional.
pub fn parse_date_ms(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn open(path: &Path) -> Result<fs::File, RecordLoadError> {
    fs::File::open(path).map_err(|source| RecordLoadError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn column_index(headers: &StringRecord, name: &'static str) -> Result<usize, RecordLoadError> {
    headers
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}') == name)
        .ok_or(RecordLoadError::MissingColumn(name))
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|pos| pos.line()).unwrap_or_default()
}

fn parse_u64(
    record: &StringRecord,
    idx: usize,
    line: u64,
    field: &'static str,
) -> Result<u64, RecordLoadError> {
    let raw = record.get(idx).unwrap_or_default();
    raw.parse::<u64>().map_err(|_| RecordLoadError::ParseField {
        line,
        field,
        value: raw.to_string(),
    })
}

fn parse_u32(
    record: &StringRecord,
    idx: usize,
    line: u64,
    field: &'static str,
) -> Result<u32, RecordLoadError> {
    let raw = record.get(idx).unwrap_or_default();
    raw.parse::<u32>().map_err(|_| RecordLoadError::ParseField {
        line,
        field,
        value: raw.to_string(),
    })
}

fn parse_timestamp(
    record: &StringRecord,
    idx: usize,
    line: u64,
    field: &'static str,
) -> Result<i64, RecordLoadError> {
    let raw = record.get(idx).unwrap_or_default();
    parse_date_ms(raw).ok_or_else(|| RecordLoadError::ParseField {
        line,
        field,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_dates_with_and_without_fraction() {
        let base = Utc
            .with_ymd_and_hms(2020, 12, 18, 21, 25, 0)
            .single()
            .unwrap()
            .timestamp_millis();

        assert_eq!(parse_date_ms("2020-12-18 21:25:00"), Some(base));
        assert_eq!(parse_date_ms("2020-12-18 21:25:00.373"), Some(base + 373));
        assert_eq!(parse_date_ms("2020-12-18T21:25:00.5"), Some(base + 500));
        assert_eq!(parse_date_ms("18/12/2020"), None);
    }

    #[test]
    fn event_columns_are_located_by_header_name() {
        let csv = "date,item_id,session_id\n2020-05-01 10:00:00,15085,3\n";
        let rows = load_events_from_reader(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, 3);
        assert_eq!(rows[0].item_id, 15085);
    }

    #[test]
    fn bad_field_reports_line_and_value() {
        let csv = "session_id,item_id,date\n3,9655,2020-12-18 21:25:00\n3,abc,2020-12-18 21:19:48\n";
        let err = load_events_from_reader(csv.as_bytes()).unwrap_err();

        match err {
            RecordLoadError::ParseField { line, field, value } => {
                assert_eq!(line, 3);
                assert_eq!(field, "item_id");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_header_column_is_explicit() {
        let csv = "session_id,item_id\n1,2\n";
        assert!(matches!(
            load_events_from_reader(csv.as_bytes()).unwrap_err(),
            RecordLoadError::MissingColumn("date")
        ));
    }
}
