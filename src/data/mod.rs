//! Bar ingestion. Remote download is out of scope; the monitor reads bars
//! that a scheduled job already fetched in the EODHD end-of-day JSON layout.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::DataError;
use crate::types::{Bar, BarSeries};

/// Anything that can hand the pipeline a bar history.
#[cfg_attr(test, mockall::automock)]
pub trait BarSource {
    fn fetch_bars(&self) -> Result<BarSeries, DataError>;
}

/// Reads an EODHD-style JSON array of
/// `{date, open, high, low, close, adjusted_close, volume}` objects.
/// Numeric fields may be numbers or numeric strings.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    start_date: Option<NaiveDate>,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start_date: None,
        }
    }

    /// Drop bars dated before `start_date`.
    pub fn with_start_date(mut self, start_date: Option<NaiveDate>) -> Self {
        self.start_date = start_date;
        self
    }
}

impl BarSource for JsonFileSource {
    fn fetch_bars(&self) -> Result<BarSeries, DataError> {
        let text = fs::read_to_string(&self.path)?;
        let series = parse_bars(&text, self.start_date)?;
        info!("Loaded {} bars from {}", series.len(), self.path.display());
        Ok(series)
    }
}

/// Parses the JSON payload into a sorted, de-duplicated [`BarSeries`].
pub fn parse_bars(text: &str, start_date: Option<NaiveDate>) -> Result<BarSeries, DataError> {
    let rows: Vec<Value> = serde_json::from_str(text)?;
    if rows.is_empty() {
        return Err(DataError::Empty);
    }

    let mut bars = Vec::with_capacity(rows.len());
    for (row, value) in rows.iter().enumerate() {
        let bar = parse_row(value, row)?;
        if start_date.map_or(true, |start| bar.date >= start) {
            bars.push(bar);
        }
    }

    let parsed = bars.len();
    let series = BarSeries::new(bars);
    if series.len() < parsed {
        debug!("Dropped {} duplicate dates", parsed - series.len());
    }
    if series.is_empty() {
        return Err(DataError::Empty);
    }
    Ok(series)
}

fn parse_row(value: &Value, row: usize) -> Result<Bar, DataError> {
    let date_raw = value.get("date").and_then(Value::as_str).ok_or(DataError::Unparseable {
        field: "date",
        row,
        value: value.get("date").map(Value::to_string).unwrap_or_default(),
    })?;
    let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d").map_err(|_| DataError::Unparseable {
        field: "date",
        row,
        value: date_raw.to_string(),
    })?;

    let close = required_number(value, "close", row)?;
    Ok(Bar {
        date,
        open: required_number(value, "open", row)?,
        high: required_number(value, "high", row)?,
        low: required_number(value, "low", row)?,
        close,
        adjusted_close: optional_number(value, "adjusted_close", row)?.unwrap_or(close),
        volume: optional_number(value, "volume", row)?.unwrap_or(0.0),
    })
}

fn required_number(value: &Value, field: &'static str, row: usize) -> Result<f64, DataError> {
    optional_number(value, field, row)?.ok_or(DataError::Unparseable {
        field,
        row,
        value: "null".to_string(),
    })
}

fn optional_number(value: &Value, field: &'static str, row: usize) -> Result<Option<f64>, DataError> {
    let unparseable = |raw: String| DataError::Unparseable { field, row, value: raw };
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| unparseable(n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| unparseable(s.clone())),
        Some(other) => Err(unparseable(other.to_string())),
    }
}
