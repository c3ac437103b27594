//! Column-named record sets and their conversion into typed observations.
//!
//! Vendor adapters and the persistence layer hand over tidy records; this
//! module is where a missing column becomes a structural error instead of a
//! silently empty metric.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{FeatureError, FeatureResult};
use crate::market::{epoch_seconds, MarketEvent, Quote, Trade};
use crate::window::WindowKey;

/// Columns every windowed input carries
pub const WINDOW_COLUMNS: [&str; 3] = ["symbol", "date", "window"];

pub const QUOTE_COLUMNS: [&str; 8] = [
    "symbol",
    "date",
    "window",
    "timestamp",
    "bid_price",
    "bid_size",
    "ask_price",
    "ask_size",
];

pub const TRADE_COLUMNS: [&str; 6] = ["symbol", "date", "window", "timestamp", "price", "size"];

pub const EVENT_COLUMNS: [&str; 5] = ["symbol", "date", "window", "event_type", "timestamp"];

/// A rectangular record set with named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from a header and row values. Every row must match the
    /// header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> FeatureResult<Self> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(FeatureError::invalid_value(
                    "<row>",
                    idx,
                    format!("expected {} cells, found {}", columns.len(), row.len()),
                ));
            }
        }
        Ok(Self { columns, rows })
    }

    /// An empty table that still declares its schema
    pub fn with_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from JSON objects. Columns are the union of keys in
    /// first-seen order; absent cells become `null`.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for name in record.keys() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Parse a JSON array of objects
    pub fn from_json(value: &Value) -> FeatureResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| {
                FeatureError::invalid_value("<table>", 0, "expected an array of records")
            })?;

        let mut records = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let record = item
                .as_object()
                .ok_or_else(|| FeatureError::invalid_value("<record>", idx, "expected an object"))?;
            records.push(record.clone());
        }
        Ok(Self::from_records(&records))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Fail with every missing column named at once
    pub fn require_columns(&self, required: &[&str]) -> FeatureResult<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !self.has_column(name))
            .map(|name| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeatureError::MissingColumns(missing))
        }
    }

    /// Convert to quote observations
    pub fn quotes(&self) -> FeatureResult<Vec<Quote>> {
        self.require_columns(&QUOTE_COLUMNS)?;
        let cols = self.indices(&QUOTE_COLUMNS);

        (0..self.rows.len())
            .map(|row| {
                Ok(Quote {
                    key: self.window_key(row, &cols[..3])?,
                    timestamp: self.timestamp(row, cols[3])?,
                    bid_price: self.number(row, cols[4])?,
                    bid_size: self.number(row, cols[5])?,
                    ask_price: self.number(row, cols[6])?,
                    ask_size: self.number(row, cols[7])?,
                })
            })
            .collect()
    }

    /// Convert to trade prints
    pub fn trades(&self) -> FeatureResult<Vec<Trade>> {
        self.require_columns(&TRADE_COLUMNS)?;
        let cols = self.indices(&TRADE_COLUMNS);

        (0..self.rows.len())
            .map(|row| {
                Ok(Trade {
                    key: self.window_key(row, &cols[..3])?,
                    timestamp: self.timestamp(row, cols[3])?,
                    price: self.number(row, cols[4])?,
                    size: self.number(row, cols[5])?,
                })
            })
            .collect()
    }

    /// Convert to generic events; `start`/`end` columns are optional
    pub fn events(&self) -> FeatureResult<Vec<MarketEvent>> {
        self.require_columns(&EVENT_COLUMNS)?;
        let cols = self.indices(&EVENT_COLUMNS);
        let start = self.column_index("start");
        let end = self.column_index("end");

        (0..self.rows.len())
            .map(|row| {
                Ok(MarketEvent {
                    key: self.window_key(row, &cols[..3])?,
                    event_type: self.text(row, cols[3])?,
                    timestamp: self.seconds(row, cols[4])?,
                    start: start.map(|c| self.optional_number(row, c)).transpose()?.flatten(),
                    end: end.map(|c| self.optional_number(row, c)).transpose()?.flatten(),
                })
            })
            .collect()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    // Callers have already validated presence.
    fn indices(&self, names: &[&str]) -> Vec<usize> {
        names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }

    fn cell(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    fn window_key(&self, row: usize, cols: &[usize]) -> FeatureResult<WindowKey> {
        Ok(WindowKey {
            symbol: self.text(row, cols[0])?,
            date: self.date(row, cols[1])?,
            window: self.text(row, cols[2])?,
        })
    }

    fn text(&self, row: usize, col: usize) -> FeatureResult<String> {
        match self.cell(row, col) {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(FeatureError::invalid_value(
                &self.columns[col],
                row,
                format!("expected text, found {other}"),
            )),
        }
    }

    /// Numeric cell; `null` is a missing observation and reads as NaN
    fn number(&self, row: usize, col: usize) -> FeatureResult<f64> {
        Ok(self.optional_number(row, col)?.unwrap_or(f64::NAN))
    }

    fn optional_number(&self, row: usize, col: usize) -> FeatureResult<Option<f64>> {
        match self.cell(row, col) {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64()),
            Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                let reason = format!("`{s}` is not numeric");
                FeatureError::invalid_value(&self.columns[col], row, reason)
            }),
            other => Err(FeatureError::invalid_value(
                &self.columns[col],
                row,
                format!("expected a number, found {other}"),
            )),
        }
    }

    fn date(&self, row: usize, col: usize) -> FeatureResult<NaiveDate> {
        let raw = self.text(row, col)?;
        if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            return Ok(date);
        }
        parse_datetime(&raw)
            .map(|ts| ts.date_naive())
            .ok_or_else(|| {
                let reason = format!("`{raw}` is not a date");
                FeatureError::invalid_value(&self.columns[col], row, reason)
            })
    }

    fn timestamp(&self, row: usize, col: usize) -> FeatureResult<DateTime<Utc>> {
        let invalid = |reason: String| FeatureError::invalid_value(&self.columns[col], row, reason);
        match self.cell(row, col) {
            Value::Number(n) => {
                let secs = n.as_f64().unwrap_or(f64::NAN);
                from_epoch_seconds(secs).ok_or_else(|| invalid(format!("{secs} is out of range")))
            }
            Value::String(s) => {
                parse_datetime(s).ok_or_else(|| invalid(format!("`{s}` is not a timestamp")))
            }
            other => Err(invalid(format!("expected a timestamp, found {other}"))),
        }
    }

    fn seconds(&self, row: usize, col: usize) -> FeatureResult<f64> {
        match self.cell(row, col) {
            Value::String(s) if s.trim().parse::<f64>().is_err() => parse_datetime(s)
                .map(|ts| epoch_seconds(&ts))
                .ok_or_else(|| {
                    let reason = format!("`{s}` is not a timestamp");
                    FeatureError::invalid_value(&self.columns[col], row, reason)
                }),
            _ => self.number(row, col),
        }
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_records() -> Value {
        json!([
            {"symbol": "AAPL", "date": "2024-01-02", "window": "w1",
             "timestamp": "2024-01-02 09:30:00", "bid_price": 100.0, "bid_size": 10,
             "ask_price": 100.5, "ask_size": 8},
            {"symbol": "AAPL", "date": "2024-01-02", "window": "w1",
             "timestamp": "2024-01-02T09:30:30Z", "bid_price": "100.1", "bid_size": 12,
             "ask_price": 100.6, "ask_size": null}
        ])
    }

    #[test]
    fn test_quotes_from_records() {
        let table = Table::from_json(&quote_records()).unwrap();
        let quotes = table.quotes().unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].key.symbol, "AAPL");
        assert_eq!(quotes[1].bid_price, 100.1);
        assert!(quotes[1].ask_size.is_nan());
        assert!(quotes[1].timestamp > quotes[0].timestamp);
    }

    #[test]
    fn test_missing_columns_reported_together() {
        let table = Table::with_columns(&["symbol", "date", "window", "timestamp", "price"]);
        let err = table.quotes().unwrap_err();
        assert_eq!(
            err,
            FeatureError::MissingColumns(vec![
                "bid_price".into(),
                "bid_size".into(),
                "ask_price".into(),
                "ask_size".into(),
            ])
        );
    }

    #[test]
    fn test_empty_table_with_schema_converts_to_nothing() {
        let table = Table::with_columns(&TRADE_COLUMNS);
        assert!(table.trades().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_cell_is_structural() {
        let table = Table::from_json(&json!([
            {"symbol": "AAPL", "date": "2024-01-02", "window": "w1",
             "timestamp": 0, "price": "ten", "size": 5}
        ]))
        .unwrap();

        match table.trades() {
            Err(FeatureError::InvalidValue { column, row, .. }) => {
                assert_eq!(column, "price");
                assert_eq!(row, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_events_with_optional_bounds() {
        let table = Table::from_json(&json!([
            {"symbol": "XYZ", "date": "2024-01-01", "window": "session",
             "event_type": "trades", "timestamp": 1.5, "start": 0.0, "end": 10.0},
            {"symbol": "XYZ", "date": "2024-01-01", "window": "session",
             "event_type": "trades", "timestamp": "2.5"}
        ]))
        .unwrap();

        let events = table.events().unwrap();
        assert_eq!(events[0].start, Some(0.0));
        assert_eq!(events[0].end, Some(10.0));
        assert_eq!(events[1].timestamp, 2.5);
        assert_eq!(events[1].start, None);
    }

    #[test]
    fn test_row_width_mismatch_rejected() {
        let result = Table::new(vec!["a".into(), "b".into()], vec![vec![json!(1)]]);
        assert!(result.is_err());
    }
}
