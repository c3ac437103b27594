//! Grouping key and QC conventions shared by every windowed metric

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one group of observations; unique per output row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub symbol: String,
    pub date: NaiveDate,
    pub window: String,
}

impl WindowKey {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, window: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            window: window.into(),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.symbol, self.date, self.window)
    }
}

/// A row that belongs to a window and carries an ordering timestamp
pub trait Keyed {
    fn key(&self) -> &WindowKey;

    /// Sort position inside the window (seconds since the epoch or any
    /// monotone clock)
    fn sort_time(&self) -> f64;
}

/// Group rows by window key, ordering rows by time inside each window.
///
/// Keys iterate in (symbol, date, window) order. The sort is stable, so rows
/// sharing a timestamp keep their input order.
pub fn group_by_window<T: Keyed>(rows: &[T]) -> BTreeMap<&WindowKey, Vec<&T>> {
    let mut groups: BTreeMap<&WindowKey, Vec<&T>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.key()).or_default().push(row);
    }
    for members in groups.values_mut() {
        members.sort_by(|a, b| a.sort_time().total_cmp(&b.sort_time()));
    }
    groups
}

/// QC gate: enough observations and a finite metric
pub fn qc_pass(obs: usize, min_obs: usize, value: f64) -> bool {
    obs >= min_obs && value.is_finite()
}
