//! Short-horizon price trend flags over daily closes

use chrono::{DateTime, NaiveDate, Utc};
use common::Trade;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closes needed before a trend is reported
const MIN_CLOSES: usize = 6;

const HIGH_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceTrend {
    /// Return of the latest close against the close five sessions earlier
    pub ret_5d: f64,
    /// Latest close is at or above every close in the last 20 sessions
    pub high_20d: bool,
    pub trend_up: bool,
}

/// Trend flags for chronologically ordered closes
pub fn calculate_price_trend(closes: &[f64]) -> PriceTrend {
    if closes.len() < MIN_CLOSES {
        return PriceTrend::default();
    }

    let latest = closes[closes.len() - 1];
    let baseline = closes[closes.len() - MIN_CLOSES];
    let ret_5d = if baseline == 0.0 { 0.0 } else { latest / baseline - 1.0 };

    let lookback = &closes[closes.len().saturating_sub(HIGH_LOOKBACK)..];
    let high_20d = lookback.iter().all(|&c| latest >= c);

    PriceTrend {
        ret_5d,
        high_20d,
        trend_up: ret_5d > 0.0 || high_20d,
    }
}

/// Last trade price per UTC calendar day, ordered by day
pub fn daily_closes(trades: &[Trade]) -> Vec<(NaiveDate, f64)> {
    let mut last: BTreeMap<NaiveDate, (DateTime<Utc>, f64)> = BTreeMap::new();
    for trade in trades.iter().filter(|t| t.price.is_finite()) {
        let day = trade.timestamp.date_naive();
        match last.get(&day) {
            Some((seen, _)) if *seen > trade.timestamp => {}
            _ => {
                last.insert(day, (trade.timestamp, trade.price));
            }
        }
    }
    last.into_iter().map(|(day, (_, price))| (day, price)).collect()
}
