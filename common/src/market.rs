//! Observation types consumed by the feature layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::{Keyed, WindowKey};

/// Top-of-book quote update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(flatten)]
    pub key: WindowKey,
    pub timestamp: DateTime<Utc>,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask_price - self.bid_price
    }
}

impl Keyed for Quote {
    fn key(&self) -> &WindowKey {
        &self.key
    }

    fn sort_time(&self) -> f64 {
        epoch_seconds(&self.timestamp)
    }
}

/// Trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(flatten)]
    pub key: WindowKey,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

impl Trade {
    pub fn dollar_volume(&self) -> f64 {
        self.price * self.size
    }
}

impl Keyed for Trade {
    fn key(&self) -> &WindowKey {
        &self.key
    }

    fn sort_time(&self) -> f64 {
        epoch_seconds(&self.timestamp)
    }
}

/// Generic timestamped event used for self-excitation fits.
///
/// `timestamp` is in numeric seconds. `start`/`end`, when present on the first
/// row of a window, bound the observation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    #[serde(flatten)]
    pub key: WindowKey,
    pub event_type: String,
    pub timestamp: f64,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

impl Keyed for MarketEvent {
    fn key(&self) -> &WindowKey {
        &self.key
    }

    fn sort_time(&self) -> f64 {
        self.timestamp
    }
}

/// Seconds since the Unix epoch with sub-second precision
pub fn epoch_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) * 1e-9
}
