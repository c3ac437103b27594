//! Market Microstructure & Time-Series Feature Layer
//!
//! Windowed analytics over quotes, trades and generic event streams:
//! order-flow and liquidity metrics, VPIN, Matrix Profile shape anomalies,
//! change-point detection and Hawkes self-excitation fits. Every operation is
//! a pure function of its inputs; [`FeatureEngine`] runs them all with one
//! configuration.

mod config;
pub mod contracts;
pub mod change_points;
pub mod hawkes;
pub mod matrix_profile;
pub mod microstructure;
pub mod price_trend;
pub mod vpin;

pub use config::{
    create_config_template, load_config, save_config, ChangePointConfig, FeatureConfig,
    HawkesConfig, MatrixProfileConfig, QcThresholds, VpinConfig,
};
pub use change_points::{change_point_scores, change_point_scores_with, ChangePointResult};
pub use hawkes::{
    fit_exponential_hawkes, hawkes_self_excitation_metrics, HawkesFitOptions, HawkesFitResult,
    HawkesRow,
};
pub use matrix_profile::{
    compute_matrix_profile_metrics, MatrixProfileEngine, MatrixProfileFeatures,
};
pub use microstructure::{
    AmihudRow, BookImbalanceRow, KyleLambdaRow, Microstructure, OfiRow, SpreadRow,
};
pub use price_trend::{calculate_price_trend, daily_closes, PriceTrend};
pub use vpin::{compute_vpin, VpinRow};

pub use common::{FeatureError, FeatureResult, MarketEvent, Quote, Table, Trade, WindowKey};

use common::group_by_window;
use serde::Serialize;
use tracing::{debug, info};

/// Quotes, trades and events for any number of windows
#[derive(Debug, Clone, Default)]
pub struct WindowBatch {
    pub quotes: Vec<Quote>,
    pub trades: Vec<Trade>,
    pub events: Vec<MarketEvent>,
}

impl WindowBatch {
    /// Build from tabular inputs; each table must carry its required columns
    /// unless it has no columns at all
    pub fn from_tables(quotes: &Table, trades: &Table, events: &Table) -> FeatureResult<Self> {
        let blank = |table: &Table| table.columns().is_empty();
        Ok(Self {
            quotes: if blank(quotes) { Vec::new() } else { quotes.quotes()? },
            trades: if blank(trades) { Vec::new() } else { trades.trades()? },
            events: if blank(events) { Vec::new() } else { events.events()? },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty() && self.trades.is_empty() && self.events.is_empty()
    }
}

/// Shape and level-shift analytics over one window's mid-quote series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub observations: usize,
    /// Absent when the window is shorter than `subseq_length + 1`
    pub matrix_profile: Option<MatrixProfileFeatures>,
    pub change_points: ChangePointResult,
}

/// Every feature table for one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureReport {
    pub ofi: Vec<OfiRow>,
    pub book_imbalance: Vec<BookImbalanceRow>,
    pub kyle_lambda: Vec<KyleLambdaRow>,
    pub amihud: Vec<AmihudRow>,
    pub spreads: Vec<SpreadRow>,
    pub vpin: Vec<VpinRow>,
    pub hawkes: Vec<HawkesRow>,
    pub series: Vec<SeriesRow>,
}

/// Main entry point for batch feature computation
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    config: FeatureConfig,
    microstructure: Microstructure,
}

impl FeatureEngine {
    /// Create an engine with default configuration
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(FeatureConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(config: FeatureConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            microstructure: Microstructure::new(config.qc.clone()),
            config,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Compute every feature table for `batch`
    pub fn run(&self, batch: &WindowBatch) -> FeatureResult<FeatureReport> {
        let ms = &self.microstructure;
        let vpin = &self.config.vpin;
        let report = FeatureReport {
            ofi: ms.compute_ofi(&batch.quotes),
            book_imbalance: ms.book_imbalance(&batch.quotes),
            kyle_lambda: ms.kyle_lambda(&batch.trades, &batch.quotes),
            amihud: ms.amihud_illiq(&batch.trades),
            spreads: ms.spreads(&batch.quotes),
            vpin: compute_vpin(&batch.trades, vpin.bucket_volume, vpin.rolling_bars)?,
            hawkes: hawkes_self_excitation_metrics(&batch.events, &self.config.hawkes)?,
            series: self.mid_price_series(&batch.quotes)?,
        };

        info!(
            quotes = batch.quotes.len(),
            trades = batch.trades.len(),
            events = batch.events.len(),
            windows = report.series.len(),
            hawkes_fits = report.hawkes.len(),
            "Feature batch computed"
        );

        Ok(report)
    }

    /// Matrix Profile metrics with configured parameters
    pub fn matrix_profile(&self, series: &[f64]) -> FeatureResult<MatrixProfileFeatures> {
        let mp = &self.config.matrix_profile;
        compute_matrix_profile_metrics(series, mp.subseq_length, mp.max_motifs, mp.engine)
    }

    /// Change points with configured parameters
    pub fn change_points(&self, series: &[f64]) -> FeatureResult<ChangePointResult> {
        change_point_scores_with(series, &self.config.change_points)
    }

    fn mid_price_series(&self, quotes: &[Quote]) -> FeatureResult<Vec<SeriesRow>> {
        let min_len = self.config.matrix_profile.subseq_length + 1;

        group_by_window(quotes)
            .into_iter()
            .map(|(key, rows)| {
                let mids: Vec<f64> =
                    rows.iter().map(|q| q.mid()).filter(|m| m.is_finite()).collect();
                let matrix_profile = if mids.len() >= min_len {
                    Some(self.matrix_profile(&mids)?)
                } else {
                    debug!(
                        window = %key,
                        observations = mids.len(),
                        "window too short for matrix profile"
                    );
                    None
                };

                Ok(SeriesRow {
                    key: key.clone(),
                    observations: mids.len(),
                    matrix_profile,
                    change_points: self.change_points(&mids)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn key(window: &str) -> WindowKey {
        WindowKey::new("AAPL", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), window)
    }

    fn quote_series(window: &str, mids: &[f64]) -> Vec<Quote> {
        let open = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        mids.iter()
            .enumerate()
            .map(|(i, &mid)| Quote {
                key: key(window),
                timestamp: open + Duration::seconds(i as i64),
                bid_price: mid - 0.05,
                bid_size: 100.0 + (i % 7) as f64,
                ask_price: mid + 0.05,
                ask_size: 90.0 + (i % 5) as f64,
            })
            .collect()
    }

    #[test]
    fn test_engine_creation() {
        let engine = FeatureEngine::new();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FeatureConfig::default();
        config.vpin.rolling_bars = 0;
        assert!(FeatureEngine::with_config(config).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let engine = FeatureEngine::new().unwrap();
        let report = engine.run(&WindowBatch::default()).unwrap();
        assert!(report.ofi.is_empty());
        assert!(report.vpin.is_empty());
        assert!(report.hawkes.is_empty());
        assert!(report.series.is_empty());
    }

    #[test]
    fn test_run_covers_every_window() {
        let mut config = FeatureConfig::default();
        config.matrix_profile.subseq_length = 8;
        config.matrix_profile.engine = Some(MatrixProfileEngine::Naive);
        config.change_points.min_size = 5;
        config.vpin.bucket_volume = 100.0;
        config.vpin.rolling_bars = 2;
        let engine = FeatureEngine::with_config(config).unwrap();

        let long: Vec<f64> = (0..60)
            .map(|i| (if i < 30 { 100.0 } else { 102.0 }) + (i as f64 * 0.7).sin() * 0.1)
            .collect();
        let mut quotes = quote_series("long", &long);
        quotes.extend(quote_series("short", &[100.0, 100.1, 100.2]));

        let trades: Vec<Trade> = (0..20)
            .map(|i| Trade {
                key: key("long"),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
                    + Duration::seconds(i),
                price: 100.0 + (i % 3) as f64 * 0.01,
                size: 40.0,
            })
            .collect();

        let report = engine
            .run(&WindowBatch {
                quotes,
                trades,
                events: Vec::new(),
            })
            .unwrap();

        assert_eq!(report.ofi.len(), 2);
        assert_eq!(report.spreads.len(), 2);
        assert_eq!(report.vpin.len(), 1);
        assert_eq!(report.series.len(), 2);

        let long_row = &report.series[0];
        assert_eq!(long_row.key.window, "long");
        assert!(long_row.matrix_profile.is_some());
        assert_eq!(long_row.change_points.breakpoints, vec![30]);

        let short_row = &report.series[1];
        assert!(short_row.matrix_profile.is_none());
        assert!(short_row.change_points.breakpoints.is_empty());
    }

    #[test]
    fn test_batch_from_tables() {
        let quotes = Table::from_json(&serde_json::json!([
            {"symbol": "AAPL", "date": "2024-01-02", "window": "w1",
             "timestamp": "2024-01-02 09:30:00",
             "bid_price": 100.0, "bid_size": 10, "ask_price": 100.5, "ask_size": 8}
        ]))
        .unwrap();
        let empty = Table::with_columns::<&str>(&[]);

        let batch = WindowBatch::from_tables(&quotes, &empty, &empty).unwrap();
        assert_eq!(batch.quotes.len(), 1);
        assert!(batch.trades.is_empty());
        assert!(!batch.is_empty());

        let broken = Table::with_columns(&["symbol", "price"]);
        assert!(WindowBatch::from_tables(&empty, &broken, &empty).is_err());
    }
}
