//! Liquidity and order-flow diagnostics per (symbol, date, window)

use common::{epoch_seconds, group_by_window, qc_pass, Quote, Trade, WindowKey};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::QcThresholds;

/// Net order-flow imbalance over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfiRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub ofi: f64,
    /// Quote transitions contributing to the sum
    pub ofi_obs: usize,
    pub ofi_qc_pass: bool,
}

/// Depth imbalance at the last quote of a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookImbalanceRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub book_imbalance: f64,
    pub book_imbalance_obs: usize,
    pub book_imbalance_qc_pass: bool,
}

/// Median price impact per share
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KyleLambdaRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub kyle_lambda: f64,
    /// Matched trade/quote pairs
    pub kyle_lambda_obs: usize,
    pub kyle_lambda_qc_pass: bool,
}

/// Amihud illiquidity in inverse-dollar units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmihudRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub amihud_illiq: f64,
    pub amihud_obs: usize,
    pub amihud_qc_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub avg_spread: f64,
    pub avg_rel_spread: f64,
    pub spreads_obs: usize,
    pub spreads_qc_pass: bool,
}

/// Microstructure metrics gated by a set of QC minimums
#[derive(Debug, Clone, Default)]
pub struct Microstructure {
    qc: QcThresholds,
}

impl Microstructure {
    pub fn new(qc: QcThresholds) -> Self {
        Self { qc }
    }

    pub fn thresholds(&self) -> &QcThresholds {
        &self.qc
    }

    /// Order-flow imbalance for every window in `quotes`
    pub fn compute_ofi(&self, quotes: &[Quote]) -> Vec<OfiRow> {
        let groups = group_by_window(quotes);
        debug!(windows = groups.len(), "computing order flow imbalance");
        groups
            .into_iter()
            .map(|(key, rows)| self.ofi_window(key, &rows))
            .collect()
    }

    /// Order-flow imbalance over one window of time-ordered quotes.
    ///
    /// Each transition contributes `e_bid - e_ask` where the bid term is the
    /// new size on a bid improvement, minus the old size on a bid drop and the
    /// size change otherwise; the ask term mirrors this with the price
    /// direction reversed.
    pub fn ofi_window(&self, key: &WindowKey, quotes: &[&Quote]) -> OfiRow {
        let mut ofi = 0.0;
        let mut transitions = 0;

        for pair in quotes.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);

            let bid_term = if cur.bid_price > prev.bid_price {
                cur.bid_size
            } else if cur.bid_price < prev.bid_price {
                -prev.bid_size
            } else {
                cur.bid_size - prev.bid_size
            };

            let ask_term = if cur.ask_price < prev.ask_price {
                cur.ask_size
            } else if cur.ask_price > prev.ask_price {
                -prev.ask_size
            } else {
                cur.ask_size - prev.ask_size
            };

            ofi += bid_term - ask_term;
            transitions += 1;
        }

        let ofi = if transitions == 0 || transitions < self.qc.min_ofi_transitions {
            f64::NAN
        } else {
            ofi
        };
        OfiRow {
            key: key.clone(),
            ofi,
            ofi_obs: transitions,
            ofi_qc_pass: qc_pass(transitions, self.qc.min_ofi_transitions, ofi),
        }
    }

    pub fn book_imbalance(&self, quotes: &[Quote]) -> Vec<BookImbalanceRow> {
        group_by_window(quotes)
            .into_iter()
            .map(|(key, rows)| self.book_imbalance_window(key, &rows))
            .collect()
    }

    /// `(bid_size - ask_size) / (bid_size + ask_size)` at the last quote
    pub fn book_imbalance_window(&self, key: &WindowKey, quotes: &[&Quote]) -> BookImbalanceRow {
        let imbalance = match quotes.last() {
            Some(_) if quotes.len() < self.qc.min_book_imbalance_obs => f64::NAN,
            Some(last) => {
                let depth = last.bid_size + last.ask_size;
                if depth > 0.0 {
                    ((last.bid_size - last.ask_size) / depth).clamp(-1.0, 1.0)
                } else {
                    f64::NAN
                }
            }
            None => f64::NAN,
        };

        BookImbalanceRow {
            key: key.clone(),
            book_imbalance: imbalance,
            book_imbalance_obs: quotes.len(),
            book_imbalance_qc_pass: qc_pass(
                quotes.len(),
                self.qc.min_book_imbalance_obs,
                imbalance,
            ),
        }
    }

    /// Kyle's lambda for every trade window, aligned to quotes of the same key
    pub fn kyle_lambda(&self, trades: &[Trade], quotes: &[Quote]) -> Vec<KyleLambdaRow> {
        let quote_groups: BTreeMap<&WindowKey, Vec<&Quote>> = group_by_window(quotes);
        let no_quotes: Vec<&Quote> = Vec::new();

        group_by_window(trades)
            .into_iter()
            .map(|(key, rows)| {
                let window_quotes = quote_groups.get(key).unwrap_or(&no_quotes);
                self.kyle_lambda_window(key, &rows, window_quotes)
            })
            .collect()
    }

    /// Median `|Δp| / |signed volume|` over one window.
    ///
    /// Each trade is matched to the latest quote at or before its timestamp and
    /// signed by its side of that quote's mid. Pairs with no prior trade, no
    /// prior quote or zero signed volume are discarded.
    pub fn kyle_lambda_window(
        &self,
        key: &WindowKey,
        trades: &[&Trade],
        quotes: &[&Quote],
    ) -> KyleLambdaRow {
        let quote_times: Vec<f64> = quotes.iter().map(|q| epoch_seconds(&q.timestamp)).collect();
        let mut ratios = Vec::new();

        for pair in trades.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let ts = epoch_seconds(&cur.timestamp);
            let matched = quote_times.partition_point(|&qt| qt <= ts);
            if matched == 0 {
                continue;
            }

            let mid = quotes[matched - 1].mid();
            let signed_volume = cur.size * sign(cur.price - mid);
            let price_change = cur.price - prev.price;

            if cur.size > 0.0 && signed_volume != 0.0 && price_change.is_finite() {
                let ratio = price_change.abs() / signed_volume.abs();
                if ratio.is_finite() {
                    ratios.push(ratio);
                }
            }
        }

        let obs = ratios.len();
        let lambda = if obs == 0 || obs < self.qc.min_kyle_pairs {
            f64::NAN
        } else {
            Data::new(ratios).median()
        };

        KyleLambdaRow {
            key: key.clone(),
            kyle_lambda: lambda,
            kyle_lambda_obs: obs,
            kyle_lambda_qc_pass: qc_pass(obs, self.qc.min_kyle_pairs, lambda),
        }
    }

    pub fn amihud_illiq(&self, trades: &[Trade]) -> Vec<AmihudRow> {
        group_by_window(trades)
            .into_iter()
            .map(|(key, rows)| self.amihud_window(key, &rows))
            .collect()
    }

    /// `mean(|r_t|) / mean(dollar_volume_t)` over consecutive trades with a
    /// positive prior price and positive dollar volume
    pub fn amihud_window(&self, key: &WindowKey, trades: &[&Trade]) -> AmihudRow {
        let mut abs_returns = Vec::new();
        let mut dollar_volumes = Vec::new();

        for pair in trades.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let dollar_volume = cur.dollar_volume();
            if prev.price > 0.0 && dollar_volume > 0.0 {
                abs_returns.push((cur.price / prev.price - 1.0).abs());
                dollar_volumes.push(dollar_volume);
            }
        }

        let obs = abs_returns.len();
        let illiq = if obs == 0 || obs < self.qc.min_amihud_returns {
            f64::NAN
        } else {
            abs_returns.iter().mean() / dollar_volumes.iter().mean()
        };

        AmihudRow {
            key: key.clone(),
            amihud_illiq: illiq,
            amihud_obs: obs,
            amihud_qc_pass: qc_pass(obs, self.qc.min_amihud_returns, illiq),
        }
    }

    pub fn spreads(&self, quotes: &[Quote]) -> Vec<SpreadRow> {
        group_by_window(quotes)
            .into_iter()
            .map(|(key, rows)| self.spreads_window(key, &rows))
            .collect()
    }

    /// Average absolute and relative spread; crossed quotes and quotes with a
    /// non-positive mid are excluded
    pub fn spreads_window(&self, key: &WindowKey, quotes: &[&Quote]) -> SpreadRow {
        let valid: Vec<(f64, f64)> = quotes
            .iter()
            .filter(|q| q.spread() >= 0.0 && q.mid() > 0.0)
            .map(|q| (q.spread(), q.spread() / q.mid()))
            .collect();

        let obs = valid.len();
        let (avg_spread, avg_rel_spread) = if obs == 0 || obs < self.qc.min_spread_obs {
            (f64::NAN, f64::NAN)
        } else {
            (
                valid.iter().map(|(s, _)| *s).mean(),
                valid.iter().map(|(_, r)| *r).mean(),
            )
        };

        SpreadRow {
            key: key.clone(),
            avg_spread,
            avg_rel_spread,
            spreads_obs: obs,
            spreads_qc_pass: qc_pass(obs, self.qc.min_spread_obs, avg_spread)
                && avg_rel_spread.is_finite(),
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Order-flow imbalance with default QC thresholds
pub fn compute_ofi(quotes: &[Quote]) -> Vec<OfiRow> {
    Microstructure::default().compute_ofi(quotes)
}

pub fn book_imbalance(quotes: &[Quote]) -> Vec<BookImbalanceRow> {
    Microstructure::default().book_imbalance(quotes)
}

pub fn kyle_lambda(trades: &[Trade], quotes: &[Quote]) -> Vec<KyleLambdaRow> {
    Microstructure::default().kyle_lambda(trades, quotes)
}

pub fn amihud_illiq(trades: &[Trade]) -> Vec<AmihudRow> {
    Microstructure::default().amihud_illiq(trades)
}

pub fn spreads(quotes: &[Quote]) -> Vec<SpreadRow> {
    Microstructure::default().spreads(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn key() -> WindowKey {
        WindowKey::new("AAPL", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "w1")
    }

    fn quote(secs: u32, bid_price: f64, bid_size: f64, ask_price: f64, ask_size: f64) -> Quote {
        Quote {
            key: key(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
                + chrono::Duration::seconds(secs as i64),
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        }
    }

    fn trade(secs: u32, price: f64, size: f64) -> Trade {
        Trade {
            key: key(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
                + chrono::Duration::seconds(secs as i64),
            price,
            size,
        }
    }

    fn sample_quotes() -> Vec<Quote> {
        vec![
            quote(0, 100.00, 10.0, 100.50, 8.0),
            quote(30, 100.10, 12.0, 100.60, 8.0),
            quote(60, 100.10, 11.0, 100.55, 7.0),
            quote(90, 100.00, 9.0, 100.50, 7.0),
        ]
    }

    fn sample_trades() -> Vec<Trade> {
        vec![
            trade(10, 100.12, 50.0),
            trade(40, 100.18, 80.0),
            trade(70, 100.14, 60.0),
        ]
    }

    #[test]
    fn test_compute_ofi() {
        let rows = compute_ofi(&sample_quotes());
        assert_eq!(rows.len(), 1);
        assert_relative_eq!(rows[0].ofi, -6.0, max_relative = 1e-9);
        assert_eq!(rows[0].ofi_obs, 3);
        assert!(rows[0].ofi_qc_pass);
    }

    #[test]
    fn test_ofi_single_quote_fails_qc() {
        let quotes = vec![quote(0, 100.0, 10.0, 100.5, 8.0)];
        let rows = compute_ofi(&quotes);
        assert_eq!(rows[0].ofi_obs, 0);
        assert!(rows[0].ofi.is_nan());
        assert!(!rows[0].ofi_qc_pass);
    }

    #[test]
    fn test_book_imbalance() {
        let rows = book_imbalance(&sample_quotes());
        assert_relative_eq!(rows[0].book_imbalance, 0.125, max_relative = 1e-9);
        assert_eq!(rows[0].book_imbalance_obs, 4);
        assert!(rows[0].book_imbalance_qc_pass);
    }

    #[test]
    fn test_book_imbalance_zero_depth() {
        let quotes = vec![quote(0, 100.0, 0.0, 100.5, 0.0)];
        let row = &book_imbalance(&quotes)[0];
        assert!(row.book_imbalance.is_nan());
        assert!(!row.book_imbalance_qc_pass);
    }

    #[test]
    fn test_book_imbalance_bounded() {
        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..200 {
            let quotes = vec![quote(
                0,
                100.0,
                rng.f64() * 1_000.0,
                100.5,
                rng.f64() * 1_000.0,
            )];
            let row = &book_imbalance(&quotes)[0];
            if row.book_imbalance_qc_pass {
                assert!((-1.0..=1.0).contains(&row.book_imbalance));
            }
        }
    }

    #[test]
    fn test_kyle_lambda() {
        let rows = kyle_lambda(&sample_trades(), &sample_quotes());
        let expected = (0.06 / 80.0 + 0.04 / 60.0) / 2.0;
        assert_relative_eq!(rows[0].kyle_lambda, expected, max_relative = 1e-6);
        assert_eq!(rows[0].kyle_lambda_obs, 2);
        assert!(rows[0].kyle_lambda_qc_pass);
    }

    #[test]
    fn test_kyle_lambda_without_quotes() {
        let rows = kyle_lambda(&sample_trades(), &[]);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].kyle_lambda.is_nan());
        assert_eq!(rows[0].kyle_lambda_obs, 0);
        assert!(!rows[0].kyle_lambda_qc_pass);
    }

    #[test]
    fn test_amihud_illiq() {
        let trades = sample_trades();
        let rows = amihud_illiq(&trades);

        let r1 = (100.18 / 100.12 - 1.0_f64).abs();
        let r2 = (100.14 / 100.18 - 1.0_f64).abs();
        let dv1 = 100.18 * 80.0;
        let dv2 = 100.14 * 60.0;
        let expected = ((r1 + r2) / 2.0) / ((dv1 + dv2) / 2.0);

        assert_relative_eq!(rows[0].amihud_illiq, expected, max_relative = 1e-9);
        assert_eq!(rows[0].amihud_obs, 2);
        assert!(rows[0].amihud_qc_pass);
    }

    #[test]
    fn test_spreads() {
        let quotes = sample_quotes();
        let row = &spreads(&quotes)[0];

        let expected_abs = quotes.iter().map(|q| q.spread()).sum::<f64>() / 4.0;
        let expected_rel = quotes.iter().map(|q| q.spread() / q.mid()).sum::<f64>() / 4.0;
        assert_relative_eq!(row.avg_spread, expected_abs, max_relative = 1e-9);
        assert_relative_eq!(row.avg_rel_spread, expected_rel, max_relative = 1e-9);
        assert_eq!(row.spreads_obs, 4);
        assert!(row.spreads_qc_pass);
        assert!(row.avg_spread >= 0.0);
    }

    #[test]
    fn test_spreads_all_crossed_fails_qc() {
        let quotes = vec![
            quote(0, 100.5, 10.0, 100.0, 8.0),
            quote(1, 100.6, 10.0, 100.1, 8.0),
        ];
        let row = &spreads(&quotes)[0];
        assert_eq!(row.spreads_obs, 0);
        assert!(row.avg_spread.is_nan());
        assert!(!row.spreads_qc_pass);
    }

    #[test]
    fn test_empty_inputs_return_no_rows() {
        assert!(compute_ofi(&[]).is_empty());
        assert!(book_imbalance(&[]).is_empty());
        assert!(kyle_lambda(&[], &[]).is_empty());
        assert!(amihud_illiq(&[]).is_empty());
        assert!(spreads(&[]).is_empty());
    }

    #[test]
    fn test_empty_window_row_is_neutral() {
        let analyzer = Microstructure::default();
        let row = analyzer.spreads_window(&key(), &[]);
        assert!(row.avg_spread.is_nan());
        assert_eq!(row.spreads_obs, 0);
        assert!(!row.spreads_qc_pass);

        let row = analyzer.amihud_window(&key(), &[]);
        assert!(row.amihud_illiq.is_nan());
        assert!(!row.amihud_qc_pass);
    }

    #[test]
    fn test_stricter_thresholds_fail_qc() {
        let analyzer = Microstructure::new(QcThresholds {
            min_kyle_pairs: 3,
            ..Default::default()
        });
        let rows = analyzer.kyle_lambda(&sample_trades(), &sample_quotes());
        assert_eq!(rows[0].kyle_lambda_obs, 2);
        assert!(rows[0].kyle_lambda.is_nan());
        assert!(!rows[0].kyle_lambda_qc_pass);
    }

    #[test]
    fn test_metrics_below_minimum_are_nan() {
        let analyzer = Microstructure::new(QcThresholds {
            min_ofi_transitions: 4,
            min_book_imbalance_obs: 5,
            min_kyle_pairs: 3,
            min_amihud_returns: 3,
            min_spread_obs: 5,
        });
        let quotes = sample_quotes();
        let trades = sample_trades();

        let ofi = &analyzer.compute_ofi(&quotes)[0];
        assert_eq!(ofi.ofi_obs, 3);
        assert!(ofi.ofi.is_nan());
        assert!(!ofi.ofi_qc_pass);

        let book = &analyzer.book_imbalance(&quotes)[0];
        assert_eq!(book.book_imbalance_obs, 4);
        assert!(book.book_imbalance.is_nan());
        assert!(!book.book_imbalance_qc_pass);

        let amihud = &analyzer.amihud_illiq(&trades)[0];
        assert_eq!(amihud.amihud_obs, 2);
        assert!(amihud.amihud_illiq.is_nan());
        assert!(!amihud.amihud_qc_pass);

        let spread = &analyzer.spreads(&quotes)[0];
        assert_eq!(spread.spreads_obs, 4);
        assert!(spread.avg_spread.is_nan());
        assert!(spread.avg_rel_spread.is_nan());
        assert!(!spread.spreads_qc_pass);
    }
}
