//! Volume-synchronized probability of informed trading

use common::{group_by_window, qc_pass, FeatureError, FeatureResult, Trade, WindowKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Initiator side inferred for a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Tick-rule classifier for one window.
///
/// Up-ticks are buys and down-ticks sells; a zero tick inherits the previous
/// side. The first trade has no reference price and is classified as a buy,
/// which biases short windows toward buying pressure.
#[derive(Debug, Clone)]
pub struct TickRule {
    last_price: Option<f64>,
    last_side: Side,
}

impl Default for TickRule {
    fn default() -> Self {
        Self {
            last_price: None,
            last_side: Side::Buy,
        }
    }
}

impl TickRule {
    pub fn classify(&mut self, price: f64) -> Side {
        if let Some(prev) = self.last_price {
            if price > prev {
                self.last_side = Side::Buy;
            } else if price < prev {
                self.last_side = Side::Sell;
            }
        }
        if price.is_finite() {
            self.last_price = Some(price);
        }
        self.last_side
    }
}

/// A completed volume bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBucket {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub total_volume: f64,
}

impl VolumeBucket {
    /// `|buy - sell| / bucket volume`, in [0, 1]
    pub fn imbalance(&self) -> f64 {
        ((self.buy_volume - self.sell_volume).abs() / self.total_volume).clamp(0.0, 1.0)
    }
}

/// Splits classified trade volume into fixed-size buckets. A trade larger
/// than the remaining capacity spills into the next bucket; the trailing
/// partial bucket is never emitted.
#[derive(Debug, Clone)]
pub struct VolumeBucketer {
    bucket_volume: f64,
    filled: f64,
    buy: f64,
    sell: f64,
}

impl VolumeBucketer {
    pub fn new(bucket_volume: f64) -> FeatureResult<Self> {
        validate_bucket_volume(bucket_volume)?;
        Ok(Self {
            bucket_volume,
            filled: 0.0,
            buy: 0.0,
            sell: 0.0,
        })
    }

    /// Add `size` shares on `side`, returning any buckets completed by it
    pub fn push(&mut self, size: f64, side: Side) -> Vec<VolumeBucket> {
        let mut completed = Vec::new();
        let mut remaining = size;
        // Relative slack so float accumulation still closes a bucket
        let slack = self.bucket_volume * 1e-9;

        while remaining > 0.0 {
            let take = remaining.min(self.bucket_volume - self.filled);
            match side {
                Side::Buy => self.buy += take,
                Side::Sell => self.sell += take,
            }
            self.filled += take;
            remaining -= take;

            if self.filled >= self.bucket_volume - slack {
                completed.push(VolumeBucket {
                    buy_volume: self.buy,
                    sell_volume: self.sell,
                    total_volume: self.bucket_volume,
                });
                self.filled = 0.0;
                self.buy = 0.0;
                self.sell = 0.0;
            }
        }

        completed
    }

    /// Volume waiting in the incomplete bucket
    pub fn pending_volume(&self) -> f64 {
        self.filled
    }
}

/// Rolling mean of bucket imbalances, scoped to one window.
///
/// Carries the previous completed VPIN so `change` is available without
/// any state outliving the window.
#[derive(Debug, Clone)]
pub struct RollingVpin {
    rolling_bars: usize,
    imbalances: VecDeque<f64>,
    current: Option<f64>,
    previous: Option<f64>,
    buckets: usize,
}

impl RollingVpin {
    pub fn new(rolling_bars: usize) -> FeatureResult<Self> {
        validate_rolling_bars(rolling_bars)?;
        Ok(Self {
            rolling_bars,
            imbalances: VecDeque::with_capacity(rolling_bars),
            current: None,
            previous: None,
            buckets: 0,
        })
    }

    pub fn push(&mut self, bucket: &VolumeBucket) {
        self.buckets += 1;
        if self.imbalances.len() == self.rolling_bars {
            self.imbalances.pop_front();
        }
        self.imbalances.push_back(bucket.imbalance());

        if self.imbalances.len() == self.rolling_bars {
            let mean = self.imbalances.iter().sum::<f64>() / self.rolling_bars as f64;
            self.previous = self.current;
            self.current = Some(mean);
        }
    }

    /// Latest VPIN, NaN until `rolling_bars` buckets have completed
    pub fn vpin(&self) -> f64 {
        self.current.unwrap_or(f64::NAN)
    }

    /// Difference from the preceding completed VPIN
    pub fn change(&self) -> f64 {
        match (self.current, self.previous) {
            (Some(cur), Some(prev)) => (cur - prev).clamp(-1.0, 1.0),
            _ => f64::NAN,
        }
    }

    /// Buckets contributing to the latest VPIN
    pub fn window_len(&self) -> usize {
        self.imbalances.len()
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn is_ready(&self) -> bool {
        self.buckets >= self.rolling_bars
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpinRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub vpin: f64,
    pub vpin_change: f64,
    /// Buckets in the final rolling window
    pub vpin_obs: usize,
    /// Completed buckets in the whole window
    pub vpin_buckets: usize,
    pub vpin_qc_pass: bool,
}

/// VPIN per (symbol, date, window).
///
/// `bucket_volume` must be positive and `rolling_bars` at least 1; both are
/// checked before any trade is read.
pub fn compute_vpin(
    trades: &[Trade],
    bucket_volume: f64,
    rolling_bars: usize,
) -> FeatureResult<Vec<VpinRow>> {
    validate_bucket_volume(bucket_volume)?;
    validate_rolling_bars(rolling_bars)?;

    let groups = group_by_window(trades);
    debug!(
        windows = groups.len(),
        bucket_volume, rolling_bars, "computing vpin"
    );

    groups
        .into_iter()
        .map(|(key, rows)| vpin_window(key, &rows, bucket_volume, rolling_bars))
        .collect()
}

/// VPIN over one window of time-ordered trades
pub fn vpin_window(
    key: &WindowKey,
    trades: &[&Trade],
    bucket_volume: f64,
    rolling_bars: usize,
) -> FeatureResult<VpinRow> {
    let mut classifier = TickRule::default();
    let mut bucketer = VolumeBucketer::new(bucket_volume)?;
    let mut rolling = RollingVpin::new(rolling_bars)?;

    for trade in trades {
        let side = classifier.classify(trade.price);
        if !(trade.size.is_finite() && trade.size > 0.0) {
            continue;
        }
        for bucket in bucketer.push(trade.size, side) {
            rolling.push(&bucket);
        }
    }

    let vpin = rolling.vpin();
    Ok(VpinRow {
        key: key.clone(),
        vpin,
        vpin_change: rolling.change(),
        vpin_obs: rolling.window_len(),
        vpin_buckets: rolling.buckets(),
        vpin_qc_pass: rolling.is_ready() && qc_pass(rolling.window_len(), rolling_bars, vpin),
    })
}

fn validate_bucket_volume(bucket_volume: f64) -> FeatureResult<()> {
    if bucket_volume.is_finite() && bucket_volume > 0.0 {
        Ok(())
    } else {
        Err(FeatureError::invalid_parameter(
            "bucket_volume",
            "a positive finite number",
            bucket_volume,
        ))
    }
}

fn validate_rolling_bars(rolling_bars: usize) -> FeatureResult<()> {
    if rolling_bars == 0 {
        Err(FeatureError::invalid_parameter("rolling_bars", "at least 1", rolling_bars))
    } else {
        Ok(())
    }
}
