//! Level-shift detection for univariate series
//!
//! Offline segmentation is exact penalized least squares solved with PELT.
//! The optional online detector lives in [`bocpd`].

pub mod bocpd;

pub use bocpd::{
    bocpd_probabilities, hazard_probability, NormalGammaPrior, OnlineChangePointDetector,
};

use common::{FeatureError, FeatureResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChangePointConfig;

/// Breakpoints and level statistics for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePointResult {
    /// First index of each new segment, ascending
    pub breakpoints: Vec<usize>,
    /// `mean(segment k + 1) - mean(segment k)` for each breakpoint
    pub deltas: Vec<f64>,
    pub segment_means: Vec<f64>,
    /// `|delta|` at each breakpoint, zero elsewhere
    pub scores: Vec<f64>,
    /// Online change probabilities, same length as the input
    pub bocpd_probabilities: Option<Vec<f64>>,
}

/// Offline breakpoints plus optional online probabilities.
///
/// `penalty` must be finite and non-negative and `min_size` at least 2. An
/// empty series or one shorter than `2 * min_size` yields no breakpoints.
pub fn change_point_scores(
    series: &[f64],
    penalty: f64,
    min_size: usize,
    max_breaks: Option<usize>,
    use_bocpd: bool,
    bocpd_hazard: f64,
    bocpd_max_run_length: Option<usize>,
) -> FeatureResult<ChangePointResult> {
    if !(penalty.is_finite() && penalty >= 0.0) {
        return Err(FeatureError::invalid_parameter(
            "penalty",
            "finite and non-negative",
            penalty,
        ));
    }
    if min_size < 2 {
        return Err(FeatureError::invalid_parameter("min_size", "at least 2", min_size));
    }
    if use_bocpd {
        hazard_probability(bocpd_hazard)?;
    }
    if let Some(idx) = series.iter().position(|x| !x.is_finite()) {
        return Err(FeatureError::invalid_value("series", idx, "observation is not finite"));
    }

    let mut breakpoints = pelt(series, penalty, min_size);
    if let Some(limit) = max_breaks {
        breakpoints = keep_largest_deltas(series, &breakpoints, limit);
    }

    let segment_means = segment_means(series, &breakpoints);
    let deltas: Vec<f64> = segment_means.windows(2).map(|w| w[1] - w[0]).collect();

    let mut scores = vec![0.0; series.len()];
    for (&bp, delta) in breakpoints.iter().zip(&deltas) {
        scores[bp] = delta.abs();
    }

    let bocpd_probabilities = if use_bocpd {
        Some(bocpd_probabilities(
            series,
            bocpd_hazard,
            bocpd_max_run_length,
            NormalGammaPrior::default(),
        )?)
    } else {
        None
    };

    debug!(
        observations = series.len(),
        breaks = breakpoints.len(),
        use_bocpd,
        "change point scan complete"
    );

    Ok(ChangePointResult {
        breakpoints,
        deltas,
        segment_means,
        scores,
        bocpd_probabilities,
    })
}

/// [`change_point_scores`] with parameters taken from configuration
pub fn change_point_scores_with(
    series: &[f64],
    config: &ChangePointConfig,
) -> FeatureResult<ChangePointResult> {
    change_point_scores(
        series,
        config.penalty,
        config.min_size,
        config.max_breaks,
        config.use_bocpd,
        config.bocpd_hazard,
        config.bocpd_max_run_length,
    )
}

/// Prefix sums giving O(1) segment costs
struct SegmentCost {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl SegmentCost {
    fn new(series: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(series.len() + 1);
        let mut sum_sq = Vec::with_capacity(series.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for &x in series {
            sum.push(sum[sum.len() - 1] + x);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + x * x);
        }
        Self { sum, sum_sq }
    }

    /// Sum of squared deviations from the mean over `[start, end)`
    fn cost(&self, start: usize, end: usize) -> f64 {
        let n = (end - start) as f64;
        let s = self.sum[end] - self.sum[start];
        let sq = self.sum_sq[end] - self.sum_sq[start];
        (sq - s * s / n).max(0.0)
    }

    fn mean(&self, start: usize, end: usize) -> f64 {
        (self.sum[end] - self.sum[start]) / (end - start) as f64
    }
}

/// Exact penalized segmentation. Every segment has at least `min_size`
/// points; ties prefer the earliest previous breakpoint.
fn pelt(series: &[f64], penalty: f64, min_size: usize) -> Vec<usize> {
    let n = series.len();
    if n < 2 * min_size {
        return Vec::new();
    }

    let cost = SegmentCost::new(series);
    let mut best = vec![f64::INFINITY; n + 1];
    let mut prev = vec![0usize; n + 1];
    best[0] = -penalty;

    let mut candidates: Vec<usize> = Vec::new();
    for t in min_size..=n {
        let newest = t - min_size;
        if newest == 0 || newest >= min_size {
            // `newest` is admissible for every end from here on, so any
            // candidate that cannot beat it at `newest` never will.
            let bound = best[newest] + 1e-9 * (1.0 + best[newest].abs());
            candidates.retain(|&s| best[s] + cost.cost(s, newest) <= bound);
            candidates.push(newest);
        }

        for &s in &candidates {
            let value = best[s] + cost.cost(s, t) + penalty;
            if value < best[t] {
                best[t] = value;
                prev[t] = s;
            }
        }
    }

    let mut breakpoints = Vec::new();
    let mut t = n;
    while t > 0 {
        let s = prev[t];
        if s > 0 {
            breakpoints.push(s);
        }
        t = s;
    }
    breakpoints.reverse();
    breakpoints
}

fn segment_means(series: &[f64], breakpoints: &[usize]) -> Vec<f64> {
    if series.is_empty() {
        return Vec::new();
    }
    let cost = SegmentCost::new(series);
    let mut bounds = Vec::with_capacity(breakpoints.len() + 2);
    bounds.push(0);
    bounds.extend_from_slice(breakpoints);
    bounds.push(series.len());
    bounds.windows(2).map(|w| cost.mean(w[0], w[1])).collect()
}

/// Keep the `limit` breakpoints with the largest `|delta|`, earliest first on ties
fn keep_largest_deltas(series: &[f64], breakpoints: &[usize], limit: usize) -> Vec<usize> {
    if breakpoints.len() <= limit {
        return breakpoints.to_vec();
    }

    let means = segment_means(series, breakpoints);
    let mut ranked: Vec<(usize, f64)> = breakpoints
        .iter()
        .zip(means.windows(2))
        .map(|(&bp, w)| (bp, (w[1] - w[0]).abs()))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut kept: Vec<usize> = ranked.into_iter().take(limit).map(|(bp, _)| bp).collect();
    kept.sort_unstable();
    kept
}
