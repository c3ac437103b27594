//! Exponential-kernel Hawkes self-excitation fits
//!
//! Intensity `λ(t) = μ + α Σ_{t_i < t} exp(-β (t - t_i))`. The branching
//! ratio `α / β` is the expected number of direct offspring per event and is
//! kept below [`BRANCHING_RATIO_CEILING`] throughout the fit.

pub mod optimizer;

use common::{group_by_window, FeatureError, FeatureResult, MarketEvent, WindowKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::HawkesConfig;
pub use optimizer::{
    maximize, AscentOptions, AscentOutcome, BRANCHING_RATIO_CEILING, MAX_BACKTRACK_STEPS,
};

/// Smallest admissible value for any positive parameter or intensity
const EPS: f64 = 1e-9;

/// Minimum length of a derived observation window, in seconds
const MIN_WINDOW: f64 = 1e-6;

/// Initial guesses are pulled below this branching ratio
const INITIAL_BRANCHING_CAP: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HawkesFitOptions {
    /// Window start; defaults to the first timestamp
    pub start_time: Option<f64>,
    /// Window end; defaults to the last timestamp
    pub end_time: Option<f64>,
    pub baseline_init: Option<f64>,
    pub amplitude_init: Option<f64>,
    /// Defaults to the inverse mean inter-arrival gap
    pub decay_init: Option<f64>,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for HawkesFitOptions {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            baseline_init: None,
            amplitude_init: None,
            decay_init: None,
            max_iter: 200,
            tol: 1e-6,
        }
    }
}

impl HawkesFitOptions {
    pub fn from_config(config: &HawkesConfig) -> Self {
        Self {
            decay_init: config.decay_init,
            max_iter: config.max_iter,
            tol: config.tol,
            ..Self::default()
        }
    }

    fn validate(&self) -> FeatureResult<()> {
        if self.max_iter == 0 {
            return Err(FeatureError::invalid_parameter("max_iter", "at least 1", 0));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(FeatureError::invalid_parameter("tol", "positive and finite", self.tol));
        }
        for (name, bound) in [("start_time", self.start_time), ("end_time", self.end_time)] {
            if let Some(value) = bound {
                if !value.is_finite() {
                    return Err(FeatureError::invalid_parameter(name, "finite", value));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HawkesFitResult {
    pub baseline: f64,
    pub amplitude: f64,
    pub decay: f64,
    pub branching_ratio: f64,
    /// Kernel sup-norm, equal to the amplitude; its L1 norm is the branching ratio
    pub kernel_norm: f64,
    pub log_likelihood: f64,
    pub n_events: usize,
    pub duration: f64,
    pub converged: bool,
    /// Set when the optimizer was skipped in favour of a homogeneous Poisson estimate
    pub poisson_fallback: bool,
}

impl HawkesFitResult {
    /// Homogeneous Poisson estimate for windows the optimizer cannot handle
    fn poisson(n_events: usize, duration: f64) -> Self {
        let baseline = if duration > 0.0 {
            n_events as f64 / duration
        } else {
            f64::NAN
        };
        let log_likelihood = if baseline > 0.0 {
            n_events as f64 * baseline.ln() - baseline * duration
        } else if n_events == 0 && duration > 0.0 {
            0.0
        } else {
            f64::NAN
        };

        Self {
            baseline,
            amplitude: 0.0,
            decay: 0.0,
            branching_ratio: 0.0,
            kernel_norm: 0.0,
            log_likelihood,
            n_events,
            duration,
            converged: false,
            poisson_fallback: true,
        }
    }
}

/// Event times shifted to the window start, with the window length
struct EventHistory {
    times: Vec<f64>,
    horizon: f64,
}

impl EventHistory {
    /// Log-likelihood and its gradient in `(μ, α, β)`; `None` when some
    /// intensity is not positive
    fn log_likelihood(&self, mu: f64, alpha: f64, beta: f64) -> Option<(f64, [f64; 3])> {
        let mut sum_log = 0.0;
        let mut sum_inv = 0.0;
        let mut sum_history = 0.0;
        let mut sum_lag = 0.0;

        // history: Σ_{j<i} e^{-β(t_i - t_j)}, lag: Σ_{j<i} (t_i - t_j) e^{-β(t_i - t_j)}
        let mut history = 0.0;
        let mut lag = 0.0;
        for (i, &t) in self.times.iter().enumerate() {
            if i > 0 {
                let dt = (t - self.times[i - 1]).max(0.0);
                let decay = (-beta * dt).exp();
                lag = decay * (lag + dt * (history + 1.0));
                history = decay * (history + 1.0);
            }

            let intensity = mu + alpha * history;
            if intensity.is_nan() || intensity <= EPS {
                return None;
            }
            sum_log += intensity.ln();
            sum_inv += 1.0 / intensity;
            sum_history += history / intensity;
            sum_lag += lag / intensity;
        }

        let mut compensator = 0.0;
        let mut tail_weight = 0.0;
        for &t in &self.times {
            let tail = (self.horizon - t).max(0.0);
            let survival = (-beta * tail).exp();
            compensator += 1.0 - survival;
            tail_weight += tail * survival;
        }

        let value = sum_log - mu * self.horizon - (alpha / beta) * compensator;
        let grad = [
            sum_inv - self.horizon,
            sum_history - compensator / beta,
            -alpha * sum_lag + alpha / (beta * beta) * compensator - (alpha / beta) * tail_weight,
        ];
        Some((value, grad))
    }
}

/// Keep `α / β` at or below the ceiling in log-parameter space
fn project(params: [f64; 3]) -> [f64; 3] {
    let ceiling = params[2] + BRANCHING_RATIO_CEILING.ln();
    [params[0], params[1].min(ceiling), params[2]]
}

/// Fit by maximum likelihood over `(log μ, log α, log β)`.
///
/// Windows with fewer than two events, a non-positive or non-finite
/// `decay_init`, or a non-positive duration return a Poisson estimate with
/// `poisson_fallback = true` and `converged = false`. Non-finite timestamps
/// and invalid iteration settings are errors.
pub fn fit_exponential_hawkes(
    timestamps: &[f64],
    options: &HawkesFitOptions,
) -> FeatureResult<HawkesFitResult> {
    options.validate()?;
    if let Some(row) = timestamps.iter().position(|t| !t.is_finite()) {
        return Err(FeatureError::invalid_value("timestamp", row, "timestamps must be finite"));
    }

    let mut times = timestamps.to_vec();
    times.sort_by(f64::total_cmp);
    let n = times.len();

    let (first, last) = match (times.first(), times.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => {
            let duration = match (options.start_time, options.end_time) {
                (Some(start), Some(end)) => end - start,
                _ => 0.0,
            };
            return Ok(HawkesFitResult::poisson(0, duration));
        }
    };

    let start = options.start_time.unwrap_or(first);
    let mut end = options.end_time.unwrap_or(last);
    if options.end_time.is_none() && end <= start {
        end = last + MIN_WINDOW;
    }
    let duration = end - start;

    let decay_ok = options.decay_init.map_or(true, |d| d.is_finite() && d > 0.0);
    if n < 2 || duration <= 0.0 || !decay_ok {
        debug!(n_events = n, duration, "hawkes window too sparse, using poisson estimate");
        return Ok(HawkesFitResult::poisson(n, duration));
    }

    let mean_gap = ((last - first) / (n - 1) as f64).max(MIN_WINDOW);
    let decay = options.decay_init.unwrap_or(1.0 / mean_gap).max(MIN_WINDOW);
    let rate = n as f64 / duration;
    let baseline = options.baseline_init.unwrap_or(0.5 * rate).max(EPS);
    let amplitude = options
        .amplitude_init
        .unwrap_or(0.5 * decay)
        .max(EPS)
        .min(INITIAL_BRANCHING_CAP * decay);

    let history = EventHistory {
        times: times.iter().map(|t| t - start).collect(),
        horizon: duration,
    };
    let scale = n as f64;

    let objective = |p: &[f64; 3]| {
        let (mu, alpha, beta) = (p[0].exp(), p[1].exp(), p[2].exp());
        let (value, grad) = history.log_likelihood(mu, alpha, beta)?;
        Some((
            value / scale,
            [mu * grad[0] / scale, alpha * grad[1] / scale, beta * grad[2] / scale],
        ))
    };

    let ascent = AscentOptions {
        max_iter: options.max_iter,
        tol: options.tol,
        ..AscentOptions::default()
    };
    let initial = [baseline.ln(), amplitude.ln(), decay.ln()];
    let outcome = maximize(initial, objective, project, &ascent);

    if !outcome.value.is_finite() {
        debug!(
            n_events = n,
            "hawkes initial guess has no finite likelihood, using poisson estimate"
        );
        return Ok(HawkesFitResult::poisson(n, duration));
    }

    let [mu, alpha, beta] = outcome.params.map(f64::exp);
    debug!(
        n_events = n,
        iterations = outcome.iterations,
        converged = outcome.converged,
        branching_ratio = alpha / beta,
        "hawkes fit finished"
    );

    Ok(HawkesFitResult {
        baseline: mu,
        amplitude: alpha,
        decay: beta,
        branching_ratio: alpha / beta,
        kernel_norm: alpha,
        log_likelihood: outcome.value * scale,
        n_events: n,
        duration,
        converged: outcome.converged,
        poisson_fallback: false,
    })
}

/// One fit per window and event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HawkesRow {
    #[serde(flatten)]
    pub key: WindowKey,
    pub event_type: String,
    pub branching_ratio: f64,
    pub kernel_norm: f64,
    pub baseline: f64,
    pub amplitude: f64,
    pub decay: f64,
    pub log_likelihood: f64,
    pub n_events: usize,
    pub duration: f64,
    pub converged: bool,
    pub poisson_fallback: bool,
}

/// Fit every `(symbol, date, window, event_type)` stream.
///
/// All event types in a window share one observation period: the first row's
/// `start`/`end` when present, otherwise the window's min and max timestamps.
pub fn hawkes_self_excitation_metrics(
    events: &[MarketEvent],
    config: &HawkesConfig,
) -> FeatureResult<Vec<HawkesRow>> {
    let base = HawkesFitOptions::from_config(config);
    base.validate()?;
    if let Some(row) = events.iter().position(|e| !e.timestamp.is_finite()) {
        return Err(FeatureError::invalid_value("timestamp", row, "timestamps must be finite"));
    }

    let mut rows = Vec::new();
    for (key, members) in group_by_window(events) {
        let (Some(first), Some(last)) = (members.first(), members.last()) else {
            continue;
        };
        let start = first.start.filter(|s| s.is_finite()).unwrap_or(first.timestamp);
        let end = first
            .end
            .filter(|e| e.is_finite())
            .unwrap_or(last.timestamp)
            .max(start + MIN_WINDOW);

        let mut streams: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for event in &members {
            streams.entry(event.event_type.as_str()).or_default().push(event.timestamp);
        }

        let options = HawkesFitOptions {
            start_time: Some(start),
            end_time: Some(end),
            ..base
        };
        for (event_type, timestamps) in streams {
            let fit = fit_exponential_hawkes(&timestamps, &options)?;
            rows.push(HawkesRow {
                key: key.clone(),
                event_type: event_type.to_string(),
                branching_ratio: fit.branching_ratio,
                kernel_norm: fit.kernel_norm,
                baseline: fit.baseline,
                amplitude: fit.amplitude,
                decay: fit.decay,
                log_likelihood: fit.log_likelihood,
                n_events: fit.n_events,
                duration: fit.duration,
                converged: fit.converged,
                poisson_fallback: fit.poisson_fallback,
            });
        }
    }

    info!(rows = rows.len(), "hawkes self-excitation metrics computed");
    Ok(rows)
}
