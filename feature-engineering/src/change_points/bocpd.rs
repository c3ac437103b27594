//! Bayesian online change-point detection
//!
//! Run-length posterior with a Normal-Gamma prior on each segment's mean and
//! precision, so the one-step predictive is a Student-t.

use common::{FeatureError, FeatureResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, StudentsT};

/// Conjugate prior for a Gaussian segment with unknown mean and variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalGammaPrior {
    pub mean: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for NormalGammaPrior {
    fn default() -> Self {
        Self {
            mean: 0.0,
            kappa: 0.1,
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl NormalGammaPrior {
    fn validate(&self) -> FeatureResult<()> {
        let checks = [
            ("prior kappa", self.kappa),
            ("prior alpha", self.alpha),
            ("prior beta", self.beta),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value > 0.0) {
                return Err(FeatureError::invalid_parameter(name, "positive and finite", value));
            }
        }
        if !self.mean.is_finite() {
            return Err(FeatureError::invalid_parameter("prior mean", "finite", self.mean));
        }
        Ok(())
    }

    /// Posterior after observing `x`
    fn update(&self, x: f64) -> Self {
        let kappa = self.kappa + 1.0;
        Self {
            mean: (self.kappa * self.mean + x) / kappa,
            kappa,
            alpha: self.alpha + 0.5,
            beta: self.beta + self.kappa * (x - self.mean).powi(2) / (2.0 * kappa),
        }
    }

    /// Log density of the Student-t predictive at `x`
    fn predictive_ln_pdf(&self, x: f64) -> f64 {
        let scale = (self.beta * (self.kappa + 1.0) / (self.alpha * self.kappa)).sqrt();
        match StudentsT::new(self.mean, scale, 2.0 * self.alpha) {
            Ok(dist) => dist.ln_pdf(x),
            Err(_) => f64::NEG_INFINITY,
        }
    }
}

/// Per-step change probability from a hazard given either as a probability
/// in (0, 1) or as an expected run length above 1
pub fn hazard_probability(hazard: f64) -> FeatureResult<f64> {
    if hazard.is_finite() && hazard > 0.0 && hazard < 1.0 {
        Ok(hazard)
    } else if hazard.is_finite() && hazard > 1.0 {
        Ok(1.0 / hazard)
    } else {
        Err(FeatureError::invalid_parameter(
            "bocpd_hazard",
            "a probability in (0, 1) or an expected run length above 1",
            hazard,
        ))
    }
}

#[derive(Debug, Clone)]
struct Run {
    log_prob: f64,
    posterior: NormalGammaPrior,
}

/// Streaming detector; `update` returns the posterior probability that the
/// observation just seen opened a new segment.
#[derive(Debug, Clone)]
pub struct OnlineChangePointDetector {
    hazard: f64,
    max_run_length: Option<usize>,
    prior: NormalGammaPrior,
    // Index r holds run length r + 1.
    runs: Vec<Run>,
}

impl OnlineChangePointDetector {
    pub fn new(
        hazard: f64,
        max_run_length: Option<usize>,
        prior: NormalGammaPrior,
    ) -> FeatureResult<Self> {
        let hazard = hazard_probability(hazard)?;
        if max_run_length == Some(0) {
            return Err(FeatureError::invalid_parameter(
                "bocpd_max_run_length",
                "at least 1",
                0,
            ));
        }
        prior.validate()?;

        Ok(Self {
            hazard,
            max_run_length,
            prior,
            runs: Vec::new(),
        })
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if self.runs.is_empty() {
            self.runs.push(Run {
                log_prob: 0.0,
                posterior: self.prior.update(x),
            });
            return 0.0;
        }

        let log_change = self.hazard.ln() + self.prior.predictive_ln_pdf(x);
        let log_stay = (-self.hazard).ln_1p();

        let mut next = Vec::with_capacity(self.runs.len() + 1);
        next.push(Run {
            log_prob: log_change,
            posterior: self.prior.update(x),
        });
        for run in &self.runs {
            next.push(Run {
                log_prob: run.log_prob + log_stay + run.posterior.predictive_ln_pdf(x),
                posterior: run.posterior.update(x),
            });
        }

        // Keep run lengths 0..=limit: the change hypothesis plus `limit` survivors.
        if let Some(limit) = self.max_run_length {
            next.truncate(limit + 1);
        }

        let norm = log_sum_exp(next.iter().map(|r| r.log_prob));
        if !norm.is_finite() {
            // Every hypothesis assigns zero density; restart from the prior.
            self.runs = vec![Run {
                log_prob: 0.0,
                posterior: self.prior.update(x),
            }];
            return 1.0;
        }

        for run in &mut next {
            run.log_prob -= norm;
        }
        let change_probability = next[0].log_prob.exp().clamp(0.0, 1.0);
        self.runs = next;
        change_probability
    }

    /// Most probable current run length
    pub fn map_run_length(&self) -> usize {
        self.runs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.log_prob.total_cmp(&b.1.log_prob))
            .map_or(0, |(r, _)| r + 1)
    }
}

/// Change probability trace aligned index-for-index with `series`
pub fn bocpd_probabilities(
    series: &[f64],
    hazard: f64,
    max_run_length: Option<usize>,
    prior: NormalGammaPrior,
) -> FeatureResult<Vec<f64>> {
    let mut detector = OnlineChangePointDetector::new(hazard, max_run_length, prior)?;
    Ok(series.iter().map(|&x| detector.update(x)).collect())
}

fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}
