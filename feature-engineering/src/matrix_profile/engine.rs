//! Interchangeable Matrix Profile engines

use common::{FeatureError, FeatureResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Environment variable holding the process-wide engine default
pub const ENGINE_ENV_VAR: &str = "MATRIX_PROFILE_ENGINE";

/// Relative standard deviation below which a subsequence is flat
const FLAT_TOLERANCE: f64 = 1e-12;

/// `1 - rho` below which a pair is recomputed directly; the correlation
/// form loses precision for near-identical windows
#[cfg(feature = "parallel")]
const NEAR_MATCH: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixProfileEngine {
    /// Pairwise z-normalized distances, single threaded
    Naive,
    /// Sliding dot products along diagonals on a thread pool
    #[default]
    #[serde(alias = "parallel")]
    Accelerated,
}

impl MatrixProfileEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Accelerated => "accelerated",
        }
    }

    /// Parse an engine name, warning and using the accelerated engine for
    /// anything unrecognised
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!(value = %name, "unknown matrix profile engine, using accelerated");
            Self::Accelerated
        })
    }

    /// Explicit choice wins; otherwise read `MATRIX_PROFILE_ENGINE` now
    pub fn resolve(explicit: Option<Self>) -> Self {
        match explicit {
            Some(engine) => engine,
            None => match std::env::var(ENGINE_ENV_VAR) {
                Ok(value) if !value.trim().is_empty() => Self::from_name(&value),
                _ => Self::default(),
            },
        }
    }

    pub fn implementation(&self) -> Box<dyn ProfileEngine> {
        match self {
            Self::Naive => Box::new(NaiveEngine),
            Self::Accelerated => Box::new(AcceleratedEngine),
        }
    }
}

impl FromStr for MatrixProfileEngine {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(Self::Naive),
            "accelerated" | "parallel" => Ok(Self::Accelerated),
            other => Err(FeatureError::invalid_parameter(
                "engine",
                "one of naive, accelerated",
                other,
            )),
        }
    }
}

impl fmt::Display for MatrixProfileEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes a Matrix Profile: for every subsequence of length `m`, the
/// z-normalized distance to its nearest neighbour outside the exclusion zone.
/// Subsequences without an admissible neighbour report `f64::INFINITY`.
pub trait ProfileEngine {
    fn kind(&self) -> MatrixProfileEngine;

    fn profile(&self, series: &[f64], m: usize, exclusion_zone: usize) -> FeatureResult<Vec<f64>>;
}

/// Number of length-`m` subsequences, or an error when there are none
fn subsequence_count(series: &[f64], m: usize) -> FeatureResult<usize> {
    if m == 0 {
        return Err(FeatureError::invalid_parameter("subseq_length", "at least 1", m));
    }
    if m > series.len() {
        return Err(FeatureError::invalid_parameter(
            "subseq_length",
            format!("at most the series length {}", series.len()),
            m,
        ));
    }
    Ok(series.len() + 1 - m)
}

/// Half-width of the trivial-match zone: pairs with `|i - j| <= zone` are skipped
pub fn exclusion_zone(m: usize) -> usize {
    m.div_ceil(4).max(1)
}

/// Mean and population standard deviation of one subsequence
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowStats {
    pub mean: f64,
    pub std: f64,
}

impl WindowStats {
    pub fn of(window: &[f64]) -> Self {
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.std <= FLAT_TOLERANCE * (1.0 + self.mean.abs())
    }
}

/// Z-normalize a subsequence; flat windows map to the zero vector
pub(crate) fn znorm(window: &[f64]) -> Vec<f64> {
    let stats = WindowStats::of(window);
    if stats.is_flat() {
        vec![0.0; window.len()]
    } else {
        window.iter().map(|x| (x - stats.mean) / stats.std).collect()
    }
}

pub(crate) fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Z-normalized Euclidean distance between two subsequences
pub fn znorm_distance(a: &[f64], b: &[f64]) -> f64 {
    euclidean(&znorm(a), &znorm(b))
}

/// Direct pairwise computation
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveEngine;

impl ProfileEngine for NaiveEngine {
    fn kind(&self) -> MatrixProfileEngine {
        MatrixProfileEngine::Naive
    }

    fn profile(&self, series: &[f64], m: usize, exclusion_zone: usize) -> FeatureResult<Vec<f64>> {
        let count = subsequence_count(series, m)?;
        let normalized: Vec<Vec<f64>> = series.windows(m).map(znorm).collect();
        let mut profile = vec![f64::INFINITY; count];

        for i in 0..count {
            for j in (i + exclusion_zone + 1)..count {
                let d = euclidean(&normalized[i], &normalized[j]);
                if d < profile[i] {
                    profile[i] = d;
                }
                if d < profile[j] {
                    profile[j] = d;
                }
            }
        }

        Ok(profile)
    }
}

/// Diagonal traversal with incrementally updated dot products, one diagonal
/// per task. Distances come from the Pearson correlation of each pair:
/// `d = sqrt(2m(1 - rho))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceleratedEngine;

impl ProfileEngine for AcceleratedEngine {
    fn kind(&self) -> MatrixProfileEngine {
        MatrixProfileEngine::Accelerated
    }

    #[cfg(feature = "parallel")]
    fn profile(&self, series: &[f64], m: usize, exclusion_zone: usize) -> FeatureResult<Vec<f64>> {
        use rayon::prelude::*;

        subsequence_count(series, m)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|e| FeatureError::unavailable("accelerated matrix profile engine", e))?;

        // Centering does not change z-normalized distances but keeps the
        // dot products well conditioned.
        let offset = series.iter().sum::<f64>() / series.len() as f64;
        let centered: Vec<f64> = series.iter().map(|x| x - offset).collect();
        let stats: Vec<WindowStats> = centered.windows(m).map(WindowStats::of).collect();
        let count = stats.len();

        let profile = pool.install(|| {
            ((exclusion_zone + 1)..count)
                .into_par_iter()
                .fold(
                    || vec![f64::INFINITY; count],
                    |mut acc, k| {
                        scan_diagonal(&centered, &stats, m, k, &mut acc);
                        acc
                    },
                )
                .reduce(
                    || vec![f64::INFINITY; count],
                    |mut a, b| {
                        for (x, y) in a.iter_mut().zip(b) {
                            if y < *x {
                                *x = y;
                            }
                        }
                        a
                    },
                )
        });

        Ok(profile)
    }

    #[cfg(not(feature = "parallel"))]
    fn profile(&self, series: &[f64], m: usize, _exclusion_zone: usize) -> FeatureResult<Vec<f64>> {
        subsequence_count(series, m)?;
        Err(FeatureError::unavailable(
            "accelerated matrix profile engine",
            "crate built without the `parallel` feature",
        ))
    }
}

/// Walk the pairs `(i, i + k)` and fold their distances into `acc`
#[cfg(feature = "parallel")]
fn scan_diagonal(series: &[f64], stats: &[WindowStats], m: usize, k: usize, acc: &mut [f64]) {
    let count = stats.len();
    let mf = m as f64;
    let mut dot: f64 = series[..m].iter().zip(&series[k..k + m]).map(|(a, b)| a * b).sum();

    for i in 0..(count - k) {
        let j = i + k;
        if i > 0 {
            dot += series[i + m - 1] * series[j + m - 1] - series[i - 1] * series[j - 1];
        }

        let (a, b) = (stats[i], stats[j]);
        let d = match (a.is_flat(), b.is_flat()) {
            (true, true) => 0.0,
            (true, false) | (false, true) => mf.sqrt(),
            (false, false) => {
                let rho =
                    ((dot - mf * a.mean * b.mean) / (mf * a.std * b.std)).clamp(-1.0, 1.0);
                if 1.0 - rho < NEAR_MATCH {
                    znorm_distance(&series[i..i + m], &series[j..j + m])
                } else {
                    (2.0 * mf * (1.0 - rho)).sqrt()
                }
            }
        };

        if d < acc[i] {
            acc[i] = d;
        }
        if d < acc[j] {
            acc[j] = d;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names() {
        assert_eq!(
            "naive".parse::<MatrixProfileEngine>().unwrap(),
            MatrixProfileEngine::Naive
        );
        assert_eq!(
            " Parallel ".parse::<MatrixProfileEngine>().unwrap(),
            MatrixProfileEngine::Accelerated
        );
        assert!("numba".parse::<MatrixProfileEngine>().is_err());
        assert_eq!(MatrixProfileEngine::from_name("gpu"), MatrixProfileEngine::Accelerated);
    }

    #[test]
    fn test_explicit_engine_wins() {
        assert_eq!(
            MatrixProfileEngine::resolve(Some(MatrixProfileEngine::Naive)),
            MatrixProfileEngine::Naive
        );
    }

    #[test]
    fn test_environment_default_read_per_call() {
        use crate::matrix_profile::compute_matrix_profile_metrics;

        let series: Vec<f64> = (0..40)
            .map(|i| (i as f64 * 0.9).sin() + 0.01 * i as f64)
            .collect();

        std::env::set_var(ENGINE_ENV_VAR, "naive");
        assert_eq!(MatrixProfileEngine::resolve(None), MatrixProfileEngine::Naive);
        let naive = compute_matrix_profile_metrics(&series, 6, 2, None).unwrap();

        std::env::set_var(ENGINE_ENV_VAR, "accelerated");
        assert_eq!(MatrixProfileEngine::resolve(None), MatrixProfileEngine::Accelerated);
        let fast = compute_matrix_profile_metrics(&series, 6, 2, None).unwrap();

        std::env::remove_var(ENGINE_ENV_VAR);
        assert_eq!(MatrixProfileEngine::resolve(None), MatrixProfileEngine::Accelerated);

        assert_eq!(naive.engine, MatrixProfileEngine::Naive);
        assert!(!naive.fell_back);
        if cfg!(feature = "parallel") {
            assert_eq!(fast.engine, MatrixProfileEngine::Accelerated);
            assert!(!fast.fell_back);
        } else {
            assert_eq!(fast.engine, MatrixProfileEngine::Naive);
            assert!(fast.fell_back);
        }
    }

    #[test]
    fn test_profile_rejects_bad_window_length() {
        let series = [1.0, 2.0, 3.0];
        assert!(NaiveEngine.profile(&series, 0, 1).is_err());
        assert!(NaiveEngine.profile(&series, 4, 1).is_err());
        assert!(AcceleratedEngine.profile(&series, 0, 1).is_err());
        assert!(AcceleratedEngine.profile(&series, 4, 1).is_err());
        assert_eq!(NaiveEngine.profile(&series, 3, 1).unwrap(), vec![f64::INFINITY]);
    }

    #[test]
    fn test_exclusion_zone() {
        assert_eq!(exclusion_zone(2), 1);
        assert_eq!(exclusion_zone(4), 1);
        assert_eq!(exclusion_zone(5), 2);
        assert_eq!(exclusion_zone(32), 8);
    }

    #[test]
    fn test_flat_window_distance() {
        let flat = [0.1, 0.1, 0.1, 0.1];
        let ramp = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(znorm_distance(&flat, &flat), 0.0);
        assert!((znorm_distance(&flat, &ramp) - 2.0).abs() < 1e-12);
        assert!(znorm_distance(&ramp, &[10.0, 20.0, 30.0, 40.0]) < 1e-12);
    }

    #[test]
    fn test_naive_profile_small_series() {
        let series = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let profile = NaiveEngine.profile(&series, 2, 1).unwrap();
        assert_eq!(profile.len(), 5);
        assert!(profile.iter().all(|d| d.abs() < 1e-12));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_engines_agree_with_flat_segments() {
        let mut series = vec![0.0; 12];
        series.extend([1.0, 3.0, 2.0, 5.0, 4.0, 4.0, 4.0, 4.0, 4.0, 1.0, 0.5, 2.5]);
        let naive = NaiveEngine.profile(&series, 4, 1).unwrap();
        let fast = AcceleratedEngine.profile(&series, 4, 1).unwrap();
        for (a, b) in naive.iter().zip(&fast) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }
}
