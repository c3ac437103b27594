//! Matrix Profile discord and motif analytics
//!
//! The engine is chosen per call: an explicit argument wins, otherwise
//! `MATRIX_PROFILE_ENGINE` is read at call time. If the accelerated engine
//! cannot start, the naive engine runs instead and the result says so.

mod engine;

pub use engine::{
    exclusion_zone, znorm_distance, AcceleratedEngine, MatrixProfileEngine, NaiveEngine,
    ProfileEngine, ENGINE_ENV_VAR,
};

use common::{FeatureError, FeatureResult};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use engine::{euclidean, znorm};

/// Relative slack on the seed radius when collecting motif members
const MOTIF_RADIUS_SLACK: f64 = 1e-6;
const MOTIF_RADIUS_FLOOR: f64 = 1e-9;

/// Shape-anomaly metrics for one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixProfileFeatures {
    /// Largest finite profile value
    pub discord_dist: f64,
    pub discord_index: Option<usize>,
    /// Smallest finite profile value
    pub motif1_dist: f64,
    pub motif1_index: Option<usize>,
    /// Windows per motif group, seed included, best group first
    pub motif_counts: Vec<usize>,
    pub profile: Vec<f64>,
    /// Engine that produced `profile`
    pub engine: MatrixProfileEngine,
    /// True when the requested engine failed and the naive engine ran
    pub fell_back: bool,
}

/// Discord and motif metrics for `series` using subsequences of length
/// `subseq_length`.
///
/// Requires `1 < subseq_length`, `series.len() >= subseq_length + 1`,
/// `max_motifs >= 1` and finite observations.
pub fn compute_matrix_profile_metrics(
    series: &[f64],
    subseq_length: usize,
    max_motifs: usize,
    engine: Option<MatrixProfileEngine>,
) -> FeatureResult<MatrixProfileFeatures> {
    validate(series, subseq_length, max_motifs)?;
    let requested = MatrixProfileEngine::resolve(engine);
    compute_with_engine(series, subseq_length, max_motifs, requested.implementation().as_ref())
}

/// Same as [`compute_matrix_profile_metrics`] with a caller-supplied engine
pub fn compute_with_engine(
    series: &[f64],
    subseq_length: usize,
    max_motifs: usize,
    engine: &dyn ProfileEngine,
) -> FeatureResult<MatrixProfileFeatures> {
    validate(series, subseq_length, max_motifs)?;
    let m = subseq_length;
    let zone = exclusion_zone(m);

    // Very short windows always use the direct computation.
    let small_window = m < 3;
    let primary: &dyn ProfileEngine = if small_window { &NaiveEngine } else { engine };

    let (profile, used, fell_back) = match primary.profile(series, m, zone) {
        Ok(profile) => (profile, primary.kind(), false),
        Err(err) if err.is_dependency_unavailable() => {
            warn!(
                error = %err,
                requested = %primary.kind(),
                "falling back to naive matrix profile engine"
            );
            (NaiveEngine.profile(series, m, zone)?, MatrixProfileEngine::Naive, true)
        }
        Err(err) => return Err(err),
    };

    info!(
        engine = %used,
        fell_back,
        subseq_length = m,
        subsequences = profile.len(),
        "computed matrix profile"
    );

    let discord = extreme(&profile, |candidate, best| candidate > best);
    let motif = extreme(&profile, |candidate, best| candidate < best);

    let motif_counts = if small_window {
        repeated_pattern_counts(series, m, max_motifs)
    } else {
        motif_counts(series, m, zone, &profile, max_motifs)
    };

    Ok(MatrixProfileFeatures {
        discord_dist: discord.map_or(f64::NAN, |(_, d)| d),
        discord_index: discord.map(|(i, _)| i),
        motif1_dist: motif.map_or(f64::NAN, |(_, d)| d),
        motif1_index: motif.map(|(i, _)| i),
        motif_counts,
        profile,
        engine: used,
        fell_back,
    })
}

fn validate(series: &[f64], subseq_length: usize, max_motifs: usize) -> FeatureResult<()> {
    if subseq_length <= 1 {
        return Err(FeatureError::invalid_parameter(
            "subseq_length",
            "greater than 1",
            subseq_length,
        ));
    }
    if series.len() < subseq_length + 1 {
        return Err(FeatureError::invalid_parameter(
            "series length",
            format!("at least subseq_length + 1 = {}", subseq_length + 1),
            series.len(),
        ));
    }
    if max_motifs == 0 {
        return Err(FeatureError::invalid_parameter("max_motifs", "at least 1", max_motifs));
    }
    if let Some(idx) = series.iter().position(|x| !x.is_finite()) {
        return Err(FeatureError::invalid_value("series", idx, "observation is not finite"));
    }
    Ok(())
}

/// First index whose finite value beats every other under `better`
fn extreme(profile: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<(usize, f64)> {
    profile
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, d)| d.is_finite())
        .fold(None, |best, (i, d)| match best {
            Some((_, b)) if !better(d, b) => best,
            _ => Some((i, d)),
        })
}

/// Greedy motif grouping.
///
/// Seeds are visited in ascending profile order. Each seed collects every
/// unused window outside its exclusion zone within `profile[seed]` (plus a
/// small slack); groups of one are discarded.
fn motif_counts(
    series: &[f64],
    m: usize,
    zone: usize,
    profile: &[f64],
    max_motifs: usize,
) -> Vec<usize> {
    let normalized: Vec<Vec<f64>> = series.windows(m).map(znorm).collect();

    let mut seeds: Vec<usize> = (0..profile.len()).filter(|&i| profile[i].is_finite()).collect();
    seeds.sort_by(|&a, &b| profile[a].total_cmp(&profile[b]).then(a.cmp(&b)));

    let mut used = vec![false; profile.len()];
    let mut counts = Vec::new();

    for seed in seeds {
        if counts.len() >= max_motifs {
            break;
        }
        if used[seed] {
            continue;
        }

        let radius = profile[seed].max(0.0);
        let limit = radius + (radius * MOTIF_RADIUS_SLACK).max(MOTIF_RADIUS_FLOOR);

        let mut members = vec![seed];
        for candidate in 0..profile.len() {
            if used[candidate] || candidate.abs_diff(seed) <= zone {
                continue;
            }
            if euclidean(&normalized[seed], &normalized[candidate]) <= limit {
                members.push(candidate);
            }
        }

        if members.len() > 1 {
            for &member in &members {
                used[member] = true;
            }
            counts.push(members.len());
        }
    }

    counts
}

/// Exact repeat counts of length-`m` patterns, most frequent first
fn repeated_pattern_counts(series: &[f64], m: usize, max_motifs: usize) -> Vec<usize> {
    let mut patterns: HashMap<Vec<u64>, usize> = HashMap::new();
    for window in series.windows(m) {
        // `+ 0.0` folds -0.0 into 0.0
        let key = window.iter().map(|x| (x + 0.0).to_bits()).collect();
        *patterns.entry(key).or_default() += 1;
    }

    let mut counts: Vec<usize> = patterns.into_values().filter(|&c| c > 1).collect();
    counts.sort_unstable_by(|a, b| b.cmp(a));
    counts.truncate(max_motifs);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableEngine;

    impl ProfileEngine for UnavailableEngine {
        fn kind(&self) -> MatrixProfileEngine {
            MatrixProfileEngine::Accelerated
        }

        fn profile(&self, _: &[f64], _: usize, _: usize) -> FeatureResult<Vec<f64>> {
            Err(FeatureError::unavailable("test engine", "not compiled"))
        }
    }

    fn noise(len: usize, seed: u64) -> Vec<f64> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..len).map(|_| rng.f64() * 2.0 - 1.0).collect()
    }

    fn planted_series() -> Vec<f64> {
        let mut series = noise(200, 23);
        let pattern: Vec<f64> = (0..16)
            .map(|i| 3.0 * (i as f64 * std::f64::consts::PI / 4.0).sin() + 0.2 * i as f64)
            .collect();
        series[20..36].copy_from_slice(&pattern);
        series[120..136].copy_from_slice(&pattern);
        series
    }

    #[test]
    fn test_repeated_patterns_small_window() {
        let series = [1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0];
        let features =
            compute_matrix_profile_metrics(&series, 2, 2, Some(MatrixProfileEngine::Accelerated))
                .unwrap();

        assert_eq!(features.motif_counts, vec![3, 2]);
        assert!(features.motif1_dist.abs() < 1e-12);
        assert_eq!(features.engine, MatrixProfileEngine::Naive);
        assert!(!features.fell_back);
    }

    #[test]
    fn test_discord_is_profile_maximum() {
        let series = noise(64, 5);
        let features =
            compute_matrix_profile_metrics(&series, 8, 3, Some(MatrixProfileEngine::Naive))
                .unwrap();

        let finite = || features.profile.iter().copied().filter(|d| d.is_finite());
        let max = finite().fold(f64::MIN, f64::max);
        let min = finite().fold(f64::MAX, f64::min);
        assert_eq!(features.discord_dist, max);
        assert_eq!(features.motif1_dist, min);
        assert_eq!(features.profile[features.discord_index.unwrap()], max);
        assert!(features.discord_dist >= features.motif1_dist);
    }

    #[test]
    fn test_naive_matches_pairwise_definition() {
        let series = noise(40, 9);
        let m = 6;
        let zone = exclusion_zone(m);
        let features =
            compute_matrix_profile_metrics(&series, m, 1, Some(MatrixProfileEngine::Naive))
                .unwrap();

        let count = series.len() - m + 1;
        for i in 0..count {
            let expected = (0..count)
                .filter(|j| j.abs_diff(i) > zone)
                .map(|j| znorm_distance(&series[i..i + m], &series[j..j + m]))
                .fold(f64::INFINITY, f64::min);
            assert!((features.profile[i] - expected).abs() < 1e-12);
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_engines_agree() {
        let series = noise(160, 41);
        let naive =
            compute_matrix_profile_metrics(&series, 12, 3, Some(MatrixProfileEngine::Naive))
                .unwrap();
        let fast =
            compute_matrix_profile_metrics(&series, 12, 3, Some(MatrixProfileEngine::Accelerated))
                .unwrap();

        assert_eq!(fast.engine, MatrixProfileEngine::Accelerated);
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0);
        assert!(close(naive.discord_dist, fast.discord_dist));
        assert!(close(naive.motif1_dist, fast.motif1_dist));
        for (a, b) in naive.profile.iter().zip(&fast.profile) {
            assert!(close(*a, *b), "{a} vs {b}");
        }
    }

    #[test]
    fn test_planted_motif_found_by_both_engines() {
        let series = planted_series();
        for engine in [MatrixProfileEngine::Naive, MatrixProfileEngine::Accelerated] {
            let features = compute_matrix_profile_metrics(&series, 16, 2, Some(engine)).unwrap();
            let index = features.motif1_index.unwrap();
            assert!(index == 20 || index == 120, "{engine}: motif at {index}");
            assert!(features.motif1_dist < 1e-6);
            assert!(features.motif_counts[0] >= 2);
        }
    }

    #[test]
    fn test_unavailable_engine_falls_back() {
        let series = planted_series();
        let features = compute_with_engine(&series, 16, 2, &UnavailableEngine).unwrap();
        let naive = compute_with_engine(&series, 16, 2, &NaiveEngine).unwrap();

        assert!(features.fell_back);
        assert_eq!(features.engine, MatrixProfileEngine::Naive);
        assert_eq!(features.profile, naive.profile);
    }

    #[test]
    fn test_flat_series_stays_finite() {
        let series = vec![5.0; 30];
        let features =
            compute_matrix_profile_metrics(&series, 8, 3, Some(MatrixProfileEngine::Naive))
                .unwrap();
        assert_eq!(features.discord_dist, 0.0);
        assert_eq!(features.motif1_dist, 0.0);
        assert!(features.profile.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn test_single_subsequence_has_no_neighbours() {
        let series = [1.0, 2.0, 4.0, 3.0];
        let features =
            compute_matrix_profile_metrics(&series, 3, 1, Some(MatrixProfileEngine::Naive))
                .unwrap();
        assert!(features.discord_dist.is_nan());
        assert!(features.discord_index.is_none());
        assert!(features.motif_counts.is_empty());
    }

    #[test]
    fn test_parameter_bounds() {
        let series = noise(20, 1);
        assert!(compute_matrix_profile_metrics(&series, 1, 3, None).is_err());
        assert!(compute_matrix_profile_metrics(&series, 20, 3, None).is_err());
        assert!(compute_matrix_profile_metrics(&series, 4, 0, None).is_err());

        let err = compute_matrix_profile_metrics(&series[..4], 4, 1, None).unwrap_err();
        assert!(err.to_string().contains("at least subseq_length + 1 = 5"));

        let mut bad = series.clone();
        bad[3] = f64::NAN;
        assert!(compute_matrix_profile_metrics(&bad, 4, 1, None).is_err());
    }

    #[test]
    fn test_repeat_calls_are_identical() {
        let series = noise(80, 3);
        let engine = Some(MatrixProfileEngine::Accelerated);
        let a = compute_matrix_profile_metrics(&series, 8, 3, engine).unwrap();
        let b = compute_matrix_profile_metrics(&series, 8, 3, engine).unwrap();
        assert_eq!(a, b);
    }
}
