//! Projected gradient ascent with backtracking line search

/// Halvings tried before an iteration is declared stuck
pub const MAX_BACKTRACK_STEPS: usize = 12;

/// Largest branching ratio a proposal may carry
pub const BRANCHING_RATIO_CEILING: f64 = 0.995;

/// A proposal may lose this much objective value and still be accepted
const ACCEPT_SLACK: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AscentOptions {
    pub max_iter: usize,
    /// Converged once no coordinate moves more than this
    pub tol: f64,
    pub initial_step: f64,
    pub max_step: f64,
}

impl Default for AscentOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-6,
            initial_step: 0.1,
            max_step: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AscentOutcome<const N: usize> {
    pub params: [f64; N],
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Maximize `objective` from `start`.
///
/// `objective` returns the value and gradient, or `None` where undefined.
/// Every proposal passes through `project` before evaluation. A step that
/// fails to improve is halved up to [`MAX_BACKTRACK_STEPS`] times; if none
/// succeeds the search stops with `converged = false` at the last accepted
/// point. Accepted steps double the trial step up to `max_step`.
pub fn maximize<const N: usize, F, P>(
    start: [f64; N],
    mut objective: F,
    project: P,
    options: &AscentOptions,
) -> AscentOutcome<N>
where
    F: FnMut(&[f64; N]) -> Option<(f64, [f64; N])>,
    P: Fn([f64; N]) -> [f64; N],
{
    let mut params = project(start);
    let (mut value, mut grad) = match objective(&params) {
        Some((v, g)) if v.is_finite() => (v, g),
        _ => {
            return AscentOutcome {
                params,
                value: f64::NAN,
                converged: false,
                iterations: 0,
            }
        }
    };

    let mut step = options.initial_step;
    for iteration in 1..=options.max_iter {
        let mut accepted = None;
        let mut trial = step;

        for _ in 0..MAX_BACKTRACK_STEPS {
            let mut candidate = params;
            for (c, g) in candidate.iter_mut().zip(&grad) {
                *c += trial * g;
            }
            let candidate = project(candidate);

            if let Some((v, g)) = objective(&candidate) {
                let finite = v.is_finite() && g.iter().all(|x| x.is_finite());
                if finite && v >= value - ACCEPT_SLACK * (1.0 + value.abs()) {
                    accepted = Some((candidate, v, g));
                    break;
                }
            }
            trial *= 0.5;
        }

        let Some((candidate, v, g)) = accepted else {
            return AscentOutcome {
                params,
                value,
                converged: false,
                iterations: iteration,
            };
        };

        let shift = params
            .iter()
            .zip(&candidate)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);

        params = candidate;
        value = v;
        grad = g;
        step = (trial * 2.0).min(options.max_step);

        if shift < options.tol {
            return AscentOutcome {
                params,
                value,
                converged: true,
                iterations: iteration,
            };
        }
    }

    AscentOutcome {
        params,
        value,
        converged: false,
        iterations: options.max_iter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concave_quadratic_converges() {
        // f(x, y) = -(x - 1)^2 - 2(y + 0.5)^2
        let objective = |p: &[f64; 2]| {
            let value = -(p[0] - 1.0).powi(2) - 2.0 * (p[1] + 0.5).powi(2);
            Some((value, [-2.0 * (p[0] - 1.0), -4.0 * (p[1] + 0.5)]))
        };
        let outcome = maximize([0.0, 0.0], objective, |p| p, &AscentOptions::default());

        assert!(outcome.converged);
        assert!((outcome.params[0] - 1.0).abs() < 1e-4);
        assert!((outcome.params[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_projection_is_respected() {
        let objective = |p: &[f64; 1]| Some((p[0], [1.0]));
        let outcome = maximize([0.0], objective, |p| [p[0].min(2.0)], &AscentOptions::default());
        assert!(outcome.converged);
        assert_eq!(outcome.params[0], 2.0);
    }

    #[test]
    fn test_stalled_search_reports_not_converged() {
        // The gradient points uphill but every move lowers the value.
        let objective = |p: &[f64; 1]| {
            let value = if p[0] == 0.0 { 0.0 } else { -1.0 };
            Some((value, [1.0]))
        };
        let outcome = maximize([0.0], objective, |p| p, &AscentOptions::default());
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.params, [0.0]);
    }

    #[test]
    fn test_undefined_start() {
        let outcome = maximize([0.0], |_: &[f64; 1]| None, |p| p, &AscentOptions::default());
        assert!(!outcome.converged);
        assert!(outcome.value.is_nan());
    }

    #[test]
    fn test_iteration_cap() {
        let objective = |p: &[f64; 1]| Some((p[0], [1.0]));
        let options = AscentOptions {
            max_iter: 5,
            ..Default::default()
        };
        let outcome = maximize([0.0], objective, |p| p, &options);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 5);
    }
}
