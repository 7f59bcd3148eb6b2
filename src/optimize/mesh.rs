//! Coarse grid search over `theta` and `gamma`

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::TransitionRates;
use crate::error::StrError;
use crate::optimize::calibration::Progress;
use crate::optimize::objective::CalibrationProblem;

/// One evaluated grid point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshPoint {
    pub rates: TransitionRates,
    pub cost: f64,
    /// `false` when the trial fell back to the sentinel residuals
    pub solved: bool,
}

/// All grid points in row-major `(theta, gamma)` order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSearch {
    points: Vec<MeshPoint>,
    best: usize,
}

impl MeshSearch {
    pub fn points(&self) -> &[MeshPoint] {
        &self.points
    }

    /// Lowest-cost point; ties go to the first in grid order
    pub fn best(&self) -> &MeshPoint {
        &self.points[self.best]
    }
}

/// `n` evenly spaced values over `[lower, upper]`; the midpoint when `n == 1`
fn axis(lower: f64, upper: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![0.5 * (lower + upper)];
    }
    let step = (upper - lower) / (n - 1) as f64;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                upper
            } else {
                lower + i as f64 * step
            }
        })
        .collect()
}

pub(crate) struct MeshGrid {
    pub theta: (f64, f64, usize),
    pub gamma: (f64, f64, usize),
    /// `rho` and `beta` held at these values
    pub rho: f64,
    pub beta: f64,
}

pub(crate) fn search(
    problem: &CalibrationProblem<'_>,
    grid: &MeshGrid,
    parallel: bool,
    progress: Option<&(dyn Fn(Progress) + Sync)>,
) -> Result<MeshSearch, StrError> {
    let (theta_lo, theta_hi, n_theta) = grid.theta;
    let (gamma_lo, gamma_hi, n_gamma) = grid.gamma;
    if n_theta == 0 || n_gamma == 0 {
        return Err(StrError::invalid_input(
            "mesh needs at least one point per axis",
        ));
    }
    if [theta_lo, theta_hi, gamma_lo, gamma_hi]
        .iter()
        .any(|b| !b.is_finite())
    {
        return Err(StrError::invalid_input(
            "mesh search needs finite bounds for theta and gamma",
        ));
    }

    let candidates: Vec<TransitionRates> = axis(theta_lo, theta_hi, n_theta)
        .into_iter()
        .flat_map(|theta| {
            axis(gamma_lo, gamma_hi, n_gamma)
                .into_iter()
                .map(move |gamma| TransitionRates::new(theta, grid.rho, grid.beta, gamma))
        })
        .collect();

    let total = candidates.len();
    let completed = AtomicUsize::new(0);
    let evaluate = |rates: &TransitionRates| {
        let trial = problem.evaluate(&rates.to_array());
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        // report every 5%
        if let Some(report) = progress {
            if done * 20 / total > (done - 1) * 20 / total {
                report(Progress::Mesh {
                    completed: done,
                    total,
                });
            }
        }
        MeshPoint {
            rates: *rates,
            cost: trial.cost(),
            solved: trial.is_solved(),
        }
    };

    let points: Vec<MeshPoint> = if parallel {
        candidates.par_iter().map(evaluate).collect()
    } else {
        candidates.iter().map(evaluate).collect()
    };

    let best = points
        .iter()
        .enumerate()
        .fold(0, |best, (i, point)| {
            if point.cost < points[best].cost {
                i
            } else {
                best
            }
        });
    tracing::debug!(
        total,
        best_cost = points[best].cost,
        theta = points[best].rates.theta,
        gamma = points[best].rates.gamma,
        "mesh search finished"
    );

    Ok(MeshSearch { points, best })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_spans_the_interval() {
        assert_eq!(axis(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(axis(0.0, 20.0, 1), vec![10.0]);
    }
}
