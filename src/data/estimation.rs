//! Linear relations estimated directly from the observation table
//!
//! These provide the six fixed fields of a [`ParameterSet`]: the death rates
//! from raw death counts, the treatment ratio `m` as a geometric mean of
//! `T_obs / P`, and the equilibrium fractions `phi` and `psi`. Unlike
//! [`ParameterSet::new`], inconsistencies found here are hard errors since
//! every downstream use of the estimates would be meaningless.

use serde::{Deserialize, Serialize};

use crate::data::{ObservationSeries, ParameterSet, TransitionRates};
use crate::error::StrError;

/// Default share of the treated population that ends up recovered
pub const DEFAULT_PHI: f64 = 0.5;

/// Mean death rates over a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeathRates {
    pub delta: f64,
    pub delta_s: f64,
    pub delta_n: f64,
}

/// Compartment sizes implied by the linear relations for one year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearState {
    pub year: i32,
    pub s: f64,
    pub t: f64,
    pub r: f64,
}

/// Average yearly death rates `deaths / P` over `[start, end]`
///
/// Every row in the window must carry death counts and a positive population.
pub fn estimate_death_rates(
    observations: &ObservationSeries,
    start: i32,
    end: i32,
) -> Result<DeathRates, StrError> {
    let rows = observations.require_window(start, end)?;

    let mut delta_sum = 0.0;
    let mut delta_s_sum = 0.0;
    for row in rows {
        let deaths = row.deaths().ok_or_else(|| {
            StrError::invalid_input(format!("year {} has no death counts", row.year()))
        })?;
        if row.population() <= 0.0 {
            return Err(StrError::invalid_input(format!(
                "year {} has zero population",
                row.year()
            )));
        }
        delta_sum += deaths.total / row.population();
        delta_s_sum += deaths.suicide / row.population();
    }

    let n = rows.len() as f64;
    let delta = delta_sum / n;
    let delta_s = delta_s_sum / n;
    Ok(DeathRates {
        delta,
        delta_s,
        delta_n: delta - delta_s,
    })
}

/// Geometric mean of `T_obs / P` over `[start, end]`
///
/// Years with a non-positive ratio are skipped; returns 0 when none remain.
pub fn estimate_treatment_ratio(
    observations: &ObservationSeries,
    start: i32,
    end: i32,
) -> Result<f64, StrError> {
    let rows = observations.require_window(start, end)?;

    let logs: Vec<f64> = rows
        .iter()
        .filter(|row| row.population() > 0.0)
        .map(|row| row.outcome_observed() / row.population())
        .filter(|ratio| *ratio > 0.0)
        .map(f64::ln)
        .collect();

    if logs.is_empty() {
        return Ok(0.0);
    }
    Ok((logs.iter().sum::<f64>() / logs.len() as f64).exp())
}

/// `psi = 1 - m - phi*m` for a chosen `phi`
///
/// Returns `(phi, psi)`.
pub fn equilibrium_fractions(m: f64, phi: f64) -> Result<(f64, f64), StrError> {
    if !(0.0..=1.0).contains(&phi) {
        return Err(StrError::ParameterInconsistency {
            reason: format!("phi = {} must lie in [0, 1]", phi),
        });
    }
    let psi = 1.0 - m - phi * m;
    if !(0.0..=1.0).contains(&psi) {
        return Err(StrError::ParameterInconsistency {
            reason: format!(
                "psi = 1 - m - phi*m = {:.6} is outside [0, 1] (m = {:.6}, phi = {:.6}); reduce phi or check the data",
                psi, m, phi
            ),
        });
    }
    Ok((phi, psi))
}

/// `T = m P`, `R = phi T`, `S = P - T - R` for every observed year
pub fn linear_series(observations: &ObservationSeries, m: f64, phi: f64) -> Vec<LinearState> {
    observations
        .rows()
        .iter()
        .map(|row| {
            let t = m * row.population();
            let r = phi * t;
            LinearState {
                year: row.year(),
                s: row.population() - t - r,
                t,
                r,
            }
        })
        .collect()
}

impl ParameterSet {
    /// Estimate the six fixed fields over `[start, end]` and attach `rates`
    pub fn estimate(
        observations: &ObservationSeries,
        start: i32,
        end: i32,
        phi: f64,
        rates: TransitionRates,
    ) -> Result<ParameterSet, StrError> {
        let deaths = estimate_death_rates(observations, start, end)?;
        let m = estimate_treatment_ratio(observations, start, end)?;
        let (phi, _) = equilibrium_fractions(m, phi)?;
        Ok(ParameterSet::new(
            deaths.delta,
            deaths.delta_s,
            deaths.delta_n,
            m,
            phi,
            rates,
        ))
    }
}
