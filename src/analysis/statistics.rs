use std::fmt;

use serde::{Deserialize, Serialize};

use super::desk_check::{desk_check, DeskCheckRow};
use crate::data::{ObservationSeries, ParameterSet};
use crate::error::StrError;

/// Goodness-of-fit of `T_model` against `T_obs`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitStatistics {
    pub r_squared: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error over non-zero observations
    pub mape: f64,
    pub n_obs: usize,
}

impl FitStatistics {
    /// Metrics over the rows carrying an observation
    pub fn from_rows(rows: &[DeskCheckRow]) -> Self {
        let (observed, predicted): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .filter_map(|row| row.t_obs.map(|obs| (obs, row.t_model)))
            .unzip();
        Self::compute(&observed, &predicted)
    }

    /// Metrics over matching observed and predicted values
    ///
    /// Returns all zeros when there is nothing to compare.
    ///
    /// # Errors
    ///
    /// [`StrError::InvalidInput`] when the slices differ in length.
    pub fn from_pairs(observed: &[f64], predicted: &[f64]) -> Result<Self, StrError> {
        if observed.len() != predicted.len() {
            return Err(StrError::invalid_input(format!(
                "{} observed values but {} predicted values",
                observed.len(),
                predicted.len()
            )));
        }
        Ok(Self::compute(observed, predicted))
    }

    fn compute(observed: &[f64], predicted: &[f64]) -> Self {
        let n = observed.len();
        if n == 0 {
            return FitStatistics::default();
        }
        let nf = n as f64;

        let mean = observed.iter().sum::<f64>() / nf;
        let ss_res: f64 = observed
            .iter()
            .zip(predicted)
            .map(|(o, p)| (o - p).powi(2))
            .sum();
        let ss_tot: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
        let r_squared = if ss_tot != 0.0 {
            1.0 - ss_res / ss_tot
        } else {
            0.0
        };
        let mse = ss_res / nf;
        let mae = observed
            .iter()
            .zip(predicted)
            .map(|(o, p)| (o - p).abs())
            .sum::<f64>()
            / nf;

        let relative: Vec<f64> = observed
            .iter()
            .zip(predicted)
            .filter(|(o, _)| **o != 0.0)
            .map(|(o, p)| ((o - p) / o).abs())
            .collect();
        let mape = if relative.is_empty() {
            0.0
        } else {
            relative.iter().sum::<f64>() / relative.len() as f64 * 100.0
        };

        FitStatistics {
            r_squared,
            mse,
            rmse: mse.sqrt(),
            mae,
            mape,
            n_obs: n,
        }
    }
}

impl fmt::Display for FitStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "R2    = {:.6}", self.r_squared)?;
        writeln!(f, "MSE   = {:.6}", self.mse)?;
        writeln!(f, "RMSE  = {:.6}", self.rmse)?;
        writeln!(f, "MAE   = {:.6}", self.mae)?;
        writeln!(f, "MAPE  = {:.4}%", self.mape)?;
        write!(f, "n_obs = {}", self.n_obs)
    }
}

/// Desk check over `[start, end]` reduced to fit metrics
pub fn calculate_statistics(
    observations: &ObservationSeries,
    params: &ParameterSet,
    start: i32,
    end: i32,
) -> Result<FitStatistics, StrError> {
    Ok(desk_check(observations, params, start, end)?.statistics())
}
