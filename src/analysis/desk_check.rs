use serde::{Deserialize, Serialize};

use crate::data::{ObservationSeries, ParameterSet};
use crate::error::{ModelWarning, StrError};
use crate::simulator::{
    initial_conditions_with, InitialConditionRule, OdeOptions, Simulator, StrModel,
};

/// One year of the model-versus-observation table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeskCheckRow {
    pub year: i32,
    pub s_model: f64,
    pub t_model: f64,
    pub r_model: f64,
    /// `None` when the year has no observation
    pub t_obs: Option<f64>,
    /// `T_model - T_obs`
    pub error_abs: Option<f64>,
    /// `|error_abs / T_obs|`, `None` when `T_obs` is missing or zero
    pub error_rel: Option<f64>,
}

impl DeskCheckRow {
    fn new(year: i32, s: f64, t: f64, r: f64, t_obs: Option<f64>) -> Self {
        let error_abs = t_obs.map(|obs| t - obs);
        let error_rel = match (error_abs, t_obs) {
            (Some(err), Some(obs)) if obs != 0.0 => Some((err / obs).abs()),
            _ => None,
        };
        DeskCheckRow {
            year,
            s_model: s,
            t_model: t,
            r_model: r,
            t_obs,
            error_abs,
            error_rel,
        }
    }
}

/// Yearly comparison of a forward run against the observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeskCheck {
    rows: Vec<DeskCheckRow>,
    warnings: Vec<ModelWarning>,
}

impl DeskCheck {
    pub fn rows(&self) -> &[DeskCheckRow] {
        &self.rows
    }

    /// Warnings raised while deriving the initial state
    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn statistics(&self) -> super::FitStatistics {
        super::FitStatistics::from_rows(&self.rows)
    }
}

/// Model run from `start` to `end`, evaluated at every year and joined with
/// the observed treatment counts
pub fn desk_check(
    observations: &ObservationSeries,
    params: &ParameterSet,
    start: i32,
    end: i32,
) -> Result<DeskCheck, StrError> {
    desk_check_with(
        observations,
        params,
        start,
        end,
        InitialConditionRule::default(),
        &OdeOptions::default(),
    )
}

/// [`desk_check`] over the full observed range
pub fn desk_check_series(
    observations: &ObservationSeries,
    params: &ParameterSet,
) -> Result<DeskCheck, StrError> {
    match (observations.first_year(), observations.last_year()) {
        (Some(start), Some(end)) => desk_check(observations, params, start, end),
        _ => Err(StrError::invalid_input("observation series is empty")),
    }
}

pub fn desk_check_with(
    observations: &ObservationSeries,
    params: &ParameterSet,
    start: i32,
    end: i32,
    rule: InitialConditionRule,
    options: &OdeOptions,
) -> Result<DeskCheck, StrError> {
    if start > end {
        return Err(StrError::invalid_input(format!(
            "start year {} is after end year {}",
            start, end
        )));
    }
    let initial = initial_conditions_with(observations, params, start, rule)?;
    let model = StrModel::from_observations(*params, observations)?;
    let years: Vec<f64> = (start..=end).map(f64::from).collect();
    let trajectory = Simulator::new(&model)
        .with_options(*options)
        .evaluate_at_points(start as f64, end as f64, initial.state, &years)?;

    let rows = (start..=end)
        .zip(trajectory.iter())
        .map(|(year, point)| {
            let t_obs = observations.get(year).map(|row| row.outcome_observed());
            DeskCheckRow::new(year, point.state.s, point.state.t, point.state.r, t_obs)
        })
        .collect();

    Ok(DeskCheck {
        rows,
        warnings: initial.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_error_is_undefined_for_zero_observation() {
        let row = DeskCheckRow::new(2010, 1.0, 3.0, 1.0, Some(0.0));
        assert_eq!(row.error_abs, Some(3.0));
        assert_eq!(row.error_rel, None);

        let row = DeskCheckRow::new(2010, 1.0, 3.0, 1.0, Some(4.0));
        assert_eq!(row.error_abs, Some(-1.0));
        assert_eq!(row.error_rel, Some(0.25));
    }

    #[test]
    fn missing_observation_leaves_error_columns_empty() {
        let row = DeskCheckRow::new(2010, 1.0, 3.0, 1.0, None);
        assert_eq!(row.error_abs, None);
        assert_eq!(row.error_rel, None);
    }
}
