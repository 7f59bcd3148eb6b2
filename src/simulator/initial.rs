//! Initial state of the model at the start of a window

use serde::{Deserialize, Serialize};

use crate::data::{ObservationSeries, ParameterSet};
use crate::error::{Compartment, ModelWarning, StrError};
use crate::simulator::model::State;

/// How the treatment compartment is seeded at the start year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitialConditionRule {
    /// `T0 = m * P0`
    #[default]
    TreatmentRatio,
    /// `T0 = T_obs(t0)`
    Observed,
}

/// State at the start year together with the warnings raised deriving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditions {
    pub year: i32,
    /// Vulnerable population `P0` at `year`
    pub population: f64,
    pub state: State,
    pub warnings: Vec<ModelWarning>,
}

impl InitialConditions {
    /// `true` when no compartment had to be clamped
    pub fn is_unclamped(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, ModelWarning::NegativeStateClamped { .. }))
    }
}

/// `T0 = m*P0`, `R0 = phi*T0`, `S0 = P0 - T0 - R0`
///
/// Negative components are set to zero and reported as
/// [`ModelWarning::NegativeStateClamped`]; warnings are also logged.
pub fn initial_conditions(
    observations: &ObservationSeries,
    params: &ParameterSet,
    year: i32,
) -> Result<InitialConditions, StrError> {
    initial_conditions_with(
        observations,
        params,
        year,
        InitialConditionRule::TreatmentRatio,
    )
}

pub fn initial_conditions_with(
    observations: &ObservationSeries,
    params: &ParameterSet,
    year: i32,
    rule: InitialConditionRule,
) -> Result<InitialConditions, StrError> {
    let ic = derive(observations, params, year, rule)?;
    for warning in &ic.warnings {
        warning.emit();
    }
    Ok(ic)
}

/// Same as [`initial_conditions_with`] without logging, for repeated trials
pub(crate) fn derive(
    observations: &ObservationSeries,
    params: &ParameterSet,
    year: i32,
    rule: InitialConditionRule,
) -> Result<InitialConditions, StrError> {
    let row = observations.require(year)?;
    let p0 = row.population();
    let t0 = match rule {
        InitialConditionRule::TreatmentRatio => params.m * p0,
        InitialConditionRule::Observed => row.outcome_observed(),
    };
    let r0 = params.phi * t0;
    let s0 = p0 - t0 - r0;

    let mut warnings = Vec::new();
    let mut clamp = |compartment: Compartment, value: f64| {
        if value < 0.0 {
            warnings.push(ModelWarning::NegativeStateClamped {
                compartment,
                year,
                value,
            });
            0.0
        } else {
            value
        }
    };
    let state = State::new(
        clamp(Compartment::Susceptible, s0),
        clamp(Compartment::Treatment, t0),
        clamp(Compartment::Recovered, r0),
    );

    Ok(InitialConditions {
        year,
        population: p0,
        state,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TransitionRates;
    use approx::assert_relative_eq;

    fn observations() -> ObservationSeries {
        ObservationSeries::builder()
            .observation(2010, 100_000.0, 500.0)
            .observation(2011, 101_000.0, 520.0)
            .observation(2012, 102_000.0, 540.0)
            .build()
            .unwrap()
    }

    fn params(m: f64, phi: f64) -> ParameterSet {
        ParameterSet::new(0.006, 0.00006, 0.00594, m, phi, TransitionRates::default())
    }

    #[test]
    fn derives_state_from_treatment_ratio() {
        let ic = initial_conditions(&observations(), &params(0.005, 0.5), 2010).unwrap();
        assert_relative_eq!(ic.state.t, 500.0, max_relative = 1e-12);
        assert_relative_eq!(ic.state.r, 250.0, max_relative = 1e-12);
        assert_relative_eq!(ic.state.s, 99_250.0, max_relative = 1e-12);
        assert!(ic.warnings.is_empty());
        assert!((ic.state.total() - ic.population).abs() < 1e-9);
    }

    #[test]
    fn missing_start_year_is_an_error() {
        let result = initial_conditions(&observations(), &params(0.005, 0.5), 2009);
        assert!(matches!(result, Err(StrError::MissingYear { year: 2009 })));
    }

    #[test]
    fn negative_susceptible_is_clamped_and_flagged() {
        // T0 = 0.8 P0, R0 = 0.4 P0 => S0 = -0.2 P0
        let ic = initial_conditions(&observations(), &params(0.8, 0.5), 2011).unwrap();
        assert_eq!(ic.state.s, 0.0);
        assert!(!ic.is_unclamped());
        assert!(matches!(
            ic.warnings.as_slice(),
            [ModelWarning::NegativeStateClamped {
                compartment: Compartment::Susceptible,
                year: 2011,
                ..
            }]
        ));
    }

    #[test]
    fn observed_rule_seeds_treatment_from_data() {
        let ic = initial_conditions_with(
            &observations(),
            &params(0.01, 0.5),
            2012,
            InitialConditionRule::Observed,
        )
        .unwrap();
        assert_eq!(ic.state.t, 540.0);
        assert_eq!(ic.state.r, 270.0);
        assert_relative_eq!(ic.state.s, 102_000.0 - 810.0);
    }
}
