use argmin::core::{CostFunction, Error, Operator};

use crate::data::{ObservationSeries, ParameterSet, PopulationSeries, TransitionRates};
use crate::error::StrError;
use crate::simulator::{initial, InitialConditionRule, OdeOptions, Simulator, StrModel};

/// Residual assigned to every observation when a trial cannot be evaluated
pub const DEFAULT_SENTINEL: f64 = 1e6;

/// Outcome of evaluating one candidate `[theta, rho, beta, gamma]`
#[derive(Debug, Clone, PartialEq)]
pub enum Trial {
    /// `T_model - T_obs` at every observed year of the window
    Solved(Vec<f64>),
    /// The model could not be evaluated; `residuals` holds the sentinel
    Failed { residuals: Vec<f64>, reason: String },
}

impl Trial {
    pub fn residuals(&self) -> &[f64] {
        match self {
            Trial::Solved(residuals) => residuals,
            Trial::Failed { residuals, .. } => residuals,
        }
    }

    pub fn into_residuals(self) -> Vec<f64> {
        match self {
            Trial::Solved(residuals) => residuals,
            Trial::Failed { residuals, .. } => residuals,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, Trial::Solved(_))
    }

    /// `0.5 * sum(r^2)`
    pub fn cost(&self) -> f64 {
        0.5 * self.residuals().iter().map(|r| r * r).sum::<f64>()
    }
}

/// Residual function of the calibration over a fixed window
///
/// The base parameters, the interpolated population and the observed targets
/// are captured once; every evaluation rebuilds a [`ParameterSet`] with the
/// trial rates and runs the model from the start of the window. Evaluations
/// share nothing mutable, so the problem can be evaluated from several
/// threads at once.
#[derive(Debug, Clone)]
pub struct CalibrationProblem<'a> {
    observations: &'a ObservationSeries,
    base: ParameterSet,
    population: PopulationSeries,
    start: i32,
    end: i32,
    years: Vec<f64>,
    targets: Vec<f64>,
    rule: InitialConditionRule,
    ode: OdeOptions,
    sentinel: f64,
}

impl<'a> CalibrationProblem<'a> {
    pub fn new(
        observations: &'a ObservationSeries,
        base: ParameterSet,
        start: i32,
        end: i32,
    ) -> Result<Self, StrError> {
        let rows = observations.require_window(start, end)?;
        observations.require(start)?;
        Ok(CalibrationProblem {
            observations,
            base,
            population: PopulationSeries::from_observations(observations)?,
            start,
            end,
            years: rows.iter().map(|row| f64::from(row.year())).collect(),
            targets: rows.iter().map(|row| row.outcome_observed()).collect(),
            rule: InitialConditionRule::default(),
            ode: OdeOptions::default(),
            sentinel: DEFAULT_SENTINEL,
        })
    }

    pub fn with_ode_options(mut self, ode: OdeOptions) -> Self {
        self.ode = ode;
        self
    }

    pub fn with_initial_conditions(mut self, rule: InitialConditionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn base(&self) -> &ParameterSet {
        &self.base
    }

    /// Observed years inside the window
    pub fn years(&self) -> &[f64] {
        &self.years
    }

    /// `T_obs` at [`CalibrationProblem::years`]
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn num_residuals(&self) -> usize {
        self.targets.len()
    }

    /// Cost of residuals as large as the integrator's error allowance on each
    /// target, `0.5 * sum((atol + rtol * |T_obs|)^2)`
    ///
    /// Below this value the fit is exact up to integration error.
    pub fn tolerance_cost(&self) -> f64 {
        0.5 * self
            .targets
            .iter()
            .map(|target| (self.ode.atol + self.ode.rtol * target.abs()).powi(2))
            .sum::<f64>()
    }

    /// Base parameters with the trial rates `[theta, rho, beta, gamma]`
    pub fn params_for(&self, x: &[f64]) -> Result<ParameterSet, StrError> {
        Ok(self.base.with_rates(TransitionRates::from_slice(x)?))
    }

    pub fn evaluate(&self, x: &[f64]) -> Trial {
        match self.try_evaluate(x) {
            Ok(residuals) => Trial::Solved(residuals),
            Err(err) => {
                let reason = err.to_string();
                tracing::debug!(?x, %reason, "trial failed, using sentinel residuals");
                Trial::Failed {
                    residuals: vec![self.sentinel; self.targets.len()],
                    reason,
                }
            }
        }
    }

    fn try_evaluate(&self, x: &[f64]) -> Result<Vec<f64>, StrError> {
        let params = self.params_for(x)?;
        let ic = initial::derive(self.observations, &params, self.start, self.rule)?;
        let model = StrModel::new(params, self.population.clone());
        let trajectory = Simulator::new(&model).with_options(self.ode).evaluate_at_points(
            f64::from(self.start),
            f64::from(self.end),
            ic.state,
            &self.years,
        )?;

        let residuals: Vec<f64> = trajectory
            .iter()
            .zip(&self.targets)
            .map(|(point, target)| point.state.t - target)
            .collect();
        if let Some(r) = residuals.iter().find(|r| !r.is_finite()) {
            return Err(StrError::IntegrationFailure {
                time: f64::from(self.end),
                reason: format!("non-finite residual {}", r),
            });
        }
        Ok(residuals)
    }
}

impl Operator for CalibrationProblem<'_> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(x).into_residuals())
    }
}

impl CostFunction for CalibrationProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(x).cost())
    }
}
