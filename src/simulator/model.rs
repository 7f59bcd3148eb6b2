use serde::{Deserialize, Serialize};

use crate::data::{ObservationSeries, ParameterSet, PopulationSeries};
use crate::error::StrError;
use crate::simulator::ode::OdeSystem;

/// Lower bound applied to `P(t)` before it is used as a divisor
pub const MIN_POPULATION: f64 = 1.0;

/// Compartment sizes `(S, T, R)`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    /// Susceptible
    pub s: f64,
    /// In treatment
    pub t: f64,
    /// Recovered
    pub r: f64,
}

impl State {
    pub fn new(s: f64, t: f64, r: f64) -> Self {
        State { s, t, r }
    }

    pub fn total(&self) -> f64 {
        self.s + self.t + self.r
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.s, self.t, self.r]
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, StrError> {
        match values {
            [s, t, r] => Ok(State::new(*s, *t, *r)),
            _ => Err(StrError::invalid_input(format!(
                "expected 3 state components, got {}",
                values.len()
            ))),
        }
    }
}

/// The S/T/R system driven by the exogenous population `P(t)`
///
/// Holds its own copy of the parameters and the interpolator, so it can be
/// shared between threads and evaluated without side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct StrModel {
    params: ParameterSet,
    population: PopulationSeries,
}

impl StrModel {
    pub fn new(params: ParameterSet, population: PopulationSeries) -> Self {
        StrModel { params, population }
    }

    pub fn from_observations(
        params: ParameterSet,
        observations: &ObservationSeries,
    ) -> Result<Self, StrError> {
        Ok(StrModel::new(
            params,
            PopulationSeries::from_observations(observations)?,
        ))
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn population(&self) -> &PopulationSeries {
        &self.population
    }

    /// Copy of the model with different parameters and the same driver
    pub fn with_params(&self, params: ParameterSet) -> Self {
        StrModel {
            params,
            population: self.population.clone(),
        }
    }

    /// `d(S, T, R)/dt` at time `t`
    #[inline]
    pub fn derivative(&self, time: f64, state: &State) -> State {
        let p = &self.params;
        let population = self.population.value_at(time).max(MIN_POPULATION);
        let State { s, t, r } = *state;

        let inflow_influence = p.beta * p.delta_s * (t / population) * s;
        let inflow_other = p.gamma * (1.0 - p.beta) * p.delta_s * s;

        State {
            s: p.theta * population + (1.0 - p.delta_n) * r
                - inflow_other
                - inflow_influence
                - p.delta_s * s
                - p.delta_n * s,
            t: inflow_other + inflow_influence - p.rho * t - p.delta_s * t - p.delta_n * t,
            r: p.rho * t - r,
        }
    }
}

impl OdeSystem for StrModel {
    fn ndim(&self) -> usize {
        3
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        let d = self.derivative(t, &State::new(y[0], y[1], y[2]));
        dydt[0] = d.s;
        dydt[1] = d.t;
        dydt[2] = d.r;
    }

    fn jac_mul(&self, t: f64, y: &[f64], v: &[f64], out: &mut [f64]) {
        let p = &self.params;
        let population = self.population.value_at(t).max(MIN_POPULATION);
        let (s, tr) = (y[0], y[1]);

        // partial derivatives of the two inflow terms
        let other_ds = p.gamma * (1.0 - p.beta) * p.delta_s;
        let influence_ds = p.beta * p.delta_s * tr / population;
        let influence_dt = p.beta * p.delta_s * s / population;
        let death = p.delta_s + p.delta_n;

        out[0] = -(other_ds + influence_ds + death) * v[0] - influence_dt * v[1]
            + (1.0 - p.delta_n) * v[2];
        out[1] = (other_ds + influence_ds) * v[0] + (influence_dt - p.rho - death) * v[1];
        out[2] = p.rho * v[1] - v[2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TransitionRates;
    use approx::assert_relative_eq;

    fn params(rates: TransitionRates) -> ParameterSet {
        ParameterSet::new(0.006, 0.00006, 0.00594, 0.005, 0.5, rates)
    }

    fn population() -> PopulationSeries {
        PopulationSeries::new(&[2010.0, 2011.0], &[100_000.0, 101_000.0]).unwrap()
    }

    #[test]
    fn derivative_matches_hand_computation() {
        let rates = TransitionRates::new(0.01, 0.1, 0.3, 0.7);
        let model = StrModel::new(params(rates), population());
        let state = State::new(99_250.0, 500.0, 250.0);
        let d = model.derivative(2010.0, &state);

        let (p, s, t, r) = (100_000.0, 99_250.0, 500.0, 250.0);
        let influence = 0.3 * 0.00006 * (t / p) * s;
        let other = 0.7 * 0.7 * 0.00006 * s;
        let ds = 0.01 * p + (1.0 - 0.00594) * r - other - influence - 0.00006 * s - 0.00594 * s;
        let dt = other + influence - 0.1 * t - 0.00006 * t - 0.00594 * t;
        let dr = 0.1 * t - r;

        assert_relative_eq!(d.s, ds, max_relative = 1e-12);
        assert_relative_eq!(d.t, dt, max_relative = 1e-12);
        assert_relative_eq!(d.r, dr, max_relative = 1e-12);
    }

    #[test]
    fn population_is_floored_before_division() {
        let driver = PopulationSeries::new(&[2010.0], &[0.0]).unwrap();
        let rates = TransitionRates::new(0.0, 0.0, 1.0, 0.0);
        let model = StrModel::new(params(rates), driver);
        let d = model.derivative(2010.0, &State::new(10.0, 2.0, 0.0));
        assert!(d.s.is_finite() && d.t.is_finite());
        // P = 1 after flooring
        assert_relative_eq!(d.t, 0.00006 * 2.0 * 10.0 - 0.006 * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn rhs_agrees_with_derivative() {
        let model = StrModel::new(params(TransitionRates::default()), population());
        let state = State::new(1_000.0, 20.0, 5.0);
        let mut dydt = [0.0; 3];
        model.rhs(2010.5, &state.to_array(), &mut dydt);
        assert_eq!(dydt, model.derivative(2010.5, &state).to_array());
    }

    #[test]
    fn analytic_jacobian_matches_finite_difference() {
        let rates = TransitionRates::new(0.01, 0.1, 0.3, 0.7);
        let model = StrModel::new(params(rates), population());
        let y = [99_250.0, 500.0, 250.0];
        // the right-hand side is at most quadratic, so central differences are exact
        let h = 1.0;
        for axis in 0..3 {
            let mut v = [0.0; 3];
            v[axis] = 1.0;
            let mut analytic = [0.0; 3];
            model.jac_mul(2010.25, &y, &v, &mut analytic);

            let mut plus = y;
            let mut minus = y;
            plus[axis] += h;
            minus[axis] -= h;
            let (mut f_plus, mut f_minus) = ([0.0; 3], [0.0; 3]);
            model.rhs(2010.25, &plus, &mut f_plus);
            model.rhs(2010.25, &minus, &mut f_minus);
            for i in 0..3 {
                let central = (f_plus[i] - f_minus[i]) / (2.0 * h);
                assert_relative_eq!(analytic[i], central, epsilon = 1e-8, max_relative = 1e-6);
            }
        }
    }
}
