//! Forward simulation of the S/T/R model
//!
//! [`Simulator`] wraps a borrowed [`StrModel`] and the integrator options.
//! Both entry points perform one solve over `[t0, tf]` and read the solver's
//! interpolant at the requested times, so a uniform run and a pointwise run
//! over the same span return identical values at shared times.

pub mod initial;
pub mod model;
pub mod ode;

use serde::{Deserialize, Serialize};

use crate::error::StrError;

pub use initial::{
    initial_conditions, initial_conditions_with, InitialConditionRule, InitialConditions,
};
pub use model::{State, StrModel, MIN_POPULATION};
pub use ode::{solve, OdeOptions, OdeSystem};

/// Model state at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub time: f64,
    pub state: State,
}

/// Ordered model states returned by the [`Simulator`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryPoint> {
        self.points.iter()
    }

    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.time).collect()
    }

    pub fn susceptible(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.state.s).collect()
    }

    pub fn treatment(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.state.t).collect()
    }

    pub fn recovered(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.state.r).collect()
    }

    /// Point recorded at exactly `time`
    pub fn at(&self, time: f64) -> Option<&TrajectoryPoint> {
        self.points.iter().find(|p| p.time == time)
    }
}

impl IntoIterator for Trajectory {
    type Item = TrajectoryPoint;
    type IntoIter = std::vec::IntoIter<TrajectoryPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

#[derive(Debug, Clone)]
pub struct Simulator<'a> {
    model: &'a StrModel,
    options: OdeOptions,
}

impl<'a> Simulator<'a> {
    pub fn new(model: &'a StrModel) -> Self {
        Simulator {
            model,
            options: OdeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OdeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &StrModel {
        self.model
    }

    pub fn options(&self) -> &OdeOptions {
        &self.options
    }

    /// `num_points` uniformly spaced states over `[t0, tf]`, both ends included
    pub fn simulate(
        &self,
        t0: f64,
        tf: f64,
        state0: State,
        num_points: usize,
    ) -> Result<Trajectory, StrError> {
        if num_points == 0 {
            return Err(StrError::invalid_input("num_points must be at least 1"));
        }
        let times = linspace(t0, tf, num_points);
        self.evaluate_at_points(t0, tf, state0, &times)
    }

    /// States at arbitrary `times`, all inside `[t0, tf]`, from a single solve
    pub fn evaluate_at_points(
        &self,
        t0: f64,
        tf: f64,
        state0: State,
        times: &[f64],
    ) -> Result<Trajectory, StrError> {
        let states = solve(self.model, &state0.to_array(), t0, tf, times, &self.options)?;
        let points = times
            .iter()
            .zip(&states)
            .map(|(&time, y)| {
                Ok(TrajectoryPoint {
                    time,
                    state: State::from_slice(y)?,
                })
            })
            .collect::<Result<Vec<_>, StrError>>()?;
        Ok(Trajectory { points })
    }
}

fn linspace(t0: f64, tf: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![t0];
    }
    let step = (tf - t0) / (n - 1) as f64;
    (0..n)
        .map(|i| if i == n - 1 { tf } else { t0 + i as f64 * step })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ParameterSet, PopulationSeries, TransitionRates};

    fn model() -> StrModel {
        let params = ParameterSet::new(
            0.006,
            0.00006,
            0.00594,
            0.005,
            0.5,
            TransitionRates::new(0.006, 0.2, 0.3, 5.0),
        );
        let population = PopulationSeries::new(
            &[2010.0, 2011.0, 2012.0, 2013.0],
            &[100_000.0, 101_000.0, 102_000.0, 103_000.0],
        )
        .unwrap();
        StrModel::new(params, population)
    }

    fn state0() -> State {
        State::new(99_250.0, 500.0, 250.0)
    }

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(2010.0, 2012.0, 3), vec![2010.0, 2011.0, 2012.0]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
    }

    #[test]
    fn simulate_returns_requested_number_of_points() {
        let model = model();
        let trajectory = Simulator::new(&model)
            .simulate(2010.0, 2013.0, state0(), 31)
            .unwrap();
        assert_eq!(trajectory.len(), 31);
        assert_eq!(trajectory.points()[0].state, state0());
        assert_eq!(trajectory.points()[30].time, 2013.0);
    }

    #[test]
    fn simulate_agrees_with_evaluate_at_points() {
        let model = model();
        let simulator = Simulator::new(&model);
        let uniform = simulator.simulate(2010.0, 2013.0, state0(), 4).unwrap();
        let pointwise = simulator
            .evaluate_at_points(2010.0, 2013.0, state0(), &[2011.0, 2013.0])
            .unwrap();
        assert_eq!(uniform.at(2011.0).unwrap().state, pointwise.points()[0].state);
        assert_eq!(uniform.at(2013.0).unwrap().state, pointwise.points()[1].state);
    }

    #[test]
    fn times_outside_span_are_rejected() {
        let model = model();
        let result =
            Simulator::new(&model).evaluate_at_points(2010.0, 2012.0, state0(), &[2013.0]);
        assert!(matches!(result, Err(StrError::InvalidInput { .. })));
    }

    #[test]
    fn zero_points_is_invalid() {
        let model = model();
        let result = Simulator::new(&model).simulate(2010.0, 2012.0, state0(), 0);
        assert!(result.is_err());
    }
}
