//! Explicit Runge–Kutta integration on top of `diffsol`
//!
//! An [`OdeSystem`] is wrapped as a diffsol equation set and stepped with the
//! Tsitouras 5(4) solver up to the end of the span. Requested times are read
//! in increasing order with the solver's interpolant as soon as a step passes
//! them, so every read of one call comes from a single trajectory. The step
//! sequence only depends on the span and the tolerances, which keeps reads of
//! the same time from different calls identical.

use diffsol::{
    ode_solver::method::OdeSolverMethod, ConstantOp, LinearOp, NonLinearOp, NonLinearOpJacobian,
    OdeBuilder, OdeEquations, OdeEquationsRef, OdeSolverStopReason, Op,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::StrError;

type T = f64;
type V = nalgebra::DVector<f64>;
type M = nalgebra::DMatrix<f64>;

const RTOL: f64 = 1e-8;
const ATOL: f64 = 1e-6;
const H0: f64 = 1e-3;
const MAX_STEPS: usize = 100_000;

/// Right-hand side of `dy/dt = f(t, y)`
pub trait OdeSystem {
    /// Number of state variables
    fn ndim(&self) -> usize;

    /// Evaluate `f(t, y)` into `dydt`; both slices have length `ndim()`
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);

    /// Jacobian-vector product `J(t, y) v`, by forward difference unless overridden
    fn jac_mul(&self, t: f64, y: &[f64], v: &[f64], out: &mut [f64]) {
        let v_norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if v_norm == 0.0 {
            out.fill(0.0);
            return;
        }
        let y_norm = y.iter().map(|x| x * x).sum::<f64>().sqrt();
        let eps = f64::EPSILON.sqrt() * (1.0 + y_norm) / v_norm;
        let shifted: Vec<f64> = y.iter().zip(v).map(|(y, v)| y + eps * v).collect();
        let mut base = vec![0.0; y.len()];
        self.rhs(t, y, &mut base);
        self.rhs(t, &shifted, out);
        for (o, b) in out.iter_mut().zip(&base) {
            *o = (*o - b) / eps;
        }
    }
}

/// Tolerances and step budget of the integrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdeOptions {
    /// Relative tolerance (default: 1e-8)
    pub rtol: f64,
    /// Absolute tolerance, applied to every component (default: 1e-6)
    pub atol: f64,
    /// Initial step (default: 1e-3)
    pub h0: f64,
    /// Maximum number of accepted steps (default: 100_000)
    pub max_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        OdeOptions {
            rtol: RTOL,
            atol: ATOL,
            h0: H0,
            max_steps: MAX_STEPS,
        }
    }
}

impl OdeOptions {
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    pub fn with_initial_step(mut self, h0: f64) -> Self {
        self.h0 = h0;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn validate(&self) -> Result<(), StrError> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(StrError::invalid_input("rtol must be finite and > 0"));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(StrError::invalid_input("atol must be finite and > 0"));
        }
        if !self.h0.is_finite() || self.h0 <= 0.0 {
            return Err(StrError::invalid_input("h0 must be finite and > 0"));
        }
        if self.max_steps == 0 {
            return Err(StrError::invalid_input("max_steps must be > 0"));
        }
        Ok(())
    }
}

struct SystemRhs<'a, S> {
    system: &'a S,
    nstates: usize,
}

impl<'a, S: OdeSystem> Op for SystemRhs<'a, S> {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nstates
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<'a, S: OdeSystem> NonLinearOp for SystemRhs<'a, S> {
    fn call_inplace(&self, x: &Self::V, t: Self::T, y: &mut Self::V) {
        self.system.rhs(t, x.as_slice(), y.as_mut_slice());
    }
}

impl<'a, S: OdeSystem> NonLinearOpJacobian for SystemRhs<'a, S> {
    fn jac_mul_inplace(&self, x: &Self::V, t: Self::T, v: &Self::V, y: &mut Self::V) {
        self.system
            .jac_mul(t, x.as_slice(), v.as_slice(), y.as_mut_slice());
    }
}

struct NoMass {
    nstates: usize,
}

impl Op for NoMass {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nstates
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl LinearOp for NoMass {
    fn gemv_inplace(&self, _x: &Self::V, _t: Self::T, _beta: Self::T, _y: &mut Self::V) {}
}

struct InitialState {
    y0: V,
}

impl Op for InitialState {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.y0.len()
    }
    fn nout(&self) -> usize {
        self.y0.len()
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl ConstantOp for InitialState {
    fn call_inplace(&self, _t: Self::T, y: &mut Self::V) {
        y.copy_from(&self.y0);
    }
}

struct NoRoot {
    nstates: usize,
}

impl Op for NoRoot {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        0
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl NonLinearOp for NoRoot {
    fn call_inplace(&self, _x: &Self::V, _t: Self::T, _y: &mut Self::V) {}
}

struct NoOut {
    nstates: usize,
}

impl Op for NoOut {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nstates
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl NonLinearOp for NoOut {
    fn call_inplace(&self, _x: &Self::V, _t: Self::T, _y: &mut Self::V) {}
}

/// Owned copy of the system and its initial state, as diffsol equations
struct SystemEquations<S> {
    system: S,
    y0: V,
}

impl<S: OdeSystem + 'static> Op for SystemEquations<S> {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        self.y0.len()
    }
    fn nout(&self) -> usize {
        self.y0.len()
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<'b, S: OdeSystem + 'static> OdeEquationsRef<'b> for SystemEquations<S> {
    type Rhs = SystemRhs<'b, S>;
    type Mass = NoMass;
    type Init = InitialState;
    type Root = NoRoot;
    type Out = NoOut;
}

impl<S: OdeSystem + 'static> OdeEquations for SystemEquations<S> {
    fn rhs(&self) -> SystemRhs<'_, S> {
        SystemRhs {
            system: &self.system,
            nstates: self.y0.len(),
        }
    }

    fn mass(&self) -> Option<NoMass> {
        None
    }

    fn init(&self) -> InitialState {
        InitialState {
            y0: self.y0.clone(),
        }
    }

    fn get_params(&self, _p: &mut V) {}

    fn root(&self) -> Option<NoRoot> {
        None
    }

    fn out(&self) -> Option<NoOut> {
        None
    }

    fn set_params(&mut self, _p: &V) {}
}

fn failure(time: f64, reason: impl Display) -> StrError {
    StrError::IntegrationFailure {
        time,
        reason: reason.to_string(),
    }
}

/// Integrate `system` from `(t0, y0)` to `t1` and return the state at each of
/// `times`, in the order given
///
/// # Errors
///
/// [`StrError::InvalidInput`] for inconsistent dimensions, tolerances, span or
/// requested times outside `[t0, t1]`; [`StrError::IntegrationFailure`] when
/// the solver gives up, the state stops being finite or `max_steps` is
/// exhausted.
pub fn solve<S>(
    system: &S,
    y0: &[f64],
    t0: f64,
    t1: f64,
    times: &[f64],
    opts: &OdeOptions,
) -> Result<Vec<Vec<f64>>, StrError>
where
    S: OdeSystem + Clone + 'static,
{
    opts.validate()?;
    let n = system.ndim();
    if y0.len() != n {
        return Err(StrError::invalid_input(format!(
            "initial state has {} components, system has {}",
            y0.len(),
            n
        )));
    }
    if !t0.is_finite() || !t1.is_finite() {
        return Err(StrError::invalid_input("integration bounds must be finite"));
    }
    if t1 < t0 {
        return Err(StrError::invalid_input(format!(
            "integration end {} precedes start {}",
            t1, t0
        )));
    }
    if let Some(t) = times.iter().find(|t| !(t0..=t1).contains(*t)) {
        return Err(StrError::invalid_input(format!(
            "requested time {} lies outside [{}, {}]",
            t, t0, t1
        )));
    }
    if y0.iter().any(|y| !y.is_finite()) {
        return Err(failure(t0, "initial state is not finite"));
    }

    let mut states = vec![y0.to_vec(); times.len()];
    if times.iter().all(|&t| t == t0) {
        return Ok(states);
    }

    let equations = SystemEquations {
        system: system.clone(),
        y0: V::from_column_slice(y0),
    };
    let problem = OdeBuilder::<M>::new()
        .atol(vec![opts.atol; n])
        .rtol(opts.rtol)
        .t0(t0)
        .h0(opts.h0.min(t1 - t0))
        .build_from_eqn(equations)
        .map_err(|err| failure(t0, err))?;
    let mut solver = problem.tsit45().map_err(|err| failure(t0, err))?;
    solver.set_stop_time(t1).map_err(|err| failure(t0, err))?;

    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let mut steps = 0;
    let mut finished = false;
    for idx in order {
        let t = times[idx];
        if t == t0 {
            continue;
        }
        while !finished && solver.state().t < t {
            if steps == opts.max_steps {
                return Err(failure(
                    solver.state().t,
                    format!("exceeded {} steps", opts.max_steps),
                ));
            }
            steps += 1;
            match solver.step() {
                Ok(OdeSolverStopReason::InternalTimestep) => {}
                Ok(OdeSolverStopReason::TstopReached) => finished = true,
                Ok(reason) => {
                    return Err(failure(
                        solver.state().t,
                        format!("unexpected stop: {:?}", reason),
                    ))
                }
                Err(err) => return Err(failure(solver.state().t, err)),
            }
            if solver.state().y.iter().any(|v| !v.is_finite()) {
                return Err(failure(solver.state().t, "state is not finite"));
            }
        }
        let y = if t >= solver.state().t {
            solver.state().y.clone()
        } else {
            solver.interpolate(t).map_err(|err| failure(t, err))?
        };
        states[idx] = y.as_slice().to_vec();
    }
    tracing::trace!(steps, t0, t1, "integration finished");

    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[derive(Clone)]
    struct Decay {
        k: f64,
    }

    impl OdeSystem for Decay {
        fn ndim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -self.k * y[0];
        }
    }

    #[derive(Clone)]
    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn ndim(&self) -> usize {
            2
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = y[1];
            dydt[1] = -y[0];
        }
    }

    #[test]
    fn exponential_decay_matches_analytical_solution() {
        let times = [0.0, 0.3, 1.0, 2.5, 4.99, 5.0];
        let states =
            solve(&Decay { k: 0.7 }, &[100.0], 0.0, 5.0, &times, &OdeOptions::default()).unwrap();
        for (t, y) in times.iter().zip(&states) {
            assert_relative_eq!(y[0], 100.0 * (-0.7 * t).exp(), max_relative = 1e-6);
        }
    }

    #[test]
    fn interpolation_is_accurate_between_steps() {
        let times: Vec<f64> = (0..=100).map(|i| i as f64 * 0.1).collect();
        let states = solve(
            &Oscillator,
            &[0.0, 1.0],
            0.0,
            10.0,
            &times,
            &OdeOptions::default().with_tolerances(1e-10, 1e-10),
        )
        .unwrap();
        for (t, y) in times.iter().zip(&states) {
            assert_relative_eq!(y[0], t.sin(), epsilon = 1e-6);
            assert_relative_eq!(y[1], t.cos(), epsilon = 1e-6);
        }
    }

    #[test]
    fn unsorted_times_are_returned_in_request_order() {
        let opts = OdeOptions::default();
        let sorted = solve(&Oscillator, &[0.0, 1.0], 0.0, 3.0, &[0.5, 1.7, 3.0], &opts).unwrap();
        let shuffled = solve(&Oscillator, &[0.0, 1.0], 0.0, 3.0, &[3.0, 0.5, 1.7], &opts).unwrap();
        assert_eq!(shuffled[0], sorted[2]);
        assert_eq!(shuffled[1], sorted[0]);
        assert_eq!(shuffled[2], sorted[1]);
    }

    #[test]
    fn times_outside_span_are_rejected() {
        let opts = OdeOptions::default();
        let below = solve(&Decay { k: 1.0 }, &[1.0], 2010.0, 2015.0, &[2009.9], &opts);
        let above = solve(&Decay { k: 1.0 }, &[1.0], 2010.0, 2015.0, &[2015.1], &opts);
        assert!(matches!(below, Err(StrError::InvalidInput { .. })));
        assert!(matches!(above, Err(StrError::InvalidInput { .. })));
    }

    #[test]
    fn start_time_returns_initial_state() {
        let states = solve(
            &Decay { k: 1.0 },
            &[3.0],
            2010.0,
            2015.0,
            &[2010.0, 2012.0],
            &OdeOptions::default(),
        )
        .unwrap();
        assert_eq!(states[0], vec![3.0]);
        assert!(states[1][0] < 3.0);
    }

    #[test]
    fn zero_span_returns_initial_state() {
        let states =
            solve(&Decay { k: 1.0 }, &[3.0], 1.0, 1.0, &[1.0, 1.0], &OdeOptions::default())
                .unwrap();
        assert_eq!(states, vec![vec![3.0], vec![3.0]]);
    }

    #[test]
    fn exhausted_step_budget_is_reported() {
        let result = solve(
            &Decay { k: 1.0 },
            &[1.0],
            2010.0,
            2030.0,
            &[2030.0],
            &OdeOptions::default().with_max_steps(1),
        );
        match result {
            Err(StrError::IntegrationFailure { reason, .. }) => {
                assert!(reason.contains("exceeded"))
            }
            other => panic!("expected an integration failure, got {:?}", other),
        }
    }

    #[test]
    fn reversed_span_is_rejected() {
        let result = solve(&Decay { k: 1.0 }, &[1.0], 1.0, 0.0, &[0.5], &OdeOptions::default());
        assert!(matches!(result, Err(StrError::InvalidInput { .. })));
    }

    #[test]
    fn non_positive_initial_step_is_rejected() {
        let result = solve(
            &Decay { k: 1.0 },
            &[1.0],
            0.0,
            1.0,
            &[1.0],
            &OdeOptions::default().with_initial_step(0.0),
        );
        assert!(matches!(result, Err(StrError::InvalidInput { .. })));
    }

    #[test]
    fn solving_twice_is_bitwise_identical() {
        let opts = OdeOptions::default();
        let a = solve(&Oscillator, &[0.0, 1.0], 0.0, 3.0, &[1.7, 3.0], &opts).unwrap();
        let b = solve(&Oscillator, &[0.0, 1.0], 0.0, 3.0, &[1.7, 3.0], &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn default_jacobian_product_is_a_directional_derivative() {
        let mut out = [0.0; 2];
        Oscillator.jac_mul(0.0, &[0.3, -0.2], &[1.0, 2.0], &mut out);
        assert_relative_eq!(out[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], -1.0, epsilon = 1e-6);
    }
}
