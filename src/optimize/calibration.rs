//! Fitting `theta`, `rho`, `beta` and `gamma` to the observed treatment counts
//!
//! The fixed fields of the starting [`ParameterSet`] are never touched. The
//! default method is the bounded trust-region reflective least-squares solver
//! in [`crate::optimize::trf`]; Nelder–Mead (from `argmin`) is available for
//! comparison runs. Failed model evaluations never abort a calibration: they
//! surface as [`Trial::Failed`](crate::optimize::Trial) sentinel residuals.

use std::fmt;

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason as SolverReason};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};

use crate::data::{ObservationSeries, ParameterSet, TransitionRates};
use crate::error::StrError;
use crate::optimize::mesh::{self, MeshGrid, MeshSearch};
use crate::optimize::objective::{CalibrationProblem, DEFAULT_SENTINEL};
use crate::optimize::trf::{least_squares, TrfOptions, TrfStatus};
use crate::simulator::{InitialConditionRule, OdeOptions};

/// Box constraints on `[theta, rho, beta, gamma]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl Bounds {
    pub fn new(lower: [f64; 4], upper: [f64; 4]) -> Self {
        Bounds { lower, upper }
    }

    /// `theta, rho, gamma >= 0` and `beta` in `[0, 1]`
    pub fn standard() -> Self {
        Bounds::new(
            [0.0; 4],
            [f64::INFINITY, f64::INFINITY, 1.0, f64::INFINITY],
        )
    }

    /// `theta, gamma` in `[0, 20]` and `rho, beta` in `[0, 1]`
    pub fn heuristic() -> Self {
        Bounds::new([0.0; 4], [20.0, 1.0, 1.0, 20.0])
    }

    pub fn with_theta(mut self, lower: f64, upper: f64) -> Self {
        self.lower[0] = lower;
        self.upper[0] = upper;
        self
    }

    pub fn with_rho(mut self, lower: f64, upper: f64) -> Self {
        self.lower[1] = lower;
        self.upper[1] = upper;
        self
    }

    pub fn with_beta(mut self, lower: f64, upper: f64) -> Self {
        self.lower[2] = lower;
        self.upper[2] = upper;
        self
    }

    pub fn with_gamma(mut self, lower: f64, upper: f64) -> Self {
        self.lower[3] = lower;
        self.upper[3] = upper;
        self
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == 4
            && x.iter()
                .enumerate()
                .all(|(i, xi)| *xi >= self.lower[i] && *xi <= self.upper[i])
    }

    /// Project `x` onto the box
    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, xi)| xi.max(self.lower[i]).min(self.upper[i]))
            .collect()
    }

    fn validate(&self) -> Result<(), StrError> {
        for (i, name) in TransitionRates::NAMES.iter().enumerate() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            if lo.is_nan() || hi.is_nan() || lo >= hi {
                return Err(StrError::invalid_input(format!(
                    "bounds for {} must satisfy lower < upper, got [{}, {}]",
                    name, lo, hi
                )));
            }
        }
        Ok(())
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds::standard()
    }
}

/// Where the optimizer starts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum StartingPoint {
    /// The rates already stored in the base parameters
    #[default]
    FromParameters,
    /// `[delta_n, 0.1, 0.3, 10.0]`
    Heuristic,
    Custom([f64; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    TrustRegionReflective,
    NelderMead,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::TrustRegionReflective => write!(f, "trust-region reflective"),
            Method::NelderMead => write!(f, "Nelder-Mead"),
        }
    }
}

/// Settings of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    /// First year of the fitting window; must be observed
    pub start_year: i32,
    /// Last year of the fitting window
    pub end_year: i32,
    pub bounds: Bounds,
    pub start: StartingPoint,
    pub method: Method,
    /// Budget of objective evaluations (Nelder–Mead: iterations)
    pub max_evaluations: usize,
    pub ftol: f64,
    pub gtol: f64,
    pub xtol: f64,
    /// Relative forward-difference step of the Jacobian
    pub diff_step: f64,
    /// Residual value used for every observation of a failed trial
    pub sentinel: f64,
    /// Evaluate Jacobian columns and mesh points on the rayon pool
    pub parallel: bool,
    pub ode: OdeOptions,
    pub initial_conditions: InitialConditionRule,
}

impl CalibrationOptions {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        CalibrationOptions {
            start_year,
            end_year,
            bounds: Bounds::standard(),
            start: StartingPoint::FromParameters,
            method: Method::TrustRegionReflective,
            max_evaluations: 1000,
            ftol: 1e-8,
            gtol: 1e-8,
            xtol: 1e-8,
            diff_step: 1e-6,
            sentinel: DEFAULT_SENTINEL,
            parallel: false,
            ode: OdeOptions::default(),
            initial_conditions: InitialConditionRule::TreatmentRatio,
        }
    }

    /// Window covering every observed year
    pub fn for_series(observations: &ObservationSeries) -> Result<Self, StrError> {
        match (observations.first_year(), observations.last_year()) {
            (Some(start), Some(end)) => Ok(CalibrationOptions::new(start, end)),
            _ => Err(StrError::invalid_input("observation series is empty")),
        }
    }

    /// Heuristic starting point inside the `[0, 20]`/`[0, 1]` box
    pub fn bounded_heuristic(start_year: i32, end_year: i32) -> Self {
        CalibrationOptions::new(start_year, end_year)
            .with_bounds(Bounds::heuristic())
            .with_start(StartingPoint::Heuristic)
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_start(mut self, start: StartingPoint) -> Self {
        self.start = start;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    pub fn with_tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    pub fn with_diff_step(mut self, diff_step: f64) -> Self {
        self.diff_step = diff_step;
        self
    }

    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_ode_options(mut self, ode: OdeOptions) -> Self {
        self.ode = ode;
        self
    }

    pub fn with_initial_conditions(mut self, rule: InitialConditionRule) -> Self {
        self.initial_conditions = rule;
        self
    }

    fn validate(&self) -> Result<(), StrError> {
        if self.start_year > self.end_year {
            return Err(StrError::invalid_input(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }
        if self.max_evaluations == 0 {
            return Err(StrError::invalid_input("max_evaluations must be > 0"));
        }
        if !self.sentinel.is_finite() {
            return Err(StrError::invalid_input("sentinel residual must be finite"));
        }
        self.bounds.validate()
    }

    fn trf(&self, cost_floor: f64) -> TrfOptions {
        TrfOptions {
            ftol: self.ftol,
            xtol: self.xtol,
            gtol: self.gtol,
            cost_floor,
            max_evaluations: self.max_evaluations,
            diff_step: self.diff_step,
            parallel: self.parallel,
        }
    }
}

/// Coarse progress notifications
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Mesh { completed: usize, total: usize },
    Iteration {
        iteration: usize,
        evaluations: usize,
        cost: f64,
    },
}

impl Progress {
    /// Completed share of a mesh search, in percent
    pub fn percent(&self) -> Option<f64> {
        match self {
            Progress::Mesh { completed, total } if *total > 0 => {
                Some(*completed as f64 * 100.0 / *total as f64)
            }
            _ => None,
        }
    }
}

/// Why the optimizer stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Relative cost reduction below `ftol`
    FunctionTolerance,
    /// Scaled gradient below `gtol`
    GradientTolerance,
    /// Relative step below `xtol`
    StepTolerance,
    FunctionAndStepTolerance,
    /// Residuals within the integrator's error allowance
    ToleranceFloor,
    /// Nelder–Mead simplex collapsed below the tolerance
    SimplexConverged,
    MaxEvaluations,
    Other(String),
}

impl TerminationReason {
    pub fn is_converged(&self) -> bool {
        !matches!(
            self,
            TerminationReason::MaxEvaluations | TerminationReason::Other(_)
        )
    }
}

impl From<TrfStatus> for TerminationReason {
    fn from(status: TrfStatus) -> Self {
        match status {
            TrfStatus::Function => TerminationReason::FunctionTolerance,
            TrfStatus::Gradient => TerminationReason::GradientTolerance,
            TrfStatus::Step => TerminationReason::StepTolerance,
            TrfStatus::FunctionAndStep => TerminationReason::FunctionAndStepTolerance,
            TrfStatus::CostFloor => TerminationReason::ToleranceFloor,
            TrfStatus::MaxEvaluations => TerminationReason::MaxEvaluations,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::FunctionTolerance => {
                write!(f, "converged: cost reduction below ftol")
            }
            TerminationReason::GradientTolerance => {
                write!(f, "converged: scaled gradient below gtol")
            }
            TerminationReason::StepTolerance => write!(f, "converged: step size below xtol"),
            TerminationReason::FunctionAndStepTolerance => {
                write!(f, "converged: cost reduction below ftol and step size below xtol")
            }
            TerminationReason::ToleranceFloor => {
                write!(f, "converged: residuals within integration tolerance")
            }
            TerminationReason::SimplexConverged => {
                write!(f, "converged: simplex spread below tolerance")
            }
            TerminationReason::MaxEvaluations => {
                write!(f, "stopped: maximum number of evaluations exceeded")
            }
            TerminationReason::Other(reason) => write!(f, "stopped: {}", reason),
        }
    }
}

/// Best-effort result of a calibration
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Base parameters with the calibrated rates
    pub params: ParameterSet,
    pub initial_rates: TransitionRates,
    /// `0.5 * sum(r^2)` at the calibrated rates
    pub cost: f64,
    /// `T_model - T_obs` at the observed years of the window
    pub residuals: Vec<f64>,
    /// Scaled gradient norm; trust-region method only
    pub optimality: Option<f64>,
    pub evaluations: usize,
    pub iterations: usize,
    pub method: Method,
    pub termination: TerminationReason,
    /// `false` when the final rates still produce a failed trial
    pub solved: bool,
}

impl Calibration {
    pub fn rates(&self) -> TransitionRates {
        self.params.rates()
    }

    pub fn success(&self) -> bool {
        self.solved && self.termination.is_converged()
    }
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initial = self.initial_rates.to_array();
        let fitted = self.rates().to_array();
        writeln!(f, "Method: {}", self.method)?;
        writeln!(f, "Termination: {}", self.termination)?;
        writeln!(f, "Evaluations: {}", self.evaluations)?;
        writeln!(f, "Cost (0.5 * sum of squared residuals): {:.6e}", self.cost)?;
        for (i, name) in TransitionRates::NAMES.iter().enumerate() {
            write!(f, "  {:<5} = {:.6} (initial: {:.6})", name, fitted[i], initial[i])?;
            if i + 1 < TransitionRates::NAMES.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Cost of the projection of `x` onto the bounds, for unconstrained solvers
struct ProjectedCost<'p, 'a> {
    problem: &'p CalibrationProblem<'a>,
    bounds: Bounds,
}

impl CostFunction for ProjectedCost<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.problem.evaluate(&self.bounds.clamp(x)).cost())
    }
}

/// Initial simplex around `point`: one vertex per coordinate, displaced by
/// 5% of the value, or 0.00025 for zero components, and pulled back into the box
fn initial_simplex(point: &[f64], bounds: &Bounds) -> Vec<Vec<f64>> {
    let mut vertices = vec![point.to_vec()];
    for i in 0..point.len() {
        let perturbation = if point[i] == 0.0 {
            0.00025
        } else {
            0.05 * point[i]
        };
        let mut vertex = point.to_vec();
        vertex[i] += perturbation;
        if vertex[i] > bounds.upper[i] {
            vertex[i] = point[i] - perturbation;
        }
        vertices.push(vertex);
    }
    vertices
}

/// Calibrates the transition rates of a base parameter set
pub struct Calibrator<'a> {
    observations: &'a ObservationSeries,
    base: ParameterSet,
    options: CalibrationOptions,
    progress: Option<&'a (dyn Fn(Progress) + Sync)>,
}

impl<'a> Calibrator<'a> {
    pub fn new(
        observations: &'a ObservationSeries,
        base: ParameterSet,
        options: CalibrationOptions,
    ) -> Result<Self, StrError> {
        options.validate()?;
        Ok(Calibrator {
            observations,
            base,
            options,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: &'a (dyn Fn(Progress) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Residual function for the configured window
    pub fn problem(&self) -> Result<CalibrationProblem<'a>, StrError> {
        Ok(CalibrationProblem::new(
            self.observations,
            self.base,
            self.options.start_year,
            self.options.end_year,
        )?
        .with_ode_options(self.options.ode)
        .with_initial_conditions(self.options.initial_conditions)
        .with_sentinel(self.options.sentinel))
    }

    /// Resolved starting point; must lie within the bounds
    pub fn starting_point(&self) -> Result<[f64; 4], StrError> {
        let x0 = match self.options.start {
            StartingPoint::FromParameters => self.base.rates().to_array(),
            StartingPoint::Heuristic => TransitionRates::heuristic(self.base.delta_n).to_array(),
            StartingPoint::Custom(x0) => x0,
        };
        if !self.options.bounds.contains(&x0) {
            return Err(StrError::invalid_input(format!(
                "starting point {:?} lies outside the bounds",
                x0
            )));
        }
        Ok(x0)
    }

    pub fn calibrate(&self) -> Result<Calibration, StrError> {
        self.calibrate_from(self.starting_point()?)
    }

    /// Run the configured method from an explicit starting point
    pub fn calibrate_from(&self, x0: [f64; 4]) -> Result<Calibration, StrError> {
        if !self.options.bounds.contains(&x0) {
            return Err(StrError::invalid_input(format!(
                "starting point {:?} lies outside the bounds",
                x0
            )));
        }
        let problem = self.problem()?;
        let calibration = match self.options.method {
            Method::TrustRegionReflective => self.run_trf(&problem, x0)?,
            Method::NelderMead => self.run_nelder_mead(&problem, x0)?,
        };
        tracing::info!(
            method = %calibration.method,
            cost = calibration.cost,
            evaluations = calibration.evaluations,
            termination = %calibration.termination,
            "calibration finished"
        );
        Ok(calibration)
    }

    /// Evaluate the cost on an `n_theta x n_gamma` grid inside the bounds,
    /// holding `rho` and `beta` at the starting point
    pub fn mesh_search(&self, n_theta: usize, n_gamma: usize) -> Result<MeshSearch, StrError> {
        let x0 = self.starting_point()?;
        let bounds = &self.options.bounds;
        let grid = MeshGrid {
            theta: (bounds.lower[0], bounds.upper[0], n_theta),
            gamma: (bounds.lower[3], bounds.upper[3], n_gamma),
            rho: x0[1],
            beta: x0[2],
        };
        mesh::search(&self.problem()?, &grid, self.options.parallel, self.progress)
    }

    /// [`Calibrator::mesh_search`] followed by a run from the best grid point
    pub fn calibrate_from_mesh(
        &self,
        n_theta: usize,
        n_gamma: usize,
    ) -> Result<Calibration, StrError> {
        let search = self.mesh_search(n_theta, n_gamma)?;
        self.calibrate_from(search.best().rates.to_array())
    }

    fn report(&self, iteration: usize, evaluations: usize, cost: f64) {
        tracing::debug!(iteration, evaluations, cost, "calibration iteration");
        if let Some(progress) = self.progress {
            progress(Progress::Iteration {
                iteration,
                evaluations,
                cost,
            });
        }
    }

    fn finish(
        &self,
        problem: &CalibrationProblem<'_>,
        x: &[f64],
        initial: [f64; 4],
    ) -> Result<(ParameterSet, TransitionRates, Vec<f64>, bool), StrError> {
        let trial = problem.evaluate(x);
        let solved = trial.is_solved();
        Ok((
            problem.params_for(x)?,
            TransitionRates::from_slice(&initial)?,
            trial.into_residuals(),
            solved,
        ))
    }

    fn run_trf(
        &self,
        problem: &CalibrationProblem<'_>,
        x0: [f64; 4],
    ) -> Result<Calibration, StrError> {
        let bounds = &self.options.bounds;
        let report = least_squares(
            problem,
            &x0,
            &bounds.lower,
            &bounds.upper,
            &self.options.trf(problem.tolerance_cost()),
            &mut |iteration, evaluations, cost| self.report(iteration, evaluations, cost),
        )?;

        let (params, initial_rates, _, solved) = self.finish(problem, &report.x, x0)?;
        Ok(Calibration {
            params,
            initial_rates,
            cost: report.cost,
            residuals: report.residuals,
            optimality: Some(report.optimality),
            evaluations: report.evaluations,
            iterations: report.iterations,
            method: Method::TrustRegionReflective,
            termination: report.status.into(),
            solved,
        })
    }

    fn run_nelder_mead(
        &self,
        problem: &CalibrationProblem<'_>,
        x0: [f64; 4],
    ) -> Result<Calibration, StrError> {
        let bounds = self.options.bounds;
        let simplex = initial_simplex(&x0, &bounds);
        let solver: NelderMead<Vec<f64>, f64> =
            NelderMead::new(simplex).with_sd_tolerance(self.options.ftol)?;
        let cost = ProjectedCost { problem, bounds };
        let res = Executor::new(cost, solver)
            .configure(|state| state.max_iters(self.options.max_evaluations as u64))
            .run()?;

        let termination = match res.state.get_termination_reason() {
            Some(SolverReason::SolverConverged) => TerminationReason::SimplexConverged,
            Some(SolverReason::MaxItersReached) => TerminationReason::MaxEvaluations,
            Some(other) => TerminationReason::Other(format!("{:?}", other)),
            None => TerminationReason::Other("solver did not report a reason".to_string()),
        };
        let iterations = res.state.get_iter() as usize;
        let evaluations = res
            .state
            .get_func_counts()
            .get("cost_count")
            .map(|count| *count as usize)
            .unwrap_or(iterations);
        let best = res
            .state
            .best_param
            .clone()
            .map(|x| bounds.clamp(&x))
            .unwrap_or_else(|| x0.to_vec());

        let (params, initial_rates, residuals, solved) = self.finish(problem, &best, x0)?;
        let cost = 0.5 * residuals.iter().map(|r| r * r).sum::<f64>();
        self.report(iterations, evaluations, cost);
        Ok(Calibration {
            params,
            initial_rates,
            cost,
            residuals,
            optimality: None,
            evaluations,
            iterations,
            method: Method::NelderMead,
            termination,
            solved,
        })
    }
}

/// Calibrate `params_initial` against `observations` with `options`
pub fn calibrate(
    observations: &ObservationSeries,
    params_initial: &ParameterSet,
    options: CalibrationOptions,
) -> Result<Calibration, StrError> {
    Calibrator::new(observations, *params_initial, options)?.calibrate()
}
