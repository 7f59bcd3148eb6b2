//! Bounded nonlinear least squares by a trust-region reflective method
//!
//! Minimizes `0.5 * ||r(x)||^2` subject to `lower <= x <= upper`. Iterates stay
//! strictly inside the box. Each iteration scales the variables by their
//! distance to the bound the gradient points at (Coleman–Li), solves the
//! trust-region subproblem of the augmented system through an SVD and picks
//! the best of a truncated, a reflected and an anti-gradient step.
//!
//! The residual function is any argmin [`Operator`] mapping `Vec<f64>` to
//! `Vec<f64>`; its Jacobian is approximated by forward differences.

use argmin::core::Operator;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StrError;

/// Which stopping rule ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrfStatus {
    MaxEvaluations,
    /// Cost at or below [`TrfOptions::cost_floor`]
    CostFloor,
    Gradient,
    Function,
    Step,
    FunctionAndStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrfOptions {
    /// Relative cost reduction tolerance
    pub ftol: f64,
    /// Relative step tolerance
    pub xtol: f64,
    /// Scaled gradient tolerance
    pub gtol: f64,
    /// Absolute cost below which the fit is exact for practical purposes
    pub cost_floor: f64,
    /// Budget of residual evaluations, Jacobian columns excluded
    pub max_evaluations: usize,
    /// Relative forward-difference step, `h = diff_step * max(1, |x|)`
    pub diff_step: f64,
    /// Evaluate Jacobian columns on the rayon pool
    pub parallel: bool,
}

impl Default for TrfOptions {
    fn default() -> Self {
        TrfOptions {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            cost_floor: 0.0,
            max_evaluations: 1000,
            diff_step: 1e-6,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrfReport {
    pub x: Vec<f64>,
    pub residuals: Vec<f64>,
    /// `0.5 * sum(r^2)` at `x`
    pub cost: f64,
    /// Infinity norm of the scaled gradient at `x`
    pub optimality: f64,
    pub evaluations: usize,
    pub jacobian_evaluations: usize,
    pub iterations: usize,
    pub status: TrfStatus,
}

/// Progress hook: `(iteration, evaluations, cost)`
pub type TrfObserver<'a> = dyn FnMut(usize, usize, f64) + 'a;

pub fn least_squares<O>(
    op: &O,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    options: &TrfOptions,
    observer: &mut TrfObserver<'_>,
) -> Result<TrfReport, StrError>
where
    O: Operator<Param = Vec<f64>, Output = Vec<f64>> + Sync,
{
    validate(x0, lower, upper, options)?;

    let mut x = make_strictly_feasible(x0, lower, upper, 1e-10);
    let mut f = op.apply(&x)?;
    let mut evaluations = 1;
    let m = f.len();
    if m == 0 {
        return Err(StrError::invalid_input("residual vector is empty"));
    }
    if f.iter().any(|r| !r.is_finite()) {
        return Err(StrError::invalid_input(
            "residuals are not finite at the initial point",
        ));
    }

    let mut jac = jacobian(op, &x, &f, lower, upper, options)?;
    let mut jacobian_evaluations = 1;
    let mut cost = 0.5 * dot(&f, &f);
    let mut g = gradient(&jac, &f);

    let (v0, _) = scaling_vector(&x, &g, lower, upper);
    let mut delta = norm(
        &x.iter()
            .zip(&v0)
            .map(|(xi, vi)| xi / vi.sqrt())
            .collect::<Vec<_>>(),
    );
    if delta == 0.0 || !delta.is_finite() {
        delta = 1.0;
    }

    let mut alpha = 0.0;
    let mut iterations = 0;
    let mut status = None;
    let mut optimality;
    observer(iterations, evaluations, cost);

    loop {
        let (v, dv) = scaling_vector(&x, &g, lower, upper);
        optimality = g
            .iter()
            .zip(&v)
            .map(|(gi, vi)| (gi * vi).abs())
            .fold(0.0, f64::max);
        if cost <= options.cost_floor {
            status = Some(TrfStatus::CostFloor);
        } else if optimality < options.gtol {
            status = Some(TrfStatus::Gradient);
        }
        if status.is_some() || evaluations >= options.max_evaluations {
            break;
        }

        let d: Vec<f64> = v.iter().map(|vi| vi.sqrt()).collect();
        let diag_h: Vec<f64> = g.iter().zip(&dv).map(|(gi, dvi)| gi * dvi).collect();
        let g_h: Vec<f64> = d.iter().zip(&g).map(|(di, gi)| di * gi).collect();
        let mut j_h = jac.clone();
        for (c, dc) in d.iter().enumerate() {
            j_h.column_mut(c).scale_mut(*dc);
        }
        let subproblem = Subproblem::new(&j_h, &diag_h, &f);
        let model = Quadratic {
            j: &j_h,
            g: &g_h,
            diag: &diag_h,
        };

        let theta = (1.0 - optimality).max(0.995);
        let mut actual_reduction = -1.0;
        let mut x_new = x.clone();
        let mut f_new = f.clone();
        let mut cost_new = cost;

        while actual_reduction <= 0.0 && evaluations < options.max_evaluations {
            let p_h = match &subproblem {
                Some(sub) => {
                    let (p_h, next_alpha) = sub.solve(delta, alpha);
                    alpha = next_alpha;
                    p_h
                }
                None => steepest_descent(&g_h, delta),
            };
            let p: Vec<f64> = d.iter().zip(&p_h).map(|(di, pi)| di * pi).collect();
            let (step, step_h, predicted_reduction) =
                select_step(&x, &model, p, p_h, &d, delta, lower, upper, theta);

            let candidate: Vec<f64> = x.iter().zip(&step).map(|(xi, si)| xi + si).collect();
            x_new = make_strictly_feasible(&candidate, lower, upper, 0.0);
            f_new = op.apply(&x_new)?;
            evaluations += 1;

            let step_h_norm = norm(&step_h);
            if f_new.len() != m {
                return Err(StrError::invalid_input(format!(
                    "residual vector changed length from {} to {}",
                    m,
                    f_new.len()
                )));
            }
            if f_new.iter().any(|r| !r.is_finite()) {
                delta = 0.25 * step_h_norm;
                continue;
            }

            cost_new = 0.5 * dot(&f_new, &f_new);
            actual_reduction = cost - cost_new;
            let (delta_new, ratio) = update_radius(
                delta,
                actual_reduction,
                predicted_reduction,
                step_h_norm,
                step_h_norm > 0.95 * delta,
            );

            let step_norm = norm(&step);
            status = check_termination(
                actual_reduction,
                cost,
                step_norm,
                norm(&x),
                ratio,
                options.ftol,
                options.xtol,
            );
            if status.is_some() {
                break;
            }
            if delta_new > 0.0 {
                alpha *= delta / delta_new;
            }
            delta = delta_new;
        }

        if actual_reduction > 0.0 {
            x = x_new;
            f = f_new;
            cost = cost_new;
            jac = jacobian(op, &x, &f, lower, upper, options)?;
            jacobian_evaluations += 1;
            g = gradient(&jac, &f);
        }
        iterations += 1;
        observer(iterations, evaluations, cost);
    }

    Ok(TrfReport {
        x,
        residuals: f,
        cost,
        optimality,
        evaluations,
        jacobian_evaluations,
        iterations,
        status: status.unwrap_or(TrfStatus::MaxEvaluations),
    })
}

fn validate(x0: &[f64], lower: &[f64], upper: &[f64], options: &TrfOptions) -> Result<(), StrError> {
    if x0.is_empty() || x0.len() != lower.len() || x0.len() != upper.len() {
        return Err(StrError::invalid_input(
            "x0, lower and upper must be non-empty and of equal length",
        ));
    }
    for i in 0..x0.len() {
        if lower[i].is_nan() || upper[i].is_nan() || lower[i] >= upper[i] {
            return Err(StrError::invalid_input(format!(
                "lower bound {} must be strictly below upper bound {}",
                lower[i], upper[i]
            )));
        }
        if !x0[i].is_finite() || x0[i] < lower[i] || x0[i] > upper[i] {
            return Err(StrError::invalid_input(format!(
                "starting value {} lies outside [{}, {}]",
                x0[i], lower[i], upper[i]
            )));
        }
    }
    let tolerances = [
        options.ftol,
        options.xtol,
        options.gtol,
        options.cost_floor,
        options.diff_step,
    ];
    if tolerances.iter().any(|t| !t.is_finite() || *t < 0.0) || options.diff_step == 0.0 {
        return Err(StrError::invalid_input(
            "tolerances must be non-negative and diff_step positive",
        ));
    }
    if options.max_evaluations == 0 {
        return Err(StrError::invalid_input("max_evaluations must be > 0"));
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn gradient(jac: &DMatrix<f64>, f: &[f64]) -> Vec<f64> {
    (jac.transpose() * DVector::from_column_slice(f))
        .iter()
        .copied()
        .collect()
}

/// Forward-difference step for one variable, flipped or shrunk to stay in bounds
fn difference_step(x: f64, lower: f64, upper: f64, rel_step: f64) -> f64 {
    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let h = rel_step * sign * x.abs().max(1.0);
    let shifted = x + h;
    if shifted >= lower && shifted <= upper {
        return h;
    }
    let lower_dist = x - lower;
    let upper_dist = upper - x;
    if h.abs() <= lower_dist.max(upper_dist) {
        -h
    } else if upper_dist >= lower_dist {
        upper_dist
    } else {
        -lower_dist
    }
}

fn jacobian<O>(
    op: &O,
    x: &[f64],
    f0: &[f64],
    lower: &[f64],
    upper: &[f64],
    options: &TrfOptions,
) -> Result<DMatrix<f64>, StrError>
where
    O: Operator<Param = Vec<f64>, Output = Vec<f64>> + Sync,
{
    let column = |i: usize| -> Result<Vec<f64>, StrError> {
        let h = difference_step(x[i], lower[i], upper[i], options.diff_step);
        let mut shifted = x.to_vec();
        shifted[i] = x[i] + h;
        let dx = shifted[i] - x[i];
        let f = op.apply(&shifted)?;
        if f.len() != f0.len() {
            return Err(StrError::invalid_input(
                "residual vector changed length while differencing",
            ));
        }
        Ok(f.iter().zip(f0).map(|(a, b)| (a - b) / dx).collect())
    };

    let n = x.len();
    let columns: Vec<Vec<f64>> = if options.parallel {
        (0..n)
            .into_par_iter()
            .map(column)
            .collect::<Result<_, _>>()?
    } else {
        (0..n).map(column).collect::<Result<_, _>>()?
    };
    Ok(DMatrix::from_fn(f0.len(), n, |r, c| columns[c][r]))
}

/// Coleman–Li scaling vector `v` and its derivative `dv`
fn scaling_vector(x: &[f64], g: &[f64], lower: &[f64], upper: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![1.0; x.len()];
    let mut dv = vec![0.0; x.len()];
    for i in 0..x.len() {
        if g[i] < 0.0 && upper[i].is_finite() {
            v[i] = upper[i] - x[i];
            dv[i] = -1.0;
        } else if g[i] > 0.0 && lower[i].is_finite() {
            v[i] = x[i] - lower[i];
            dv[i] = 1.0;
        }
    }
    (v, dv)
}

fn make_strictly_feasible(x: &[f64], lower: &[f64], upper: &[f64], rstep: f64) -> Vec<f64> {
    x.iter()
        .zip(lower.iter().zip(upper))
        .map(|(&xi, (&lb, &ub))| {
            let mut value = xi;
            if xi <= lb {
                value = if rstep == 0.0 {
                    lb + f64::EPSILON * lb.abs().max(f64::MIN_POSITIVE)
                } else {
                    lb + rstep * lb.abs().max(1.0)
                };
            } else if xi >= ub {
                value = if rstep == 0.0 {
                    ub - f64::EPSILON * ub.abs().max(f64::MIN_POSITIVE)
                } else {
                    ub - rstep * ub.abs().max(1.0)
                };
            }
            if value < lb || value > ub {
                value = 0.5 * (lb + ub);
            }
            value
        })
        .collect()
}

fn update_radius(
    delta: f64,
    actual_reduction: f64,
    predicted_reduction: f64,
    step_norm: f64,
    bound_hit: bool,
) -> (f64, f64) {
    let ratio = if predicted_reduction > 0.0 {
        actual_reduction / predicted_reduction
    } else if predicted_reduction == actual_reduction {
        1.0
    } else {
        0.0
    };
    if ratio < 0.25 {
        (0.25 * step_norm, ratio)
    } else if ratio > 0.75 && bound_hit {
        (2.0 * delta, ratio)
    } else {
        (delta, ratio)
    }
}

fn check_termination(
    d_cost: f64,
    cost: f64,
    step_norm: f64,
    x_norm: f64,
    ratio: f64,
    ftol: f64,
    xtol: f64,
) -> Option<TrfStatus> {
    let ftol_satisfied = d_cost < ftol * cost && ratio > 0.25;
    let xtol_satisfied = step_norm < xtol * (xtol + x_norm);
    match (ftol_satisfied, xtol_satisfied) {
        (true, true) => Some(TrfStatus::FunctionAndStep),
        (true, false) => Some(TrfStatus::Function),
        (false, true) => Some(TrfStatus::Step),
        (false, false) => None,
    }
}

/// SVD of the augmented system `[J_h; diag(sqrt(diag_h))]` and the projected residual
struct Subproblem {
    uf: Vec<f64>,
    s: Vec<f64>,
    v: DMatrix<f64>,
    full_rank: bool,
}

impl Subproblem {
    fn new(j_h: &DMatrix<f64>, diag_h: &[f64], f: &[f64]) -> Option<Self> {
        let (m, n) = j_h.shape();
        let augmented = DMatrix::from_fn(m + n, n, |r, c| {
            if r < m {
                j_h[(r, c)]
            } else if r - m == c {
                diag_h[c].sqrt()
            } else {
                0.0
            }
        });
        let f_augmented = DVector::from_fn(m + n, |r, _| if r < m { f[r] } else { 0.0 });

        let svd = augmented.try_svd(true, true, f64::EPSILON, 0)?;
        let u = svd.u?;
        let v_t = svd.v_t?;
        let s: Vec<f64> = svd.singular_values.iter().copied().collect();
        let uf: Vec<f64> = (u.transpose() * f_augmented).iter().copied().collect();

        let s_max = s.iter().copied().fold(0.0, f64::max);
        let s_min = s.iter().copied().fold(f64::INFINITY, f64::min);
        let full_rank = m >= n && s_min > f64::EPSILON * m as f64 * s_max;

        Some(Subproblem {
            uf,
            s,
            v: v_t.transpose(),
            full_rank,
        })
    }

    fn phi_and_derivative(&self, alpha: f64, suf: &[f64], delta: f64) -> (f64, f64) {
        let mut p_norm_sq = 0.0;
        let mut sum = 0.0;
        for (si, sufi) in self.s.iter().zip(suf) {
            let denom = si * si + alpha;
            p_norm_sq += (sufi / denom).powi(2);
            sum += sufi * sufi / denom.powi(3);
        }
        let p_norm = p_norm_sq.sqrt();
        (p_norm - delta, -sum / p_norm)
    }

    fn combine(&self, coefficients: &[f64]) -> Vec<f64> {
        let p = &self.v * DVector::from_column_slice(coefficients);
        p.iter().map(|value| -value).collect()
    }

    /// Minimizer of the augmented quadratic within radius `delta`, and the
    /// Levenberg–Marquardt parameter that produced it
    fn solve(&self, delta: f64, initial_alpha: f64) -> (Vec<f64>, f64) {
        let suf: Vec<f64> = self.s.iter().zip(&self.uf).map(|(s, u)| s * u).collect();

        if self.full_rank {
            let coefficients: Vec<f64> =
                self.uf.iter().zip(&self.s).map(|(u, s)| u / s).collect();
            let p = self.combine(&coefficients);
            if norm(&p) <= delta {
                return (p, 0.0);
            }
        }

        let suf_norm = norm(&suf);
        if suf_norm == 0.0 {
            return (vec![0.0; self.v.nrows()], initial_alpha);
        }
        let mut alpha_upper = suf_norm / delta;
        let mut alpha_lower = if self.full_rank {
            let (phi, phi_prime) = self.phi_and_derivative(0.0, &suf, delta);
            -phi / phi_prime
        } else {
            0.0
        };
        let reseed = |lower: f64, upper: f64| (0.001 * upper).max((lower * upper).sqrt());

        let mut alpha = if !self.full_rank && initial_alpha == 0.0 {
            reseed(alpha_lower, alpha_upper)
        } else {
            initial_alpha
        };
        for _ in 0..10 {
            if alpha < alpha_lower || alpha > alpha_upper {
                alpha = reseed(alpha_lower, alpha_upper);
            }
            let (phi, phi_prime) = self.phi_and_derivative(alpha, &suf, delta);
            if phi < 0.0 {
                alpha_upper = alpha;
            }
            let ratio = phi / phi_prime;
            alpha_lower = alpha_lower.max(alpha - ratio);
            alpha -= (phi + delta) * ratio / delta;
            if phi.abs() < 0.01 * delta {
                break;
            }
        }

        let coefficients: Vec<f64> = self
            .s
            .iter()
            .zip(&suf)
            .map(|(s, sufi)| sufi / (s * s + alpha))
            .collect();
        let mut p = self.combine(&coefficients);
        let p_norm = norm(&p);
        if p_norm > 0.0 {
            p.iter_mut().for_each(|pi| *pi *= delta / p_norm);
        }
        (p, alpha)
    }
}

fn steepest_descent(g_h: &[f64], delta: f64) -> Vec<f64> {
    let g_norm = norm(g_h);
    if g_norm == 0.0 {
        return vec![0.0; g_h.len()];
    }
    g_h.iter().map(|gi| -gi * delta / g_norm).collect()
}

/// Local quadratic model `0.5 s'(J'J + diag)s + g's` in scaled variables
struct Quadratic<'a> {
    j: &'a DMatrix<f64>,
    g: &'a [f64],
    diag: &'a [f64],
}

impl Quadratic<'_> {
    fn apply(&self, s: &[f64]) -> DVector<f64> {
        self.j * DVector::from_column_slice(s)
    }

    fn diag_dot(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(self.diag)
            .zip(b)
            .map(|((ai, di), bi)| ai * di * bi)
            .sum()
    }

    fn evaluate(&self, s: &[f64]) -> f64 {
        let js = self.apply(s);
        0.5 * (js.dot(&js) + self.diag_dot(s, s)) + dot(s, self.g)
    }

    /// Coefficients `(a, b, c)` of `q(s0 + t s) = a t^2 + b t + c`
    fn along(&self, s: &[f64], s0: Option<&[f64]>) -> (f64, f64, f64) {
        let v = self.apply(s);
        let a = 0.5 * (v.dot(&v) + self.diag_dot(s, s));
        let mut b = dot(self.g, s);
        let mut c = 0.0;
        if let Some(s0) = s0 {
            let u = self.apply(s0);
            b += u.dot(&v) + self.diag_dot(s0, s);
            c = 0.5 * (u.dot(&u) + self.diag_dot(s0, s0)) + dot(self.g, s0);
        }
        (a, b, c)
    }
}

fn minimize_quadratic_1d(a: f64, b: f64, lower: f64, upper: f64, c: f64) -> (f64, f64) {
    let mut candidates = vec![lower, upper];
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lower < extremum && extremum < upper {
            candidates.push(extremum);
        }
    }
    candidates
        .into_iter()
        .map(|t| (t, t * (a * t + b) + c))
        .fold((lower, f64::INFINITY), |best, candidate| {
            if candidate.1 < best.1 {
                candidate
            } else {
                best
            }
        })
}

fn in_bounds(x: &[f64], lower: &[f64], upper: &[f64]) -> bool {
    x.iter()
        .zip(lower.iter().zip(upper))
        .all(|(xi, (lb, ub))| xi >= lb && xi <= ub)
}

/// Largest `t` keeping `x + t s` in bounds, and which components hit first
fn step_size_to_bound(x: &[f64], s: &[f64], lower: &[f64], upper: &[f64]) -> (f64, Vec<f64>) {
    let steps: Vec<f64> = (0..x.len())
        .map(|i| {
            if s[i] == 0.0 {
                f64::INFINITY
            } else {
                ((lower[i] - x[i]) / s[i]).max((upper[i] - x[i]) / s[i])
            }
        })
        .collect();
    let min_step = steps.iter().copied().fold(f64::INFINITY, f64::min);
    let hits = steps
        .iter()
        .zip(s)
        .map(|(step, si)| {
            if *step == min_step && *si != 0.0 {
                si.signum()
            } else {
                0.0
            }
        })
        .collect();
    (min_step, hits)
}

/// Parameter `t` at which `x + t s` leaves the ball of radius `delta`
fn trust_region_exit(x: &[f64], s: &[f64], delta: f64) -> Option<f64> {
    let a = dot(s, s);
    if a == 0.0 {
        return None;
    }
    let b = dot(x, s);
    let c = (dot(x, x) - delta * delta).min(0.0);
    let d = (b * b - a * c).sqrt();
    let q = -(b + d.copysign(b));
    if q == 0.0 {
        return Some(0.0);
    }
    Some((q / a).max(c / q))
}

fn scale(v: &mut [f64], factor: f64) {
    v.iter_mut().for_each(|vi| *vi *= factor);
}

#[allow(clippy::too_many_arguments)]
fn select_step(
    x: &[f64],
    model: &Quadratic<'_>,
    mut p: Vec<f64>,
    mut p_h: Vec<f64>,
    d: &[f64],
    delta: f64,
    lower: &[f64],
    upper: &[f64],
    theta: f64,
) -> (Vec<f64>, Vec<f64>, f64) {
    let trial: Vec<f64> = x.iter().zip(&p).map(|(xi, pi)| xi + pi).collect();
    if in_bounds(&trial, lower, upper) {
        let value = model.evaluate(&p_h);
        return (p, p_h, -value);
    }

    let (p_stride, hits) = step_size_to_bound(x, &p, lower, upper);

    // Reflect the components that hit a bound
    let mut r_h: Vec<f64> = p_h
        .iter()
        .zip(&hits)
        .map(|(pi, hit)| if *hit != 0.0 { -pi } else { *pi })
        .collect();
    let mut r: Vec<f64> = d.iter().zip(&r_h).map(|(di, ri)| di * ri).collect();

    scale(&mut p, p_stride);
    scale(&mut p_h, p_stride);
    let on_bound: Vec<f64> = x.iter().zip(&p).map(|(xi, pi)| xi + pi).collect();

    let to_tr = trust_region_exit(&p_h, &r_h, delta).unwrap_or(0.0);
    let (to_bound, _) = step_size_to_bound(&on_bound, &r, lower, upper);
    let r_stride = to_bound.min(to_tr);
    let (r_lower, r_upper) = if r_stride > 0.0 {
        let r_upper = if r_stride == to_bound {
            theta * to_bound
        } else {
            to_tr
        };
        ((1.0 - theta) * p_stride / r_stride, r_upper)
    } else {
        (0.0, -1.0)
    };

    let r_value = if r_lower <= r_upper {
        let (a, b, c) = model.along(&r_h, Some(&p_h));
        let (t, value) = minimize_quadratic_1d(a, b, r_lower, r_upper, c);
        r_h = r_h
            .iter()
            .zip(&p_h)
            .map(|(ri, pi)| ri * t + pi)
            .collect();
        r = d.iter().zip(&r_h).map(|(di, ri)| di * ri).collect();
        value
    } else {
        f64::INFINITY
    };

    // Pull the truncated step strictly inside
    scale(&mut p, theta);
    scale(&mut p_h, theta);
    let p_value = model.evaluate(&p_h);

    let mut ag_h: Vec<f64> = model.g.iter().map(|gi| -gi).collect();
    let ag_norm = norm(&ag_h);
    let ag_value = if ag_norm > 0.0 {
        let ag: Vec<f64> = d.iter().zip(&ag_h).map(|(di, ai)| di * ai).collect();
        let to_tr = delta / ag_norm;
        let (to_bound, _) = step_size_to_bound(x, &ag, lower, upper);
        let limit = if to_bound < to_tr {
            theta * to_bound
        } else {
            to_tr
        };
        let (a, b, _) = model.along(&ag_h, None);
        let (t, value) = minimize_quadratic_1d(a, b, 0.0, limit, 0.0);
        scale(&mut ag_h, t);
        value
    } else {
        f64::INFINITY
    };

    if p_value < r_value && p_value < ag_value {
        (p, p_h, -p_value)
    } else if r_value < p_value && r_value < ag_value {
        (r, r_h, -r_value)
    } else {
        let ag: Vec<f64> = d.iter().zip(&ag_h).map(|(di, ai)| di * ai).collect();
        (ag, ag_h, -ag_value)
    }
}
