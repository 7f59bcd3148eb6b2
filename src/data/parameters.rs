use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelWarning, StrError};

/// Maximum tolerated gap between `delta` and `delta_s + delta_n`
pub const DELTA_TOLERANCE: f64 = 1e-6;

/// Treatment ratios above this value are flagged as implausible
const HIGH_TREATMENT_RATIO: f64 = 0.5;

/// The four transition parameters adjusted by calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRates {
    /// Inflow rate from the vulnerable population into S
    pub theta: f64,
    /// Outflow rate from T into R
    pub rho: f64,
    /// Share of the inflow to T caused by social influence
    pub beta: f64,
    /// Factor scaling the inflow to T from other causes
    pub gamma: f64,
}

impl TransitionRates {
    pub const NAMES: [&'static str; 4] = ["theta", "rho", "beta", "gamma"];

    pub fn new(theta: f64, rho: f64, beta: f64, gamma: f64) -> Self {
        TransitionRates {
            theta,
            rho,
            beta,
            gamma,
        }
    }

    /// Starting point used by the bounded calibration preset
    ///
    /// `theta` starts at the non-suicide death rate so that inflow roughly
    /// balances mortality.
    pub fn heuristic(delta_n: f64) -> Self {
        TransitionRates::new(delta_n, 0.1, 0.3, 10.0)
    }

    /// Create from a slice in `[theta, rho, beta, gamma]` order
    pub fn from_slice(values: &[f64]) -> Result<Self, StrError> {
        match values {
            [theta, rho, beta, gamma] => Ok(TransitionRates::new(*theta, *rho, *beta, *gamma)),
            _ => Err(StrError::invalid_input(format!(
                "expected 4 transition rates, got {}",
                values.len()
            ))),
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.theta, self.rho, self.beta, self.gamma]
    }
}

impl Default for TransitionRates {
    fn default() -> Self {
        TransitionRates::new(0.01, 0.1, 0.3, 0.7)
    }
}

/// The ten coefficients governing the model dynamics
///
/// The first six are estimated from historical data (see
/// [`crate::estimation`]); `theta`, `rho`, `beta` and `gamma` are the
/// calibrated transition rates. The record is `Copy` and is handed to every
/// model evaluation by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Total death rate
    pub delta: f64,
    /// Suicide death rate
    pub delta_s: f64,
    /// Non-suicide death rate
    pub delta_n: f64,
    /// Geometric-mean treatment ratio `T_obs / P`
    pub m: f64,
    /// Proportion of T that ends up in R at equilibrium
    pub phi: f64,
    /// Proportion of P resting in S at equilibrium
    pub psi: f64,
    pub theta: f64,
    pub rho: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl ParameterSet {
    /// Assemble a parameter set, deriving `psi = 1 - m - phi*m`
    ///
    /// Inconsistencies are not fatal here; inspect [`ParameterSet::warnings`].
    pub fn new(
        delta: f64,
        delta_s: f64,
        delta_n: f64,
        m: f64,
        phi: f64,
        rates: TransitionRates,
    ) -> Self {
        let params = ParameterSet {
            delta,
            delta_s,
            delta_n,
            m,
            phi,
            psi: 1.0 - m - phi * m,
            theta: rates.theta,
            rho: rates.rho,
            beta: rates.beta,
            gamma: rates.gamma,
        };
        for warning in params.warnings() {
            warning.emit();
        }
        params
    }

    /// Copy of `self` with the transition rates replaced
    pub fn with_rates(self, rates: TransitionRates) -> Self {
        ParameterSet {
            theta: rates.theta,
            rho: rates.rho,
            beta: rates.beta,
            gamma: rates.gamma,
            ..self
        }
    }

    pub fn rates(&self) -> TransitionRates {
        TransitionRates::new(self.theta, self.rho, self.beta, self.gamma)
    }

    /// Soft consistency checks
    pub fn warnings(&self) -> Vec<ModelWarning> {
        let mut warnings = Vec::new();
        if (self.delta - (self.delta_s + self.delta_n)).abs() > DELTA_TOLERANCE {
            warnings.push(ModelWarning::DeathRateMismatch {
                delta: self.delta,
                delta_s: self.delta_s,
                delta_n: self.delta_n,
            });
        }
        if !(0.0..=1.0).contains(&self.psi) {
            warnings.push(ModelWarning::PsiOutOfRange {
                psi: self.psi,
                m: self.m,
                phi: self.phi,
            });
        }
        if self.m > HIGH_TREATMENT_RATIO {
            warnings.push(ModelWarning::HighTreatmentRatio { m: self.m });
        }
        warnings
    }

    /// Hard range checks on every field
    pub fn validate(&self) -> Result<(), StrError> {
        let non_negative = [
            ("delta", self.delta),
            ("delta_s", self.delta_s),
            ("delta_n", self.delta_n),
            ("m", self.m),
            ("theta", self.theta),
            ("rho", self.rho),
            ("gamma", self.gamma),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(StrError::InvalidParameter { name, value });
            }
        }

        let proportions = [("phi", self.phi), ("psi", self.psi), ("beta", self.beta)];
        for (name, value) in proportions {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(StrError::InvalidParameter { name, value });
            }
        }

        if (self.delta - (self.delta_s + self.delta_n)).abs() > DELTA_TOLERANCE {
            return Err(StrError::ParameterInconsistency {
                reason: format!(
                    "delta ({}) must equal delta_s + delta_n ({})",
                    self.delta,
                    self.delta_s + self.delta_n
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Estimated parameters:")?;
        writeln!(f, "  delta   = {:.6}", self.delta)?;
        writeln!(f, "  delta_s = {:.6}", self.delta_s)?;
        writeln!(f, "  delta_n = {:.6}", self.delta_n)?;
        writeln!(f, "  m       = {:.6}", self.m)?;
        writeln!(f, "  phi     = {:.6}", self.phi)?;
        writeln!(f, "  psi     = {:.6}", self.psi)?;
        writeln!(f, "Transition parameters:")?;
        writeln!(f, "  theta   = {:.6}", self.theta)?;
        writeln!(f, "  rho     = {:.6}", self.rho)?;
        writeln!(f, "  beta    = {:.6}", self.beta)?;
        write!(f, "  gamma   = {:.6}", self.gamma)
    }
}
