use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
    #[error("Year {year} is not present in the observation series")]
    MissingYear { year: i32 },
    #[error("No observations between {start} and {end}")]
    EmptyWindow { start: i32, end: i32 },
    #[error("Inconsistent parameters: {reason}")]
    ParameterInconsistency { reason: String },
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("Integration failed at t = {time}: {reason}")]
    IntegrationFailure { time: f64, reason: String },
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] argmin::core::Error),
}

impl StrError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        StrError::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Compartment of the model state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compartment {
    Susceptible,
    Treatment,
    Recovered,
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compartment::Susceptible => write!(f, "S"),
            Compartment::Treatment => write!(f, "T"),
            Compartment::Recovered => write!(f, "R"),
        }
    }
}

/// Non-fatal conditions detected while building parameters or initial states.
///
/// Warnings are returned next to the value they concern and mirrored to the
/// `tracing` log with [`ModelWarning::emit`]; they never abort a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelWarning {
    /// A derived initial compartment was negative and has been set to zero
    NegativeStateClamped {
        compartment: Compartment,
        year: i32,
        value: f64,
    },
    /// `psi = 1 - m - phi*m` fell outside `[0, 1]`
    PsiOutOfRange { psi: f64, m: f64, phi: f64 },
    /// `delta` differs from `delta_s + delta_n` by more than the tolerance
    DeathRateMismatch {
        delta: f64,
        delta_s: f64,
        delta_n: f64,
    },
    /// More than half of the vulnerable population would be in treatment
    HighTreatmentRatio { m: f64 },
}

impl ModelWarning {
    pub fn emit(&self) {
        tracing::warn!("{}", self);
    }
}

impl fmt::Display for ModelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelWarning::NegativeStateClamped {
                compartment,
                year,
                value,
            } => write!(
                f,
                "initial {} at year {} was {:.4}, clamped to 0",
                compartment, year, value
            ),
            ModelWarning::PsiOutOfRange { psi, m, phi } => write!(
                f,
                "psi = {:.6} is outside [0, 1] (m = {:.6}, phi = {:.6})",
                psi, m, phi
            ),
            ModelWarning::DeathRateMismatch {
                delta,
                delta_s,
                delta_n,
            } => write!(
                f,
                "delta = {:.8} differs from delta_s + delta_n = {:.8}",
                delta,
                delta_s + delta_n
            ),
            ModelWarning::HighTreatmentRatio { m } => {
                write!(f, "m = {:.4} puts more than 50% of P in treatment", m)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_render_the_offending_values() {
        let warning = ModelWarning::NegativeStateClamped {
            compartment: Compartment::Susceptible,
            year: 2010,
            value: -12.5,
        };
        assert_eq!(
            warning.to_string(),
            "initial S at year 2010 was -12.5000, clamped to 0"
        );

        let warning = ModelWarning::HighTreatmentRatio { m: 0.75 };
        assert!(warning.to_string().contains("0.7500"));
    }

    #[test]
    fn errors_describe_the_failure() {
        let err = StrError::MissingYear { year: 1999 };
        assert_eq!(
            err.to_string(),
            "Year 1999 is not present in the observation series"
        );
        let err = StrError::invalid_input("years and populations differ in length");
        assert!(err.to_string().starts_with("Invalid input"));
    }
}
