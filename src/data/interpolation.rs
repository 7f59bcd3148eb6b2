use serde::{Deserialize, Serialize};

use crate::data::ObservationSeries;
use crate::error::StrError;

/// Continuous-time view of the yearly vulnerable population `P(t)`
///
/// Values between two sampled years are linearly interpolated. Before the first
/// and after the last sample the boundary value is carried, never extrapolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSeries {
    years: Vec<f64>,
    values: Vec<f64>,
}

impl PopulationSeries {
    /// Create an interpolator from matching year and population sequences
    ///
    /// The samples are sorted by year. Fails if the sequences differ in length,
    /// are empty, contain non-finite numbers or repeat a year.
    pub fn new(years: &[f64], values: &[f64]) -> Result<Self, StrError> {
        if years.len() != values.len() {
            return Err(StrError::invalid_input(format!(
                "{} years but {} population values",
                years.len(),
                values.len()
            )));
        }
        if years.is_empty() {
            return Err(StrError::invalid_input("population series is empty"));
        }
        if years.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(StrError::invalid_input(
                "population series contains non-finite values",
            ));
        }

        let mut samples: Vec<(f64, f64)> = years
            .iter()
            .copied()
            .zip(values.iter().copied())
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(pair) = samples.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(StrError::invalid_input(format!(
                "year {} appears more than once in the population series",
                pair[0].0
            )));
        }

        let (years, values) = samples.into_iter().unzip();
        Ok(PopulationSeries { years, values })
    }

    pub fn from_observations(observations: &ObservationSeries) -> Result<Self, StrError> {
        Self::new(&observations.years(), &observations.populations())
    }

    /// `P(t)`, or NaN when `t` is NaN
    #[inline]
    pub fn value_at(&self, t: f64) -> f64 {
        if t.is_nan() {
            return f64::NAN;
        }
        let last = self.years.len() - 1;
        if t <= self.years[0] {
            return self.values[0];
        }
        if t >= self.years[last] {
            return self.values[last];
        }

        // years[hi - 1] <= t < years[hi]
        let hi = self.years.partition_point(|&year| year <= t);
        let lo = hi - 1;
        let (x0, x1) = (self.years[lo], self.years[hi]);
        let (y0, y1) = (self.values[lo], self.values[hi]);
        if t == x0 {
            return y0;
        }
        y0 + (t - x0) / (x1 - x0) * (y1 - y0)
    }

    pub fn years(&self) -> &[f64] {
        &self.years
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> PopulationSeries {
        PopulationSeries::new(
            &[2012.0, 2010.0, 2011.0],
            &[102_000.0, 100_000.0, 101_000.0],
        )
        .unwrap()
    }

    #[test]
    fn knots_are_reproduced_exactly() {
        let s = series();
        assert_eq!(s.value_at(2010.0), 100_000.0);
        assert_eq!(s.value_at(2011.0), 101_000.0);
        assert_eq!(s.value_at(2012.0), 102_000.0);
    }

    #[test]
    fn interpolates_linearly_between_knots() {
        let s = series();
        assert!((s.value_at(2010.5) - 100_500.0).abs() < 1e-9);
        assert!((s.value_at(2011.25) - 101_250.0).abs() < 1e-9);
    }

    #[test]
    fn holds_boundary_values_outside_range() {
        let s = series();
        assert_eq!(s.value_at(1990.0), 100_000.0);
        assert_eq!(s.value_at(2030.0), 102_000.0);
    }

    #[test]
    fn non_finite_times_do_not_panic() {
        let s = series();
        assert!(s.value_at(f64::NAN).is_nan());
        assert_eq!(s.value_at(f64::NEG_INFINITY), 100_000.0);
        assert_eq!(s.value_at(f64::INFINITY), 102_000.0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = PopulationSeries::new(&[2010.0, 2011.0], &[1.0]);
        assert!(matches!(result, Err(StrError::InvalidInput { .. })));
    }

    #[test]
    fn empty_and_duplicate_inputs_are_rejected() {
        assert!(PopulationSeries::new(&[], &[]).is_err());
        assert!(PopulationSeries::new(&[2010.0, 2010.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn single_sample_is_constant() {
        let s = PopulationSeries::new(&[2010.0], &[5.0]).unwrap();
        assert_eq!(s.value_at(2000.0), 5.0);
        assert_eq!(s.value_at(2010.0), 5.0);
        assert_eq!(s.value_at(2020.0), 5.0);
    }
}
