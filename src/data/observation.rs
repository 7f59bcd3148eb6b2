//! Yearly observations of the vulnerable population and the treated cohort
//!
//! [`ObservationSeries`] is the read-only input of every model evaluation. It
//! is validated once on construction so the simulator and the calibrator can
//! rely on its invariants:
//!
//! - years strictly increasing
//! - all values finite and non-negative
//! - `outcome_observed <= population`

use serde::{Deserialize, Serialize};

use crate::error::StrError;

/// Raw death counts for a single year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deaths {
    /// Deaths from all causes
    pub total: f64,
    /// Deaths by suicide
    pub suicide: f64,
}

/// A single row of the observation table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    year: i32,
    population: f64,
    outcome_observed: f64,
    deaths: Option<Deaths>,
}

impl Observation {
    pub fn new(year: i32, population: f64, outcome_observed: f64) -> Self {
        Observation {
            year,
            population,
            outcome_observed,
            deaths: None,
        }
    }

    pub fn with_deaths(mut self, total: f64, suicide: f64) -> Self {
        self.deaths = Some(Deaths { total, suicide });
        self
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Exogenous vulnerable population `P`
    pub fn population(&self) -> f64 {
        self.population
    }

    /// Observed size of the treatment compartment `T_obs`
    pub fn outcome_observed(&self) -> f64 {
        self.outcome_observed
    }

    pub fn deaths(&self) -> Option<&Deaths> {
        self.deaths.as_ref()
    }

    fn validate(&self) -> Result<(), StrError> {
        let fields = [
            ("population", self.population),
            ("outcome_observed", self.outcome_observed),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(StrError::invalid_input(format!(
                    "{} in year {} must be finite and non-negative, got {}",
                    name, self.year, value
                )));
            }
        }
        if self.outcome_observed > self.population {
            return Err(StrError::invalid_input(format!(
                "outcome_observed ({}) exceeds population ({}) in year {}",
                self.outcome_observed, self.population, self.year
            )));
        }
        if let Some(deaths) = &self.deaths {
            if !deaths.total.is_finite() || deaths.total < 0.0 {
                return Err(StrError::invalid_input(format!(
                    "total deaths in year {} must be finite and non-negative",
                    self.year
                )));
            }
            if !deaths.suicide.is_finite() || deaths.suicide < 0.0 {
                return Err(StrError::invalid_input(format!(
                    "suicide deaths in year {} must be finite and non-negative",
                    self.year
                )));
            }
            if deaths.suicide > deaths.total {
                return Err(StrError::invalid_input(format!(
                    "suicide deaths exceed total deaths in year {}",
                    self.year
                )));
            }
        }
        Ok(())
    }
}

/// Validated, year-ordered observation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSeries {
    rows: Vec<Observation>,
}

impl ObservationSeries {
    /// Build a series from unordered rows.
    ///
    /// Rows are sorted by year; duplicate years and invalid values are rejected.
    pub fn new(mut rows: Vec<Observation>) -> Result<Self, StrError> {
        rows.sort_by_key(|row| row.year);
        for row in &rows {
            row.validate()?;
        }
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].year == pair[1].year) {
            return Err(StrError::invalid_input(format!(
                "year {} appears more than once",
                pair[0].year
            )));
        }
        Ok(ObservationSeries { rows })
    }

    pub fn builder() -> ObservationSeriesBuilder {
        ObservationSeriesBuilder { rows: Vec::new() }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_year(&self) -> Option<i32> {
        self.rows.first().map(|row| row.year)
    }

    pub fn last_year(&self) -> Option<i32> {
        self.rows.last().map(|row| row.year)
    }

    /// Row for an exact year
    pub fn get(&self, year: i32) -> Option<&Observation> {
        self.rows
            .binary_search_by_key(&year, |row| row.year)
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Like [`ObservationSeries::get`], failing with [`StrError::MissingYear`]
    pub fn require(&self, year: i32) -> Result<&Observation, StrError> {
        self.get(year).ok_or(StrError::MissingYear { year })
    }

    /// Rows with `start <= year <= end`
    pub fn window(&self, start: i32, end: i32) -> &[Observation] {
        let from = self.rows.partition_point(|row| row.year < start);
        let to = self.rows.partition_point(|row| row.year <= end);
        if from >= to {
            return &[];
        }
        &self.rows[from..to]
    }

    /// Like [`ObservationSeries::window`], failing with [`StrError::EmptyWindow`]
    pub fn require_window(&self, start: i32, end: i32) -> Result<&[Observation], StrError> {
        if start > end {
            return Err(StrError::invalid_input(format!(
                "window start {} is after window end {}",
                start, end
            )));
        }
        let rows = self.window(start, end);
        if rows.is_empty() {
            return Err(StrError::EmptyWindow { start, end });
        }
        Ok(rows)
    }

    pub fn years(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.year as f64).collect()
    }

    pub fn populations(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.population).collect()
    }
}

pub struct ObservationSeriesBuilder {
    rows: Vec<Observation>,
}

impl ObservationSeriesBuilder {
    pub fn observation(mut self, year: i32, population: f64, outcome_observed: f64) -> Self {
        self.rows
            .push(Observation::new(year, population, outcome_observed));
        self
    }

    pub fn observation_with_deaths(
        mut self,
        year: i32,
        population: f64,
        outcome_observed: f64,
        deaths_total: f64,
        deaths_suicide: f64,
    ) -> Self {
        self.rows.push(
            Observation::new(year, population, outcome_observed)
                .with_deaths(deaths_total, deaths_suicide),
        );
        self
    }

    pub fn build(self) -> Result<ObservationSeries, StrError> {
        ObservationSeries::new(self.rows)
    }
}
