//! Three-compartment S/T/R model of a vulnerable population, with forward
//! simulation, desk checks against yearly observations and bounded
//! least-squares calibration of the transition rates.
//!
//! ```ignore
//! use strdyn::prelude::*;
//!
//! let observations = ObservationSeries::builder()
//!     .observation_with_deaths(2010, 100_000.0, 500.0, 600.0, 6.0)
//!     .observation_with_deaths(2011, 101_000.0, 520.0, 610.0, 6.0)
//!     .observation_with_deaths(2012, 102_000.0, 540.0, 615.0, 7.0)
//!     .build()?;
//! let params = ParameterSet::estimate(&observations, 2010, 2012, 0.5, TransitionRates::default())?;
//! let calibration = calibrate(&observations, &params, CalibrationOptions::new(2010, 2012))?;
//! let table = desk_check(&observations, &calibration.params, 2010, 2012)?;
//! ```

pub mod analysis;
pub mod data;
pub mod error;
pub mod optimize;
pub mod simulator;

pub use crate::analysis::{calculate_statistics, desk_check, DeskCheck, FitStatistics};
pub use crate::data::estimation;
pub use crate::data::*;
pub use crate::optimize::{calibrate, Calibration, CalibrationOptions, Calibrator};
pub use crate::simulator::{initial_conditions, Simulator, State, StrModel, Trajectory};
pub use error::{ModelWarning, StrError};

pub mod prelude {
    pub mod data {
        pub use crate::data::estimation::{
            equilibrium_fractions, estimate_death_rates, estimate_treatment_ratio,
            linear_series, DEFAULT_PHI,
        };
        pub use crate::data::{
            Observation, ObservationSeries, ParameterSet, PopulationSeries, TransitionRates,
        };
    }
    pub mod simulator {
        pub use crate::simulator::{
            initial_conditions, initial_conditions_with, InitialConditionRule, OdeOptions,
            Simulator, State, StrModel, Trajectory,
        };
    }
    pub mod optimize {
        pub use crate::optimize::{
            calibrate, Bounds, Calibration, CalibrationOptions, Calibrator, Method, Progress,
            StartingPoint, TerminationReason, Trial,
        };
    }

    pub use crate::analysis::{calculate_statistics, desk_check, DeskCheck, FitStatistics};
    pub use crate::data::*;
    pub use crate::error::{ModelWarning, StrError};
    pub use crate::optimize::{
        calibrate, Bounds, Calibration, CalibrationOptions, Calibrator, Method, Progress,
        StartingPoint,
    };
    pub use crate::simulator::{
        initial_conditions, InitialConditionRule, OdeOptions, Simulator, State, StrModel,
    };
}
