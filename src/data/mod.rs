pub mod estimation;
pub mod interpolation;
pub mod observation;
pub mod parameters;
pub use interpolation::PopulationSeries;
pub use observation::{Deaths, Observation, ObservationSeries, ObservationSeriesBuilder};
pub use parameters::{ParameterSet, TransitionRates};
