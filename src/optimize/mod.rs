pub mod calibration;
pub mod mesh;
pub mod objective;
pub mod trf;

pub use calibration::{
    calibrate, Bounds, Calibration, CalibrationOptions, Calibrator, Method, Progress,
    StartingPoint, TerminationReason,
};
pub use mesh::{MeshPoint, MeshSearch};
pub use objective::{CalibrationProblem, Trial, DEFAULT_SENTINEL};
