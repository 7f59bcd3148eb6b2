//! Model-versus-observation tables and fit metrics

pub mod desk_check;
pub mod statistics;

pub use desk_check::{desk_check, desk_check_series, desk_check_with, DeskCheck, DeskCheckRow};
pub use statistics::{calculate_statistics, FitStatistics};
