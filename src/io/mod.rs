//! Logging setup and trajectory sinks

pub mod output;
pub mod trajectory;

pub use output::setup_output;
pub use trajectory::{EnergyLog, MemoryTrajectory, TrajectorySink, XyzTrajectory};
