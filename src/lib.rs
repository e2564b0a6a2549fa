//! Distributed hybrid particle-field molecular dynamics.
//!
//! Particles interact only through smoothed density fields on a periodic
//! grid. Each rank owns a fixed share of the particles and an x-slab of the
//! grid; densities are projected with cloud-in-cell weights, filtered and
//! differentiated in Fourier space, and read back as forces.

pub mod comm;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod field;
pub mod forces;
pub mod integrator;
pub mod io;
pub mod layout;
pub mod particles;
pub mod potential;
pub mod run_md;
pub mod thermostat;

pub use comm::{Communicator, ProcessGroup, SingleProcess, ThreadComm};
#[cfg(feature = "mpi")]
pub use comm::MpiComm;
pub use config::SimConfig;
pub use diagnostics::Frame;
pub use error::{HpfError, Result};
pub use run_md::Simulation;
