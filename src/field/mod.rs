//! Distributed grid fields and the spectral operations on them.

mod engine;
mod fft;
mod grid;
mod transfer;

pub use engine::{FieldEngine, RealField, SpectralField};
pub use grid::{slab_ranges, Grid};
pub use transfer::{GaussianFilter, NegativeGradient, TransferFunction, VirialTransfer, Wavevector};
