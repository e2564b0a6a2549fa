//! Slab-decomposed 3-D complex FFT.
//!
//! Real-space data lives as `(x_local, y, z)` slabs; spectral data as
//! `(ky_local, kx, kz)` slabs. Forward transforms do the (y, z) planes
//! locally, transpose with one all-to-all, then finish along x. The inverse
//! runs the same path backwards and carries the `1/N³` normalisation.

use super::grid::Grid;
use crate::comm::Communicator;
use crate::error::{HpfError, Result};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub struct SlabFft {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl SlabFft {
    pub fn new(nv: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        SlabFft {
            forward: planner.plan_fft_forward(nv),
            inverse: planner.plan_fft_inverse(nv),
        }
    }

    /// Transform real-space slabs into spectral slabs.
    pub fn forward<C: Communicator>(
        &self,
        comm: &C,
        grid: &Grid,
        real: &[f64],
    ) -> Result<Vec<Complex64>> {
        let n = grid.nv;
        let plane = grid.plane_len();
        let mut planes: Vec<Complex64> = real.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        planes
            .par_chunks_mut(plane)
            .for_each(|p| transform_yz(p, n, &*self.forward));

        let mut spectral = transpose_x_to_y(comm, grid, &planes)?;
        spectral
            .par_chunks_mut(plane)
            .for_each(|p| transform_columns(p, n, &*self.forward));
        Ok(spectral)
    }

    /// Transform spectral slabs back into real-space slabs.
    pub fn inverse<C: Communicator>(
        &self,
        comm: &C,
        grid: &Grid,
        spectral: &[Complex64],
    ) -> Result<Vec<f64>> {
        let n = grid.nv;
        let plane = grid.plane_len();
        let mut columns = spectral.to_vec();
        columns
            .par_chunks_mut(plane)
            .for_each(|p| transform_columns(p, n, &*self.inverse));

        let mut planes = transpose_y_to_x(comm, grid, &columns)?;
        planes
            .par_chunks_mut(plane)
            .for_each(|p| transform_yz(p, n, &*self.inverse));

        let norm = 1.0 / (n * n * n) as f64;
        Ok(planes.iter().map(|c| c.re * norm).collect())
    }
}

/// Transform a contiguous `(a, b)` plane along both of its axes.
fn transform_yz(plane: &mut [Complex64], n: usize, fft: &dyn Fft<f64>) {
    for row in plane.chunks_exact_mut(n) {
        fft.process(row);
    }
    transform_columns(plane, n, fft);
}

/// Transform a contiguous `(a, b)` plane along its leading (strided) axis.
fn transform_columns(plane: &mut [Complex64], n: usize, fft: &dyn Fft<f64>) {
    let mut line = vec![Complex64::new(0.0, 0.0); n];
    for col in 0..n {
        for (a, value) in line.iter_mut().enumerate() {
            *value = plane[a * n + col];
        }
        fft.process(&mut line);
        for (a, value) in line.iter().enumerate() {
            plane[a * n + col] = *value;
        }
    }
}

fn expect_len(comm_rank: usize, src: usize, data: &[f64], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(HpfError::Collective {
            rank: comm_rank,
            reason: format!(
                "transpose from rank {src}: expected {expected} values, got {}",
                data.len()
            ),
        });
    }
    Ok(())
}

/// `(x_local, y, z)` on x-slabs into `(y_local, x, z)` on y-slabs.
fn transpose_x_to_y<C: Communicator>(
    comm: &C,
    grid: &Grid,
    planes: &[Complex64],
) -> Result<Vec<Complex64>> {
    let n = grid.nv;
    let plane = grid.plane_len();
    let my = grid.local_slab();

    let send = (0..grid.size())
        .map(|dst| {
            let ys = grid.slab(dst);
            let mut out = Vec::with_capacity(2 * my.len() * ys.len() * n);
            for xl in 0..my.len() {
                for y in ys.clone() {
                    for c in &planes[xl * plane + y * n..xl * plane + (y + 1) * n] {
                        out.push(c.re);
                        out.push(c.im);
                    }
                }
            }
            out
        })
        .collect();
    let received = comm.exchange(send)?;

    let mut spectral = vec![Complex64::new(0.0, 0.0); my.len() * plane];
    for (src, data) in received.iter().enumerate() {
        let xs = grid.slab(src);
        expect_len(comm.rank(), src, data, 2 * xs.len() * my.len() * n)?;
        let mut values = data.chunks_exact(2);
        for x in xs {
            for yl in 0..my.len() {
                for z in 0..n {
                    if let Some(pair) = values.next() {
                        spectral[yl * plane + x * n + z] = Complex64::new(pair[0], pair[1]);
                    }
                }
            }
        }
    }
    Ok(spectral)
}

/// `(y_local, x, z)` on y-slabs back into `(x_local, y, z)` on x-slabs.
fn transpose_y_to_x<C: Communicator>(
    comm: &C,
    grid: &Grid,
    columns: &[Complex64],
) -> Result<Vec<Complex64>> {
    let n = grid.nv;
    let plane = grid.plane_len();
    let my = grid.local_slab();

    let send = (0..grid.size())
        .map(|dst| {
            let xs = grid.slab(dst);
            let mut out = Vec::with_capacity(2 * my.len() * xs.len() * n);
            for yl in 0..my.len() {
                for x in xs.clone() {
                    for c in &columns[yl * plane + x * n..yl * plane + (x + 1) * n] {
                        out.push(c.re);
                        out.push(c.im);
                    }
                }
            }
            out
        })
        .collect();
    let received = comm.exchange(send)?;

    let mut planes = vec![Complex64::new(0.0, 0.0); my.len() * plane];
    for (src, data) in received.iter().enumerate() {
        let ys = grid.slab(src);
        expect_len(comm.rank(), src, data, 2 * ys.len() * my.len() * n)?;
        let mut values = data.chunks_exact(2);
        for y in ys {
            for xl in 0..my.len() {
                for z in 0..n {
                    if let Some(pair) = values.next() {
                        planes[xl * plane + y * n + z] = Complex64::new(pair[0], pair[1]);
                    }
                }
            }
        }
    }
    Ok(planes)
}
