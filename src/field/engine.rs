use super::fft::SlabFft;
use super::grid::Grid;
use super::transfer::{TransferFunction, Wavevector};
use crate::comm::Communicator;
use crate::error::{HpfError, Result};
use crate::layout::Layout;
use nalgebra::Vector3;
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::TAU;

/// A scalar field in real space, restricted to this rank's x-slab.
#[derive(Debug, Clone, PartialEq)]
pub struct RealField {
    data: Vec<f64>,
}

impl RealField {
    pub fn zeros(grid: &Grid) -> Self {
        RealField {
            data: vec![0.0; grid.local_len()],
        }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        RealField { data: values }
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.iter_mut().for_each(|v| *v *= factor);
    }

    /// Sum over the cells held by this rank.
    pub fn local_sum(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// A scalar field in spectral space, restricted to this rank's ky-slab.
#[derive(Debug, Clone)]
pub struct SpectralField {
    data: Vec<Complex64>,
}

impl SpectralField {
    pub fn values(&self) -> &[Complex64] {
        &self.data
    }
}

// Routed records: position, sender-local particle index, then the weight
// for projection.
const QUERY_RECORD: usize = 4;
const PROJECT_RECORD: usize = 5;

/// Cloud-in-cell stencil of one particle: lower node per axis and weights of
/// the lower/upper node.
struct Stencil {
    base: [usize; 3],
    weights: [[f64; 2]; 3],
}

/// Owns the distributed grid and every particle<->grid and real<->spectral
/// operation on it.
pub struct FieldEngine {
    grid: Grid,
    fft: SlabFft,
}

impl FieldEngine {
    pub fn new(grid: Grid) -> Self {
        let fft = SlabFft::new(grid.nv);
        FieldEngine { grid, fft }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Lower grid node along every axis, failing for positions outside `[0, L)`.
    pub fn locate(&self, index: usize, position: &Vector3<f64>) -> Result<[usize; 3]> {
        self.locate_owned(self.grid.rank(), index, position)
    }

    /// As [`FieldEngine::locate`] for particle `index` held by rank `owner`.
    fn locate_owned(&self, owner: usize, index: usize, position: &Vector3<f64>) -> Result<[usize; 3]> {
        let mut base = [0; 3];
        for (axis, slot) in base.iter_mut().enumerate() {
            let x = position[axis];
            let length = self.grid.lengths[axis];
            if !(x >= 0.0 && x < length) {
                return Err(HpfError::DomainViolation {
                    rank: owner,
                    axis,
                    index,
                    value: x,
                    length,
                });
            }
            let s = x / self.grid.spacing[axis];
            *slot = (s.floor() as usize) % self.grid.nv;
        }
        Ok(base)
    }

    /// Stencil of a routed record `[x, y, z, index, ..]` sent by rank `owner`.
    fn stencil(&self, owner: usize, record: &[f64]) -> Result<Stencil> {
        let position = Vector3::new(record[0], record[1], record[2]);
        let base = self.locate_owned(owner, record[3] as usize, &position)?;
        let mut weights = [[0.0; 2]; 3];
        for axis in 0..3 {
            let s = position[axis] / self.grid.spacing[axis];
            // clamp guards the x -> L rounding case where floor(s) == nv
            let frac = (s - s.floor()).clamp(0.0, 1.0);
            weights[axis] = [1.0 - frac, frac];
        }
        Ok(Stencil { base, weights })
    }

    /// Visit the stencil nodes that fall in this rank's slab as
    /// `(local cell index, weight)`.
    fn for_local_nodes(&self, stencil: &Stencil, mut visit: impl FnMut(usize, f64)) {
        let n = self.grid.nv;
        let slab = self.grid.local_slab();
        for a in 0..2 {
            let ix = (stencil.base[0] + a) % n;
            if !slab.contains(&ix) {
                continue;
            }
            let xl = ix - slab.start;
            for b in 0..2 {
                let iy = (stencil.base[1] + b) % n;
                for c in 0..2 {
                    let iz = (stencil.base[2] + c) % n;
                    let w = stencil.weights[0][a] * stencil.weights[1][b] * stencil.weights[2][c];
                    visit((xl * n + iy) * n + iz, w);
                }
            }
        }
    }

    /// Scatter-accumulate `weights` at `positions` onto the grid with the
    /// cloud-in-cell kernel. Collective: every rank must call it with its own
    /// particles and a layout built from the same positions.
    pub fn project<C: Communicator>(
        &self,
        comm: &C,
        layout: &Layout,
        positions: &[Vector3<f64>],
        weights: &[f64],
    ) -> Result<RealField> {
        self.check_layout(layout, positions.len())?;
        if weights.len() != positions.len() {
            return Err(HpfError::Collective {
                rank: self.grid.rank(),
                reason: format!(
                    "{} weights for {} positions",
                    weights.len(),
                    positions.len()
                ),
            });
        }

        let send = layout
            .routes()
            .iter()
            .map(|route| {
                let mut out = Vec::with_capacity(PROJECT_RECORD * route.len());
                for &i in route {
                    let p = positions[i];
                    out.extend_from_slice(&[p.x, p.y, p.z, i as f64, weights[i]]);
                }
                out
            })
            .collect();
        let received = comm.exchange(send)?;

        let mut field = RealField::zeros(&self.grid);
        for (owner, data) in received.iter().enumerate() {
            for record in data.chunks_exact(PROJECT_RECORD) {
                let stencil = self.stencil(owner, record)?;
                self.for_local_nodes(&stencil, |cell, w| field.data[cell] += record[4] * w);
            }
        }
        Ok(field)
    }

    /// Gather `fields` at `positions`; the adjoint of [`FieldEngine::project`].
    /// Returns one vector per field, each with one value per position.
    pub fn interpolate_many<C: Communicator>(
        &self,
        comm: &C,
        layout: &Layout,
        fields: &[&RealField],
        positions: &[Vector3<f64>],
    ) -> Result<Vec<Vec<f64>>> {
        self.check_layout(layout, positions.len())?;
        let n_fields = fields.len();

        let send = layout
            .routes()
            .iter()
            .map(|route| {
                let mut out = Vec::with_capacity(QUERY_RECORD * route.len());
                for &i in route {
                    let p = positions[i];
                    out.extend_from_slice(&[p.x, p.y, p.z, i as f64]);
                }
                out
            })
            .collect();
        let requests = comm.exchange(send)?;

        let mut replies = Vec::with_capacity(requests.len());
        for (owner, data) in requests.iter().enumerate() {
            let mut out = Vec::with_capacity(n_fields * data.len() / QUERY_RECORD);
            for record in data.chunks_exact(QUERY_RECORD) {
                let stencil = self.stencil(owner, record)?;
                for field in fields {
                    let mut value = 0.0;
                    self.for_local_nodes(&stencil, |cell, w| value += field.data[cell] * w);
                    out.push(value);
                }
            }
            replies.push(out);
        }
        let partials = comm.exchange(replies)?;

        let mut values = vec![vec![0.0; positions.len()]; n_fields];
        for (route, partial) in layout.routes().iter().zip(&partials) {
            if partial.len() != n_fields * route.len() {
                return Err(HpfError::Collective {
                    rank: self.grid.rank(),
                    reason: format!(
                        "interpolation reply of {} values for {} particles",
                        partial.len(),
                        route.len()
                    ),
                });
            }
            for (&i, chunk) in route.iter().zip(partial.chunks_exact(n_fields.max(1))) {
                for (f, value) in chunk.iter().enumerate() {
                    values[f][i] += value;
                }
            }
        }
        Ok(values)
    }

    pub fn interpolate<C: Communicator>(
        &self,
        comm: &C,
        layout: &Layout,
        field: &RealField,
        positions: &[Vector3<f64>],
    ) -> Result<Vec<f64>> {
        let mut values = self.interpolate_many(comm, layout, &[field], positions)?;
        Ok(values.remove(0))
    }

    pub fn forward<C: Communicator>(&self, comm: &C, field: &RealField) -> Result<SpectralField> {
        let data = self.fft.forward(comm, &self.grid, &field.data)?;
        Ok(SpectralField { data })
    }

    pub fn inverse<C: Communicator>(&self, comm: &C, field: &SpectralField) -> Result<RealField> {
        let data = self.fft.inverse(comm, &self.grid, &field.data)?;
        Ok(RealField { data })
    }

    /// Multiply every locally held mode by `transfer(k)`.
    pub fn apply_filter<T: TransferFunction + ?Sized>(&self, field: &mut SpectralField, transfer: &T) {
        let grid = &self.grid;
        let n = grid.nv;
        let start = grid.local_slab().start;
        let dk = grid.lengths.map(|l| TAU / l);

        field
            .data
            .par_chunks_mut(grid.plane_len())
            .enumerate()
            .for_each(|(yl, plane)| {
                let (fy, ny) = grid.frequency(start + yl);
                for x in 0..n {
                    let (fx, nx) = grid.frequency(x);
                    for z in 0..n {
                        let (fz, nz) = grid.frequency(z);
                        let mode = Wavevector {
                            k: Vector3::new(fx as f64 * dk.x, fy as f64 * dk.y, fz as f64 * dk.z),
                            nyquist: [nx, ny, nz],
                        };
                        plane[x * n + z] *= transfer.transfer(&mode);
                    }
                }
            });
    }

    fn check_layout(&self, layout: &Layout, n_positions: usize) -> Result<()> {
        if layout.routes().len() != self.grid.size() || layout.n_particles() != n_positions {
            return Err(HpfError::Collective {
                rank: self.grid.rank(),
                reason: format!(
                    "layout for {} particles over {} ranks used with {} particles over {} ranks",
                    layout.n_particles(),
                    layout.routes().len(),
                    n_positions,
                    self.grid.size()
                ),
            });
        }
        Ok(())
    }
}
