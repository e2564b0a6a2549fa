use crate::error::{HpfError, Result};
use nalgebra::Vector3;
use std::ops::Range;

/// Balanced split of `n` planes over `size` ranks.
pub fn slab_ranges(n: usize, size: usize) -> Vec<Range<usize>> {
    (0..size)
        .map(|rank| (rank * n / size)..((rank + 1) * n / size))
        .collect()
}

/// The regular periodic lattice shared by all ranks, and this rank's share of it.
///
/// Real-space fields are split into slabs of x-planes; spectral fields into
/// slabs of ky-planes with the same balanced split.
#[derive(Debug, Clone)]
pub struct Grid {
    pub nv: usize,
    pub lengths: Vector3<f64>,
    pub spacing: Vector3<f64>,
    pub volume: f64,
    pub cell_volume: f64,
    rank: usize,
    slabs: Vec<Range<usize>>,
    plane_owner: Vec<usize>,
}

impl Grid {
    pub fn new(nv: usize, lengths: Vector3<f64>, rank: usize, size: usize) -> Result<Self> {
        if nv < 2 {
            return Err(HpfError::config(format!(
                "grid needs at least 2 points per axis, got {nv}"
            )));
        }
        if lengths.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
            return Err(HpfError::config(format!(
                "box lengths must be positive, got {lengths:?}"
            )));
        }
        if size == 0 || rank >= size {
            return Err(HpfError::config(format!(
                "rank {rank} is not part of a group of size {size}"
            )));
        }

        let slabs = slab_ranges(nv, size);
        let mut plane_owner = vec![0; nv];
        for (owner, slab) in slabs.iter().enumerate() {
            for plane in slab.clone() {
                plane_owner[plane] = owner;
            }
        }

        let volume = lengths.x * lengths.y * lengths.z;
        Ok(Grid {
            nv,
            lengths,
            spacing: lengths / nv as f64,
            volume,
            cell_volume: volume / (nv * nv * nv) as f64,
            rank,
            slabs,
            plane_owner,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.slabs.len()
    }

    pub fn plane_len(&self) -> usize {
        self.nv * self.nv
    }

    pub fn slab(&self, rank: usize) -> Range<usize> {
        self.slabs[rank].clone()
    }

    /// x-planes held by this rank in real space (ky-planes in spectral space).
    pub fn local_slab(&self) -> Range<usize> {
        self.slab(self.rank)
    }

    pub fn local_len(&self) -> usize {
        self.local_slab().len() * self.plane_len()
    }

    pub fn owner_of_plane(&self, plane: usize) -> usize {
        self.plane_owner[plane % self.nv]
    }

    /// Signed FFT frequency index of mode `i`; the Nyquist mode maps to `-n/2`.
    pub fn frequency(&self, i: usize) -> (i64, bool) {
        let n = self.nv as i64;
        let i = i as i64;
        let nyquist = self.nv % 2 == 0 && i == n / 2;
        if 2 * i < n {
            (i, false)
        } else {
            (i - n, nyquist)
        }
    }
}
