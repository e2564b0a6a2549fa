//! Routing of particle contributions to the ranks owning their grid cells.
//!
//! A layout only says which rank must see which locally held particle for one
//! project/interpolate cycle. Particle ownership never moves.

use crate::error::{HpfError, Result};
use crate::field::FieldEngine;
use nalgebra::Vector3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    // routes[rank] = indices into the positions the layout was built from
    routes: Vec<Vec<usize>>,
    n_particles: usize,
}

impl Layout {
    pub fn routes(&self) -> &[Vec<usize>] {
        &self.routes
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    /// Number of (particle, rank) pairs that cross to another rank.
    pub fn remote_count(&self, rank: usize) -> usize {
        self.routes
            .iter()
            .enumerate()
            .filter(|(owner, _)| *owner != rank)
            .map(|(_, route)| route.len())
            .sum()
    }
}

/// Builds one layout per particle type from freshly integrated positions.
#[derive(Debug, Clone)]
pub struct LayoutManager {
    n_types: usize,
}

impl LayoutManager {
    pub fn new(n_types: usize) -> Self {
        LayoutManager { n_types }
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    /// Layout for a single set of positions. A particle is routed to every
    /// rank whose x-slab holds one of its two stencil planes.
    pub fn decompose(&self, engine: &FieldEngine, positions: &[Vector3<f64>]) -> Result<Layout> {
        let grid = engine.grid();
        let mut routes = vec![Vec::new(); grid.size()];
        for (i, position) in positions.iter().enumerate() {
            let base = engine.locate(i, position)?;
            let lower = grid.owner_of_plane(base[0]);
            let upper = grid.owner_of_plane(base[0] + 1);
            routes[lower].push(i);
            if upper != lower {
                routes[upper].push(i);
            }
        }
        Ok(Layout {
            routes,
            n_particles: positions.len(),
        })
    }

    /// One layout per type, `positions_by_type[t]` holding the positions of type `t`.
    pub fn decompose_types(
        &self,
        engine: &FieldEngine,
        positions_by_type: &[Vec<Vector3<f64>>],
    ) -> Result<Vec<Layout>> {
        if positions_by_type.len() != self.n_types {
            return Err(HpfError::config(format!(
                "positions for {} types, layout manager expects {}",
                positions_by_type.len(),
                self.n_types
            )));
        }
        positions_by_type
            .iter()
            .map(|positions| self.decompose(engine, positions))
            .collect()
    }
}
