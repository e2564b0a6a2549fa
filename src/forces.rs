//! Particle positions -> filtered densities -> potentials -> force fields -> particle forces.

use crate::comm::Communicator;
use crate::error::Result;
use crate::field::{FieldEngine, GaussianFilter, NegativeGradient, RealField};
use crate::layout::Layout;
use crate::particles::ParticleSet;
use crate::potential::ExternalPotential;
use nalgebra::Vector3;
use std::borrow::Cow;
use tracing::debug;

/// Per-type density, potential and force fields from the latest refresh.
pub struct FieldUpdater {
    /// Filtered densities `φ_t`.
    pub phi: Vec<RealField>,
    /// Per-type force fields, one per axis.
    pub force: Vec<[RealField; 3]>,
    v_pot: Vec<RealField>,
    v_pot_current: bool,
    filter: GaussianFilter,
}

impl FieldUpdater {
    pub fn new(engine: &FieldEngine, n_types: usize, filter: GaussianFilter) -> Self {
        let zeros = || RealField::zeros(engine.grid());
        FieldUpdater {
            phi: (0..n_types).map(|_| zeros()).collect(),
            force: (0..n_types).map(|_| [zeros(), zeros(), zeros()]).collect(),
            v_pot: (0..n_types).map(|_| zeros()).collect(),
            v_pot_current: false,
            filter,
        }
    }

    pub fn filter(&self) -> &GaussianFilter {
        &self.filter
    }

    pub fn n_types(&self) -> usize {
        self.phi.len()
    }

    /// Recompute every field from the current positions.
    ///
    /// All densities are rebuilt before any potential is evaluated, and all
    /// force fields of every type and axis are replaced before returning.
    /// With `compute_potential` the filtered potential is also kept in real
    /// space for the pressure.
    pub fn refresh_fields<C: Communicator>(
        &mut self,
        comm: &C,
        engine: &FieldEngine,
        layouts: &[Layout],
        positions_by_type: &[Vec<Vector3<f64>>],
        functional: &dyn ExternalPotential,
        compute_potential: bool,
    ) -> Result<()> {
        let inv_cell_volume = 1.0 / engine.grid().cell_volume;

        let mut phi = Vec::with_capacity(self.n_types());
        for (layout, positions) in layouts.iter().zip(positions_by_type) {
            let ones = vec![1.0; positions.len()];
            let mut density = engine.project(comm, layout, positions, &ones)?;
            density.scale(inv_cell_volume);
            let mut spectral = engine.forward(comm, &density)?;
            engine.apply_filter(&mut spectral, &self.filter);
            phi.push(engine.inverse(comm, &spectral)?);
        }
        self.phi = phi;

        let mut force = Vec::with_capacity(self.n_types());
        let mut v_pot = Vec::with_capacity(self.n_types());
        for t in 0..self.n_types() {
            let potential = functional.potential_field(t, &self.phi);
            let mut v_fft = engine.forward(comm, &potential)?;
            engine.apply_filter(&mut v_fft, &self.filter);

            let gradient = |axis: usize| -> Result<RealField> {
                let mut derivative = v_fft.clone();
                engine.apply_filter(&mut derivative, &NegativeGradient { axis });
                engine.inverse(comm, &derivative)
            };
            force.push([gradient(0)?, gradient(1)?, gradient(2)?]);

            if compute_potential {
                v_pot.push(engine.inverse(comm, &v_fft)?);
            }
        }
        self.force = force;
        self.v_pot_current = compute_potential;
        if compute_potential {
            self.v_pot = v_pot;
        }

        if comm.is_root() {
            debug!(compute_potential, "fields refreshed");
        }
        Ok(())
    }

    /// Filtered potentials matching the current densities, materialised on
    /// demand when the last refresh skipped them.
    pub fn potential_fields<C: Communicator>(
        &self,
        comm: &C,
        engine: &FieldEngine,
        functional: &dyn ExternalPotential,
    ) -> Result<Cow<'_, [RealField]>> {
        if self.v_pot_current {
            return Ok(Cow::Borrowed(&self.v_pot));
        }
        let mut fields = Vec::with_capacity(self.n_types());
        for t in 0..self.n_types() {
            let potential = functional.potential_field(t, &self.phi);
            let mut v_fft = engine.forward(comm, &potential)?;
            engine.apply_filter(&mut v_fft, &self.filter);
            fields.push(engine.inverse(comm, &v_fft)?);
        }
        Ok(Cow::Owned(fields))
    }

    /// Read the force fields at the particle positions into `particles.forces`.
    /// A particle of type `t` only ever reads the fields of type `t`.
    pub fn interpolate_forces<C: Communicator>(
        &self,
        comm: &C,
        engine: &FieldEngine,
        layouts: &[Layout],
        positions_by_type: &[Vec<Vector3<f64>>],
        particles: &mut ParticleSet,
    ) -> Result<()> {
        for (t, (layout, positions)) in layouts.iter().zip(positions_by_type).enumerate() {
            let [fx, fy, fz] = &self.force[t];
            let values = engine.interpolate_many(comm, layout, &[fx, fy, fz], positions)?;
            let forces: Vec<Vector3<f64>> = (0..positions.len())
                .map(|k| Vector3::new(values[0][k], values[1][k], values[2][k]))
                .collect();
            particles.set_type_forces(t, &forces);
        }
        Ok(())
    }
}
