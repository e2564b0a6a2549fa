//! Read-only global observables. Every function here is collective.

use crate::comm::Communicator;
use crate::error::{HpfError, Result};
use crate::field::{FieldEngine, RealField, VirialTransfer};
use crate::forces::FieldUpdater;
use crate::particles::ParticleSet;
use crate::potential::ExternalPotential;
use itertools::izip;
use nalgebra::Vector3;

/// `Σ ½ m v²` over all ranks.
pub fn kinetic_energy<C: Communicator>(comm: &C, particles: &ParticleSet, masses: &[f64]) -> Result<f64> {
    let local: f64 = particles
        .velocities
        .iter()
        .zip(&particles.types)
        .map(|(v, &t)| 0.5 * masses[t] * v.norm_squared())
        .sum();
    comm.all_reduce_scalar(local)
}

/// `Σ_cells w(φ) dV` over all ranks.
pub fn potential_energy<C: Communicator>(
    comm: &C,
    engine: &FieldEngine,
    fields: &FieldUpdater,
    functional: &dyn ExternalPotential,
) -> Result<f64> {
    let local = functional.energy_field(&fields.phi).local_sum() * engine.grid().cell_volume;
    comm.all_reduce_scalar(local)
}

/// Diagonal of the field pressure tensor:
/// `P_d = Σ_cells [−w(φ) + Σ_t φ_t (V_t + σ² ∂²V_t/∂x_d²)] dV / V`.
///
/// Same sign convention as [`kinetic_pressure`]; the two add up to the total.
pub fn pressure<C: Communicator>(
    comm: &C,
    engine: &FieldEngine,
    fields: &FieldUpdater,
    functional: &dyn ExternalPotential,
) -> Result<Vector3<f64>> {
    let potentials = fields.potential_fields(comm, engine, functional)?;
    let dot = |a: &RealField, b: &RealField| -> f64 {
        a.values().iter().zip(b.values()).map(|(x, y)| x * y).sum()
    };

    let mut isotropic = -functional.energy_field(&fields.phi).local_sum();
    for (v, phi) in potentials.iter().zip(&fields.phi) {
        isotropic += dot(v, phi);
    }

    let mut local = [isotropic; 3];
    for (v, phi) in potentials.iter().zip(&fields.phi) {
        let spectral = engine.forward(comm, v)?;
        for (axis, slot) in local.iter_mut().enumerate() {
            let mut virial = spectral.clone();
            engine.apply_filter(
                &mut virial,
                &VirialTransfer {
                    filter: *fields.filter(),
                    axis,
                },
            );
            *slot += dot(&engine.inverse(comm, &virial)?, phi);
        }
    }

    let grid = engine.grid();
    let scale = grid.cell_volume / grid.volume;
    let total = comm.all_reduce_sum(&local.map(|p| p * scale))?;
    Ok(Vector3::new(total[0], total[1], total[2]))
}

/// Kinetic contribution `Σ m v_d² / V` per axis.
pub fn kinetic_pressure<C: Communicator>(
    comm: &C,
    particles: &ParticleSet,
    masses: &[f64],
    volume: f64,
) -> Result<Vector3<f64>> {
    let mut local = [0.0; 3];
    for (v, &t) in particles.velocities.iter().zip(&particles.types) {
        for (axis, slot) in local.iter_mut().enumerate() {
            *slot += masses[t] * v[axis] * v[axis] / volume;
        }
    }
    let total = comm.all_reduce_sum(&local)?;
    Ok(Vector3::new(total[0], total[1], total[2]))
}

/// `T = 2 E_kin / (3 kB Np)`.
pub fn temperature(kinetic: f64, k_boltzmann: f64, n_particles: usize) -> f64 {
    2.0 * kinetic / (3.0 * k_boltzmann * n_particles as f64)
}

/// `Σ m v` over all ranks.
pub fn center_of_mass_momentum<C: Communicator>(
    comm: &C,
    particles: &ParticleSet,
    masses: &[f64],
) -> Result<Vector3<f64>> {
    let local = particles
        .velocities
        .iter()
        .zip(&particles.types)
        .map(|(v, &t)| v * masses[t])
        .sum::<Vector3<f64>>();
    let total = comm.all_reduce_sum(local.as_slice())?;
    Ok(Vector3::new(total[0], total[1], total[2]))
}

/// Collective divergence check: fails on every rank if any rank holds a
/// non-finite position or velocity.
pub fn check_finite<C: Communicator>(comm: &C, particles: &ParticleSet, step: usize) -> Result<()> {
    let bad = if particles.is_finite() { 0.0 } else { 1.0 };
    if comm.all_reduce_scalar(bad)? > 0.0 {
        return Err(HpfError::NumericalDivergence {
            rank: comm.rank(),
            step,
        });
    }
    Ok(())
}

/// One output record, assembled on rank 0.
#[derive(Debug, Clone)]
pub struct Frame {
    pub step: usize,
    pub time: f64,
    /// Positions and velocities in global-index order.
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    pub temperature: f64,
    pub momentum: Vector3<f64>,
    pub field_pressure: Vector3<f64>,
    pub kinetic_pressure: Vector3<f64>,
}

impl Frame {
    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy + self.potential_energy
    }

    /// Field plus kinetic pressure per axis.
    pub fn pressure(&self) -> Vector3<f64> {
        self.field_pressure + self.kinetic_pressure
    }
}

/// Gather positions and velocities onto rank 0 in global-index order.
pub fn gather_state<C: Communicator>(
    comm: &C,
    particles: &ParticleSet,
    n_particles: usize,
) -> Result<Option<(Vec<Vector3<f64>>, Vec<Vector3<f64>>)>> {
    let mut buffer = Vec::with_capacity(7 * particles.len());
    for (&index, x, v) in izip!(&particles.indices, &particles.positions, &particles.velocities) {
        buffer.push(index as f64);
        buffer.extend_from_slice(&[x.x, x.y, x.z, v.x, v.y, v.z]);
    }

    let Some(received) = comm.gather(0, buffer)? else {
        return Ok(None);
    };
    let mut positions = vec![Vector3::zeros(); n_particles];
    let mut velocities = vec![Vector3::zeros(); n_particles];
    for record in received.iter().flat_map(|data| data.chunks_exact(7)) {
        let index = record[0] as usize;
        if index >= n_particles {
            return Err(HpfError::Collective {
                rank: comm.rank(),
                reason: format!("gathered particle index {index} out of range"),
            });
        }
        positions[index] = Vector3::new(record[1], record[2], record[3]);
        velocities[index] = Vector3::new(record[4], record[5], record[6]);
    }
    Ok(Some((positions, velocities)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{ProcessGroup, SingleProcess};
    use crate::field::{GaussianFilter, Grid};
    use crate::particles::InitialState;
    use crate::potential::Incompressible;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const UNIT_PENALTY: Incompressible = Incompressible {
        n_types: 1,
        kappa: 1.0,
        phi0: 1.0,
    };

    fn density(phi: impl Fn(f64) -> f64) -> (FieldEngine, FieldUpdater) {
        let engine = FieldEngine::new(Grid::new(8, Vector3::new(4.0, 4.0, 4.0), 0, 1).unwrap());
        let mut fields = FieldUpdater::new(&engine, 1, GaussianFilter::new(0.5));
        let h = engine.grid().spacing.x;
        let values = (0..512).map(|cell| phi((cell / 64) as f64 * h)).collect();
        fields.phi = vec![RealField::from_values(values)];
        (engine, fields)
    }

    fn state() -> InitialState {
        InitialState {
            positions: (0..5).map(|i| Vector3::new(i as f64 * 0.5, 1.0, 2.0)).collect(),
            velocities: (0..5).map(|i| Vector3::new(1.0, -(i as f64), 0.5)).collect(),
            types: vec![0, 1, 0, 1, 1],
            names: vec!["A".into(); 5],
        }
    }

    #[test]
    fn kinetic_energy_and_temperature() {
        let initial = state();
        let particles = ParticleSet::partition(&initial, 2, 0, 1).unwrap();
        let masses = [2.0, 1.0];
        let kinetic = kinetic_energy(&SingleProcess, &particles, &masses).unwrap();
        // type 0: v² = 1.25, 5.25 (mass 2); type 1: 2.25, 10.25, 17.25 (mass 1)
        let expected = (1.25 + 5.25) + 0.5 * (2.25 + 10.25 + 17.25);
        assert_relative_eq!(kinetic, expected, epsilon = 1e-12);
        assert_relative_eq!(temperature(kinetic, 1.0, 5), 2.0 * expected / 15.0);
    }

    #[test]
    fn reductions_do_not_depend_on_rank_count() {
        let initial = state();
        let masses = [2.0, 1.0];
        let serial = ParticleSet::partition(&initial, 2, 0, 1).unwrap();
        let p_serial = center_of_mass_momentum(&SingleProcess, &serial, &masses).unwrap();

        let results = ProcessGroup::run(2, |comm| {
            let particles = ParticleSet::partition(&initial, 2, comm.rank(), comm.size())?;
            let p = center_of_mass_momentum(comm, &particles, &masses)?;
            let gathered = gather_state(comm, &particles, 5)?;
            Ok((p, gathered))
        })
        .unwrap();

        for (p, _) in &results {
            assert_relative_eq!(*p, p_serial, epsilon = 1e-12);
        }
        let (positions, velocities) = results[0].1.clone().unwrap();
        assert_eq!(positions, initial.positions);
        assert_eq!(velocities, initial.velocities);
        assert!(results[1].1.is_none());
    }

    #[test]
    fn divergence_is_reported_with_step() {
        let mut initial = state();
        initial.velocities[3].y = f64::NAN;
        let particles = ParticleSet::partition(&initial, 2, 0, 1).unwrap();
        let err = check_finite(&SingleProcess, &particles, 17).unwrap_err();
        assert!(matches!(err, HpfError::NumericalDivergence { step: 17, .. }));
    }

    #[test]
    fn uniform_density_gives_thermodynamic_pressure() {
        // φ V − w = 2·1 − ½ at φ = 2, φ0 = κ = 1
        let (engine, fields) = density(|_| 2.0);
        let p = pressure(&SingleProcess, &engine, &fields, &UNIT_PENALTY).unwrap();
        for axis in 0..3 {
            assert_relative_eq!(p[axis], 1.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn modulated_density_lowers_pressure_along_the_modulation() {
        let (a, k, sigma) = (0.5, PI / 2.0, 0.5);
        let (engine, fields) = density(|x| 1.0 + a * (k * x).cos());
        let p = pressure(&SingleProcess, &engine, &fields, &UNIT_PENALTY).unwrap();

        let h = (-0.5 * sigma * sigma * k * k).exp();
        assert_relative_eq!(p.y, -0.25 * a * a + 0.5 * a * a * h, epsilon = 1e-12);
        assert_relative_eq!(p.z, p.y, epsilon = 1e-12);
        assert_relative_eq!(p.y - p.x, 0.5 * sigma * sigma * k * k * a * a * h, epsilon = 1e-12);
    }

    #[test]
    fn frame_pressure_adds_kinetic_and_field_parts() {
        let initial = state();
        let particles = ParticleSet::partition(&initial, 2, 0, 1).unwrap();
        let kinetic = kinetic_pressure(&SingleProcess, &particles, &[1.0, 1.0], 2.0).unwrap();
        assert_relative_eq!(kinetic.x, 5.0 / 2.0);
        assert_relative_eq!(kinetic.y, (0.0 + 1.0 + 4.0 + 9.0 + 16.0) / 2.0);

        let frame = Frame {
            step: 0,
            time: 0.0,
            positions: Vec::new(),
            velocities: Vec::new(),
            kinetic_energy: 0.0,
            potential_energy: 0.0,
            temperature: 0.0,
            momentum: Vector3::zeros(),
            field_pressure: Vector3::new(-1.0, 0.5, 0.0),
            kinetic_pressure: kinetic,
        };
        assert_relative_eq!(frame.pressure(), kinetic + Vector3::new(-1.0, 0.5, 0.0));
    }
}
