//! Stochastic velocity rescaling (Bussi, Donadio, Parrinello, J. Chem. Phys.
//! 126, 014101 (2007)).
//!
//! One Gaussian number is drawn per step on rank 0 and broadcast, so every
//! rank applies the same scale factor.

use crate::comm::Communicator;
use crate::diagnostics::kinetic_energy;
use crate::error::{HpfError, Result};
use crate::particles::ParticleSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::warn;

pub struct CsvrThermostat {
    /// Target kinetic energy `3/2 Np kB T0`.
    pub target_kinetic: f64,
    pub tau: f64,
    n_particles: usize,
    rng: StdRng,
}

impl CsvrThermostat {
    pub fn new(target_temperature: f64, k_boltzmann: f64, tau: f64, n_particles: usize, seed: u64) -> Self {
        CsvrThermostat {
            target_kinetic: 1.5 * k_boltzmann * target_temperature * n_particles as f64,
            tau,
            n_particles,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Rescale all velocities towards the target; returns the scale factor.
    pub fn apply<C: Communicator>(
        &mut self,
        comm: &C,
        particles: &mut ParticleSet,
        masses: &[f64],
        dt: f64,
        step: usize,
    ) -> Result<f64> {
        let kinetic = kinetic_energy(comm, particles, masses)?;

        let draw: f64 = if comm.is_root() {
            StandardNormal.sample(&mut self.rng)
        } else {
            0.0
        };
        let noise = comm.broadcast(0, &[draw])?[0];

        let alpha = match self.scale_factor(kinetic, noise, dt) {
            Some(alpha) => alpha,
            None if kinetic == 0.0 => {
                if comm.is_root() {
                    warn!("kinetic energy is zero, velocity rescaling skipped");
                }
                return Ok(1.0);
            }
            None => {
                return Err(HpfError::NumericalDivergence {
                    rank: comm.rank(),
                    step,
                })
            }
        };

        for v in &mut particles.velocities {
            *v *= alpha;
        }
        Ok(alpha)
    }

    /// `α = sqrt(E_target / E_kin)` for a standard-normal `noise`, or `None`
    /// when no finite positive target exists.
    pub fn scale_factor(&self, kinetic: f64, noise: f64, dt: f64) -> Option<f64> {
        if !(kinetic > 0.0) {
            return None;
        }
        let relaxation = (self.target_kinetic - kinetic) * dt / self.tau;
        let wiener = dt.sqrt() * noise;
        let stochastic = 2.0
            * (kinetic * self.target_kinetic / (3.0 * self.n_particles as f64)).sqrt()
            * wiener
            / self.tau.sqrt();
        let target = kinetic + relaxation + stochastic;
        if !(target.is_finite() && target >= 0.0) {
            return None;
        }
        Some((target / kinetic).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{ProcessGroup, SingleProcess};
    use crate::particles::InitialState;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn gas(n: usize) -> InitialState {
        InitialState {
            positions: vec![Vector3::zeros(); n],
            velocities: (0..n)
                .map(|i| Vector3::new(1.0 + i as f64 * 0.1, -0.5, 0.25))
                .collect(),
            types: vec![0; n],
            names: vec!["W".into(); n],
        }
    }

    #[test]
    fn deterministic_part_relaxes_towards_target() {
        let thermostat = CsvrThermostat::new(1.0, 1.0, 0.5, 10, 0);
        // target kinetic = 15
        let alpha = thermostat.scale_factor(10.0, 0.0, 0.1).unwrap();
        assert_relative_eq!(alpha * alpha, (10.0 + 5.0 * 0.1 / 0.5) / 10.0, epsilon = 1e-12);
        let alpha = thermostat.scale_factor(20.0, 0.0, 0.1).unwrap();
        assert!(alpha < 1.0);
    }

    #[test]
    fn zero_kinetic_energy_is_left_alone() {
        let mut initial = gas(4);
        initial.velocities = vec![Vector3::zeros(); 4];
        let mut particles = ParticleSet::partition(&initial, 1, 0, 1).unwrap();
        let mut thermostat = CsvrThermostat::new(1.0, 1.0, 0.5, 4, 0);
        let alpha = thermostat
            .apply(&SingleProcess, &mut particles, &[1.0], 0.01, 0)
            .unwrap();
        assert_eq!(alpha, 1.0);
    }

    #[test]
    fn every_rank_applies_the_same_factor() {
        let initial = gas(7);
        let alphas = ProcessGroup::run(3, |comm| {
            let mut particles = ParticleSet::partition(&initial, 1, comm.rank(), comm.size())?;
            // seeds differ per rank; only rank 0's draw may be used
            let mut thermostat = CsvrThermostat::new(2.0, 1.0, 0.1, 7, comm.rank() as u64 + 11);
            thermostat.apply(comm, &mut particles, &[1.5], 0.01, 0)
        })
        .unwrap();
        assert!(alphas.iter().all(|&a| a == alphas[0]));

        let mut serial = ParticleSet::partition(&initial, 1, 0, 1).unwrap();
        let mut thermostat = CsvrThermostat::new(2.0, 1.0, 0.1, 7, 11);
        let alpha = thermostat
            .apply(&SingleProcess, &mut serial, &[1.5], 0.01, 0)
            .unwrap();
        assert_relative_eq!(alpha, alphas[0], epsilon = 1e-14);
    }
}
