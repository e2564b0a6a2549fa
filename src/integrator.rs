use crate::particles::{wrap_position, ParticleSet};
use itertools::izip;
use nalgebra::Vector3;

/// Velocity-Verlet with a fixed step size.
///
/// The force buffers are swapped, never recomputed, between the two halves:
/// `step_position` moves the current forces into `forces_old`, the caller
/// fills `forces` at the new positions, then `step_velocity` uses both.
#[derive(Debug, Clone, Copy)]
pub struct VelocityVerlet {
    pub dt: f64,
}

impl VelocityVerlet {
    pub fn new(dt: f64) -> Self {
        VelocityVerlet { dt }
    }

    /// `x ← x + v·dt + ½·(f/m)·dt²`, then wrap into the periodic box.
    pub fn step_position(&self, particles: &mut ParticleSet, masses: &[f64], lengths: &Vector3<f64>) {
        let dt = self.dt;
        let half_dt2 = 0.5 * dt * dt;
        for (x, v, f, &t) in izip!(
            &mut particles.positions,
            &particles.velocities,
            &particles.forces,
            &particles.types
        ) {
            *x += v * dt + f * (half_dt2 / masses[t]);
            wrap_position(x, lengths);
        }
        std::mem::swap(&mut particles.forces, &mut particles.forces_old);
    }

    /// `v ← v + ½·(f + f_old)/m·dt`.
    pub fn step_velocity(&self, particles: &mut ParticleSet, masses: &[f64]) {
        let half_dt = 0.5 * self.dt;
        for (v, f, f_old, &t) in izip!(
            &mut particles.velocities,
            &particles.forces,
            &particles.forces_old,
            &particles.types
        ) {
            *v += (f + f_old) * (half_dt / masses[t]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::InitialState;
    use approx::assert_relative_eq;

    fn single(position: Vector3<f64>, velocity: Vector3<f64>) -> ParticleSet {
        let initial = InitialState {
            positions: vec![position],
            velocities: vec![velocity],
            types: vec![0],
            names: vec!["W".into()],
        };
        ParticleSet::partition(&initial, 1, 0, 1).unwrap()
    }

    #[test]
    fn constant_force_gives_exact_parabola() {
        let lengths = Vector3::new(100.0, 100.0, 100.0);
        let verlet = VelocityVerlet::new(0.1);
        let mut p = single(Vector3::new(50.0, 50.0, 50.0), Vector3::new(1.0, 0.0, 0.0));
        let force = Vector3::new(0.0, 2.0, 0.0);
        let mass = [4.0];
        p.forces[0] = force;

        for _ in 0..10 {
            verlet.step_position(&mut p, &mass, &lengths);
            p.forces[0] = force;
            verlet.step_velocity(&mut p, &mass);
        }
        // t = 1: x = x0 + v t, y = y0 + a t²/2 with a = 0.5
        assert_relative_eq!(p.positions[0].x, 51.0, epsilon = 1e-12);
        assert_relative_eq!(p.positions[0].y, 50.25, epsilon = 1e-12);
        assert_relative_eq!(p.velocities[0].y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn position_step_wraps_and_swaps_buffers() {
        let lengths = Vector3::new(4.0, 4.0, 4.0);
        let verlet = VelocityVerlet::new(1.0);
        let mut p = single(Vector3::new(3.5, 0.2, 1.0), Vector3::new(1.0, -0.5, 0.0));
        p.forces[0] = Vector3::new(0.0, 0.0, 8.0);
        verlet.step_position(&mut p, &[2.0], &lengths);

        assert_relative_eq!(p.positions[0].x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(p.positions[0].y, 3.7, epsilon = 1e-12);
        assert_relative_eq!(p.positions[0].z, 3.0, epsilon = 1e-12);
        assert_eq!(p.forces_old[0], Vector3::new(0.0, 0.0, 8.0));
    }
}
