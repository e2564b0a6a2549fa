use crate::error::{HpfError, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::ops::Range;

/// Complete initial condition of the run, indexed by global particle index.
#[derive(Debug, Clone)]
pub struct InitialState {
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub types: Vec<usize>,
    pub names: Vec<String>,
}

impl InitialState {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Contiguous global-index range owned by `rank`; the last rank takes the remainder.
pub fn partition_range(n_particles: usize, rank: usize, size: usize) -> Range<usize> {
    let per_rank = n_particles / size;
    let start = rank * per_rank;
    if rank + 1 == size {
        start..n_particles
    } else {
        start..start + per_rank
    }
}

/// Map `x` into `[0, length)`.
pub fn wrap(x: f64, length: f64) -> f64 {
    let wrapped = x.rem_euclid(length);
    // rem_euclid of a tiny negative value rounds up to `length`
    if wrapped >= length {
        0.0
    } else {
        wrapped
    }
}

pub fn wrap_position(position: &mut Vector3<f64>, lengths: &Vector3<f64>) {
    for axis in 0..3 {
        position[axis] = wrap(position[axis], lengths[axis]);
    }
}

/// The particles owned by one rank for the whole run.
#[derive(Debug, Clone)]
pub struct ParticleSet {
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub forces: Vec<Vector3<f64>>,
    pub forces_old: Vec<Vector3<f64>>,
    pub types: Vec<usize>,
    pub indices: Vec<usize>,
    pub names: Vec<String>,
    by_type: Vec<Vec<usize>>,
}

impl ParticleSet {
    /// Take this rank's contiguous share of the initial state.
    pub fn partition(initial: &InitialState, n_types: usize, rank: usize, size: usize) -> Result<Self> {
        let range = partition_range(initial.len(), rank, size);
        let types = initial.types[range.clone()].to_vec();
        if let Some(&bad) = types.iter().find(|&&t| t >= n_types) {
            return Err(HpfError::config(format!(
                "particle type {bad} outside [0, {n_types})"
            )));
        }

        let mut by_type = vec![Vec::new(); n_types];
        for (local, &t) in types.iter().enumerate() {
            by_type[t].push(local);
        }

        let n_local = range.len();
        Ok(ParticleSet {
            positions: initial.positions[range.clone()].to_vec(),
            velocities: initial.velocities[range.clone()].to_vec(),
            forces: vec![Vector3::zeros(); n_local],
            forces_old: vec![Vector3::zeros(); n_local],
            types,
            indices: range.clone().collect(),
            names: initial.names[range].to_vec(),
            by_type,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Local indices of the particles of type `t`.
    pub fn of_type(&self, t: usize) -> &[usize] {
        &self.by_type[t]
    }

    /// Store `forces[k]` as the force on the `k`-th particle of type `t`.
    pub fn set_type_forces(&mut self, t: usize, forces: &[Vector3<f64>]) {
        for (&i, f) in self.by_type[t].iter().zip(forces) {
            self.forces[i] = *f;
        }
    }

    pub fn positions_by_type(&self) -> Vec<Vec<Vector3<f64>>> {
        self.by_type
            .iter()
            .map(|members| members.iter().map(|&i| self.positions[i]).collect())
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        self.positions
            .iter()
            .chain(&self.velocities)
            .all(|v| v.iter().all(|x| x.is_finite()))
    }
}

/// Cubic lattice with `ceil(Np^(1/3))` points per side at half-spacing
/// offsets; particles beyond the lattice are placed uniformly at random.
pub fn uniform_lattice(n_particles: usize, lengths: &Vector3<f64>, seed: u64) -> Vec<Vector3<f64>> {
    let mut n = 1;
    while n * n * n < n_particles {
        n += 1;
    }
    let spacing = lengths / n as f64;
    let coord = |axis: usize, i: usize| (i as f64 + 0.5) * spacing[axis];

    let mut positions = Vec::with_capacity(n_particles);
    'fill: for ix in 0..n {
        for iy in 0..n {
            for iz in 0..n {
                if positions.len() == n_particles {
                    break 'fill;
                }
                positions.push(Vector3::new(coord(0, ix), coord(1, iy), coord(2, iz)));
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    while positions.len() < n_particles {
        positions.push(random_position(&mut rng, lengths));
    }
    for p in &mut positions {
        wrap_position(p, lengths);
    }
    positions
}

pub fn random_positions(n_particles: usize, lengths: &Vector3<f64>, seed: u64) -> Vec<Vector3<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_particles)
        .map(|_| random_position(&mut rng, lengths))
        .collect()
}

fn random_position(rng: &mut StdRng, lengths: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(
        rng.gen::<f64>() * lengths.x,
        rng.gen::<f64>() * lengths.y,
        rng.gen::<f64>() * lengths.z,
    )
}

/// Gaussian velocities with per-particle variance `kT/m`, centre-of-mass
/// velocity removed and rescaled to exactly `3/2 N kT`.
pub fn maxwell_boltzmann(masses: &[f64], kt: f64, seed: u64) -> Vec<Vector3<f64>> {
    let n = masses.len();
    if n == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut velocities: Vec<Vector3<f64>> = masses
        .iter()
        .map(|&m| {
            let std = (kt / m).sqrt();
            let mut draw = || -> f64 { StandardNormal.sample(&mut rng) };
            Vector3::new(draw(), draw(), draw()) * std
        })
        .collect();

    let total_mass: f64 = masses.iter().sum();
    let v_cm = velocities
        .iter()
        .zip(masses)
        .map(|(v, &m)| v * m)
        .sum::<Vector3<f64>>()
        / total_mass;
    for v in &mut velocities {
        *v -= v_cm;
    }

    let kinetic: f64 = velocities
        .iter()
        .zip(masses)
        .map(|(v, &m)| 0.5 * m * v.norm_squared())
        .sum();
    if kinetic > 0.0 {
        let scale = (1.5 * n as f64 * kt / kinetic).sqrt();
        for v in &mut velocities {
            *v *= scale;
        }
    }
    velocities
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn partition_is_disjoint_and_exhaustive() {
        let ranges: Vec<_> = (0..3).map(|r| partition_range(10, r, 3)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn wrap_is_idempotent_at_boundaries() {
        let l = 4.0;
        for x in [0.0, 4.0, -4.0, 3.999999, -1e-17, 7.5, -0.25, 1e6 + 0.1] {
            let once = wrap(x, l);
            assert!((0.0..l).contains(&once), "{x} wrapped to {once}");
            assert_eq!(wrap(once, l), once);
        }
        assert_eq!(wrap(4.0, l), 0.0);
        assert_eq!(wrap(0.0, l), 0.0);
    }

    #[test]
    fn lattice_fills_box_centres() {
        let lengths = Vector3::new(4.0, 4.0, 4.0);
        let positions = uniform_lattice(8, &lengths, 0);
        assert_eq!(positions.len(), 8);
        assert_eq!(positions[0], Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(positions[7], Vector3::new(3.0, 3.0, 3.0));
    }

    #[test]
    fn lattice_tops_up_with_random_positions() {
        let lengths = Vector3::new(2.0, 2.0, 2.0);
        let positions = uniform_lattice(9, &lengths, 1);
        assert_eq!(positions.len(), 9);
        assert!(positions
            .iter()
            .all(|p| p.iter().all(|&x| (0.0..2.0).contains(&x))));
    }

    #[test]
    fn maxwell_boltzmann_hits_target_energy_without_drift() {
        let masses = vec![1.0, 2.0, 1.0, 2.0, 3.0];
        let velocities = maxwell_boltzmann(&masses, 0.7, 42);
        let momentum: Vector3<f64> = velocities.iter().zip(&masses).map(|(v, &m)| v * m).sum();
        assert!(momentum.norm() < 1e-12);
        let kinetic: f64 = velocities
            .iter()
            .zip(&masses)
            .map(|(v, &m)| 0.5 * m * v.norm_squared())
            .sum();
        assert_relative_eq!(kinetic, 1.5 * 5.0 * 0.7, epsilon = 1e-12);
    }

    #[test]
    fn partition_groups_particles_by_type() {
        let initial = InitialState {
            positions: vec![Vector3::zeros(); 4],
            velocities: vec![Vector3::zeros(); 4],
            types: vec![0, 1, 1, 0],
            names: vec!["A".into(), "B".into(), "B".into(), "A".into()],
        };
        let set = ParticleSet::partition(&initial, 2, 1, 2).unwrap();
        assert_eq!(set.indices, vec![2, 3]);
        assert_eq!(set.of_type(0), &[1]);
        assert_eq!(set.of_type(1), &[0]);
        assert!(ParticleSet::partition(&initial, 1, 0, 1).is_err());
    }

    #[test]
    fn type_forces_land_on_their_members() {
        let initial = InitialState {
            positions: vec![Vector3::zeros(); 4],
            velocities: vec![Vector3::zeros(); 4],
            types: vec![1, 0, 1, 0],
            names: vec!["A".into(); 4],
        };
        let mut set = ParticleSet::partition(&initial, 2, 0, 1).unwrap();
        set.set_type_forces(1, &[Vector3::x(), Vector3::y()]);
        set.set_type_forces(0, &[Vector3::z(), -Vector3::x()]);
        assert_eq!(set.forces, vec![Vector3::x(), Vector3::z(), Vector3::y(), -Vector3::x()]);
    }
}
