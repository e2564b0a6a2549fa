//! External-potential functionals of the filtered densities.
//!
//! A functional is local in space: at every cell it maps the densities of all
//! types to an energy density `w(φ)` and to a per-type potential
//! `V_t = ∂w/∂φ_t`. Types are coupled through `φ`, so the potential of one
//! type is generally a function of every density.

use crate::field::RealField;

pub trait ExternalPotential: Send + Sync {
    fn n_types(&self) -> usize;

    /// Energy density at a cell with per-type densities `phi`.
    fn energy_density(&self, phi: &[f64]) -> f64;

    /// Potential felt by type `t` at a cell with per-type densities `phi`.
    fn potential(&self, t: usize, phi: &[f64]) -> f64;

    fn energy_field(&self, densities: &[RealField]) -> RealField {
        map_cells(densities, |phi| self.energy_density(phi))
    }

    fn potential_field(&self, t: usize, densities: &[RealField]) -> RealField {
        map_cells(densities, |phi| self.potential(t, phi))
    }
}

fn map_cells(densities: &[RealField], f: impl Fn(&[f64]) -> f64) -> RealField {
    let n_cells = densities.first().map_or(0, |d| d.values().len());
    let mut phi = vec![0.0; densities.len()];
    let values = (0..n_cells)
        .map(|cell| {
            for (slot, density) in phi.iter_mut().zip(densities) {
                *slot = density.values()[cell];
            }
            f(&phi)
        })
        .collect();
    RealField::from_values(values)
}

/// No field interaction; particles move ballistically.
#[derive(Debug, Clone)]
pub struct Ideal {
    pub n_types: usize,
}

impl ExternalPotential for Ideal {
    fn n_types(&self) -> usize {
        self.n_types
    }

    fn energy_density(&self, _phi: &[f64]) -> f64 {
        0.0
    }

    fn potential(&self, _t: usize, _phi: &[f64]) -> f64 {
        0.0
    }
}

/// Penalty on deviations of the total density from `phi0`:
/// `w = (Σφ − φ0)² / (2κφ0)`.
#[derive(Debug, Clone)]
pub struct Incompressible {
    pub n_types: usize,
    pub kappa: f64,
    pub phi0: f64,
}

impl Incompressible {
    fn excess(&self, phi: &[f64]) -> f64 {
        phi.iter().sum::<f64>() - self.phi0
    }
}

impl ExternalPotential for Incompressible {
    fn n_types(&self) -> usize {
        self.n_types
    }

    fn energy_density(&self, phi: &[f64]) -> f64 {
        let excess = self.excess(phi);
        0.5 * excess * excess / (self.kappa * self.phi0)
    }

    fn potential(&self, _t: usize, phi: &[f64]) -> f64 {
        self.excess(phi) / (self.kappa * self.phi0)
    }
}

/// Compressibility penalty plus pairwise Flory-Huggins mixing:
/// `w = (Σφ − φ0)²/(2κφ0) + Σ_{t<s} χ_ts φ_t φ_s / φ0`.
#[derive(Debug, Clone)]
pub struct FloryHuggins {
    pub compressibility: Incompressible,
    /// Symmetric `n_types × n_types` interaction matrix.
    pub chi: Vec<Vec<f64>>,
}

impl ExternalPotential for FloryHuggins {
    fn n_types(&self) -> usize {
        self.compressibility.n_types
    }

    fn energy_density(&self, phi: &[f64]) -> f64 {
        let mut mixing = 0.0;
        for t in 0..phi.len() {
            for s in (t + 1)..phi.len() {
                mixing += self.chi[t][s] * phi[t] * phi[s];
            }
        }
        self.compressibility.energy_density(phi) + mixing / self.compressibility.phi0
    }

    fn potential(&self, t: usize, phi: &[f64]) -> f64 {
        let mixing: f64 = phi
            .iter()
            .enumerate()
            .filter(|&(s, _)| s != t)
            .map(|(s, &p)| self.chi[t][s] * p)
            .sum();
        self.compressibility.potential(t, phi) + mixing / self.compressibility.phi0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn flory_huggins() -> FloryHuggins {
        FloryHuggins {
            compressibility: Incompressible {
                n_types: 2,
                kappa: 0.05,
                phi0: 8.0,
            },
            chi: vec![vec![0.0, 15.0], vec![15.0, 0.0]],
        }
    }

    #[test]
    fn incompressible_vanishes_at_reference_density() {
        let model = Incompressible {
            n_types: 2,
            kappa: 0.1,
            phi0: 2.0,
        };
        assert_eq!(model.energy_density(&[1.5, 0.5]), 0.0);
        assert_eq!(model.potential(0, &[1.5, 0.5]), 0.0);
        assert_relative_eq!(model.potential(1, &[2.0, 1.0]), 5.0);
    }

    #[test]
    fn potential_is_derivative_of_energy() {
        let model = flory_huggins();
        let phi = [5.0, 4.0];
        let h = 1e-6;
        for t in 0..2 {
            let mut up = phi;
            let mut down = phi;
            up[t] += h;
            down[t] -= h;
            let numeric = (model.energy_density(&up) - model.energy_density(&down)) / (2.0 * h);
            assert_relative_eq!(model.potential(t, &phi), numeric, max_relative = 1e-6);
        }
    }

    #[test]
    fn fields_are_evaluated_cell_by_cell() {
        let model = flory_huggins();
        let densities = vec![
            RealField::from_values(vec![4.0, 6.0]),
            RealField::from_values(vec![4.0, 1.0]),
        ];
        let energy = model.energy_field(&densities);
        assert_relative_eq!(energy.values()[0], 15.0 * 16.0 / 8.0);
        let v1 = model.potential_field(1, &densities);
        assert_relative_eq!(v1.values()[1], -1.0 / 0.4 + 15.0 * 6.0 / 8.0);
    }

    #[test]
    fn ideal_has_no_energy() {
        let model = Ideal { n_types: 3 };
        assert_eq!(model.energy_density(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(model.potential(2, &[1.0, 2.0, 3.0]), 0.0);
    }
}
